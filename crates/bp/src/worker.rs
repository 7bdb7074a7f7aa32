//! Miner-side `DBS` service.
//!
//! Receives signed `UpdateService` requests from the block producer and
//! tracks which instances this miner hosts. The SQL execution plane itself is
//! driven elsewhere; this handler only acknowledges deployments so the
//! control plane can commit, and keeps the local instance table that a
//! restart replays against `BPDB.GetNodeDatabases`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use cql_core::{DatabaseId, NodeId, ServiceInstance};
use cql_crypto::{verify_peers, SigningKeypair};
use cql_rpc::Service;

use crate::types::{
    ServiceOp, Signed, UpdateService, UpdateServiceResponse, UpdateServiceResponseHeader,
};

/// Registered service name on miner nodes
pub const DBS_SERVICE_NAME: &str = "DBS";

/// Deployment endpoint served by a miner node.
pub struct DbsService {
    keypair: Arc<SigningKeypair>,
    instances: RwLock<HashMap<DatabaseId, ServiceInstance>>,
}

impl DbsService {
    pub fn new(keypair: Arc<SigningKeypair>) -> Self {
        DbsService {
            keypair,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Apply one service update from the block producer.
    pub fn deploy(&self, req: UpdateService) -> Result<UpdateServiceResponse, String> {
        req.verify().map_err(|e| e.to_string())?;

        match req.header.op {
            ServiceOp::CreateDb => {
                // the peers set is signed independently by the producer
                verify_peers(&req.header.instance.peers).map_err(|e| e.to_string())?;

                info!(id = %req.header.instance.id, "instance deployed");
                self.instances
                    .write()
                    .expect("instance table poisoned")
                    .insert(req.header.instance.id.clone(), req.header.instance);
            }
            ServiceOp::DropDb => {
                let removed = self
                    .instances
                    .write()
                    .expect("instance table poisoned")
                    .remove(&req.header.instance.id);
                // dropping an unknown instance is not an error: rollbacks
                // reach miners that never accepted the create
                debug!(
                    id = %req.header.instance.id,
                    known = removed.is_some(),
                    "instance dropped"
                );
            }
        }

        let mut resp: UpdateServiceResponse = Signed::new(UpdateServiceResponseHeader {});
        resp.sign(&self.keypair).map_err(|e| e.to_string())?;
        Ok(resp)
    }

    /// Ids of instances this miner currently hosts.
    pub fn instance_ids(&self) -> Vec<DatabaseId> {
        self.instances
            .read()
            .expect("instance table poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn hosts(&self, id: &str) -> bool {
        self.instances
            .read()
            .expect("instance table poisoned")
            .contains_key(id)
    }
}

#[async_trait]
impl Service for DbsService {
    async fn dispatch(
        &self,
        caller: NodeId,
        method: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, String> {
        debug!(caller = %caller, method, "dbs dispatch");
        match method {
            "Deploy" => {
                let req: UpdateService = bincode::deserialize(body)
                    .map_err(|e| format!("request decode failed: {}", e))?;
                let resp = self.deploy(req)?;
                bincode::serialize(&resp).map_err(|e| format!("response encode failed: {}", e))
            }
            other => Err(format!("unknown method: DBS.{}", other)),
        }
    }
}
