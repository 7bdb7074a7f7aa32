//! The `BPDB` service: block-producer database lifecycle RPCs.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use cql_core::{Block, CoreError, DatabaseId, NodeId, ServiceInstance, Uint256};
use cql_crypto::sign_block;
use cql_kms::Kms;
use cql_miner::mine_once;
use cql_rpc::Service;

use crate::alloc::{AllocError, Allocator};
use crate::deploy::{batch_send_svc_req, DeployCaller};
use crate::service_map::{MapError, ServiceMap};
use crate::types::{
    CreateDatabaseRequest, CreateDatabaseResponse, CreateDatabaseResponseHeader,
    DropDatabaseRequest, DropDatabaseResponse, DropDatabaseResponseHeader, GetDatabaseRequest,
    GetDatabaseResponse, GetDatabaseResponseHeader, InitServiceRequest, InitServiceResponse,
    InitServiceResponseHeader, ServiceOp, Signed, UpdateService, UpdateServiceHeader,
};
use crate::DATABASE_ID_DIFFICULTY;

/// Registered service name; methods dispatch as `BPDB.<Method>`
pub const BPDB_SERVICE_NAME: &str = "BPDB";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Map(#[from] MapError),

    #[error("Deploy failed: {0}")]
    DeployFailed(String),

    #[error("Key service error: {0}")]
    Kms(#[from] cql_kms::KmsError),
}

#[derive(Debug, Clone)]
pub struct DbServiceConfig {
    /// Proof-of-work difficulty for generated database ids
    pub id_difficulty: usize,
    /// Worker threads per id mining run
    pub miner_workers: u64,
}

impl Default for DbServiceConfig {
    fn default() -> Self {
        DbServiceConfig {
            id_difficulty: DATABASE_ID_DIFFICULTY,
            miner_workers: 2,
        }
    }
}

/// Block-producer database service.
pub struct DbService {
    kms: Arc<Kms>,
    allocator: Allocator,
    service_map: Arc<ServiceMap>,
    deploy: Arc<dyn DeployCaller>,
    config: DbServiceConfig,
}

impl DbService {
    pub fn new(
        kms: Arc<Kms>,
        allocator: Allocator,
        service_map: Arc<ServiceMap>,
        deploy: Arc<dyn DeployCaller>,
        config: DbServiceConfig,
    ) -> Self {
        DbService {
            kms,
            allocator,
            service_map,
            deploy,
            config,
        }
    }

    pub fn service_map(&self) -> &Arc<ServiceMap> {
        &self.service_map
    }

    /// Mine a unique database id using the requester's raw id as preimage.
    ///
    /// Rejection-samples: an id colliding with a live registry entry restarts
    /// the search one past the accepted nonce.
    pub fn generate_database_id(&self, requester: &NodeId) -> DatabaseId {
        let mut start = Uint256::default();

        loop {
            let accepted = mine_once(
                requester.as_bytes().to_vec(),
                start,
                self.config.id_difficulty,
                self.config.miner_workers,
            );
            let id = accepted.hash.to_hex();
            debug!(id = %id, "candidate database id");

            if !self.service_map.contains(&id) {
                return id;
            }

            start = accepted.nonce;
            start.inc();
        }
    }

    fn generate_genesis_block(&self) -> Result<Block, ServiceError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut block = Block::genesis(self.kms.local_node_id()?, timestamp);
        sign_block(self.kms.local_keypair(), &mut block)?;
        Ok(block)
    }

    pub async fn create_database(
        &self,
        req: CreateDatabaseRequest,
    ) -> Result<CreateDatabaseResponse, ServiceError> {
        req.verify()?;

        let database_id = self.generate_database_id(&req.header.node_id);

        let peers = self
            .allocator
            .allocate(0, &database_id, &req.header.resource_meta)?;

        let genesis_block = self.generate_genesis_block()?;

        let instance = ServiceInstance {
            id: database_id.clone(),
            peers: peers.clone(),
            resource_meta: req.header.resource_meta.clone(),
            genesis_block: Some(genesis_block),
        };

        let mut init_req: UpdateService = Signed::new(UpdateServiceHeader {
            op: ServiceOp::CreateDb,
            instance: instance.clone(),
        });
        init_req.sign(self.kms.local_keypair())?;

        let mut rollback_req: UpdateService = Signed::new(UpdateServiceHeader {
            op: ServiceOp::DropDb,
            instance: ServiceInstance {
                id: database_id.clone(),
                peers: cql_core::Peers::new(0, self.kms.local_public_key(), vec![]),
                resource_meta: Default::default(),
                genesis_block: None,
            },
        });
        rollback_req.sign(self.kms.local_keypair())?;

        let targets = peers.node_ids();
        batch_send_svc_req(
            self.deploy.as_ref(),
            &init_req,
            Some(&rollback_req),
            &targets,
        )
        .await
        .map_err(ServiceError::DeployFailed)?;

        debug!(id = %database_id, "generated instance meta");

        // critical: a commit failure here leaves deployed miners without a
        // registry entry until reconciliation
        self.service_map.set(instance.clone())?;

        info!(id = %database_id, term = peers.term, leader = %peers.leader, "database created");

        let mut resp: CreateDatabaseResponse =
            Signed::new(CreateDatabaseResponseHeader { instance });
        resp.sign(self.kms.local_keypair())?;
        Ok(resp)
    }

    pub async fn drop_database(
        &self,
        req: DropDatabaseRequest,
    ) -> Result<DropDatabaseResponse, ServiceError> {
        req.verify()?;

        let instance = self.service_map.get(&req.header.database_id)?;

        let mut drop_req: UpdateService = Signed::new(UpdateServiceHeader {
            op: ServiceOp::DropDb,
            instance: ServiceInstance {
                id: req.header.database_id.clone(),
                peers: cql_core::Peers::new(0, self.kms.local_public_key(), vec![]),
                resource_meta: Default::default(),
                genesis_block: None,
            },
        });
        drop_req.sign(self.kms.local_keypair())?;

        let targets = instance.peers.node_ids();
        batch_send_svc_req(self.deploy.as_ref(), &drop_req, None, &targets)
            .await
            .map_err(ServiceError::DeployFailed)?;

        self.service_map.delete(&req.header.database_id)?;

        info!(id = %req.header.database_id, "database dropped");

        let mut resp: DropDatabaseResponse = Signed::new(DropDatabaseResponseHeader {});
        resp.sign(self.kms.local_keypair())?;
        Ok(resp)
    }

    pub fn get_database(&self, req: GetDatabaseRequest) -> Result<GetDatabaseResponse, ServiceError> {
        req.verify()?;

        let instance = self.service_map.get(&req.header.database_id)?;

        let mut resp: GetDatabaseResponse = Signed::new(GetDatabaseResponseHeader { instance });
        resp.sign(self.kms.local_keypair())?;
        Ok(resp)
    }

    pub fn get_node_databases(
        &self,
        req: InitServiceRequest,
    ) -> Result<InitServiceResponse, ServiceError> {
        req.verify()?;

        let instances = self.service_map.get_databases(&req.header.node_id);
        debug!(node = %req.header.node_id, count = instances.len(), "current instances for node");

        let mut resp: InitServiceResponse = Signed::new(InitServiceResponseHeader { instances });
        resp.sign(self.kms.local_keypair())?;
        Ok(resp)
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, String> {
    bincode::deserialize(body).map_err(|e| format!("request decode failed: {}", e))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, String> {
    bincode::serialize(value).map_err(|e| format!("response encode failed: {}", e))
}

#[async_trait]
impl Service for DbService {
    async fn dispatch(
        &self,
        caller: NodeId,
        method: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, String> {
        debug!(caller = %caller, method, "bpdb dispatch");
        match method {
            "CreateDatabase" => {
                let req: CreateDatabaseRequest = decode(body)?;
                let resp = self.create_database(req).await.map_err(|e| e.to_string())?;
                encode(&resp)
            }
            "DropDatabase" => {
                let req: DropDatabaseRequest = decode(body)?;
                let resp = self.drop_database(req).await.map_err(|e| e.to_string())?;
                encode(&resp)
            }
            "GetDatabase" => {
                let req: GetDatabaseRequest = decode(body)?;
                let resp = self.get_database(req).map_err(|e| e.to_string())?;
                encode(&resp)
            }
            "GetNodeDatabases" => {
                let req: InitServiceRequest = decode(body)?;
                let resp = self.get_node_databases(req).map_err(|e| e.to_string())?;
                encode(&resp)
            }
            other => Err(format!("unknown method: BPDB.{}", other)),
        }
    }
}
