//! Best-effort two-phase deployment fan-out.
//!
//! The deploy request goes to every target in parallel and the orchestrator
//! waits for all completions before deciding. On any failure the rollback is
//! fanned out to the *full* target set (including nodes that deployed
//! successfully) with errors logged and swallowed; the control path never
//! blocks on rollback outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use cql_core::NodeId;
use cql_rpc::Caller;

use crate::types::{UpdateService, UpdateServiceResponse};

/// Fully-qualified RPC method served by miners
pub const DEPLOY_METHOD: &str = "DBS.Deploy";

/// Transport seam for the orchestrator; lets tests inject failures without a
/// socket.
#[async_trait]
pub trait DeployCaller: Send + Sync {
    async fn deploy(&self, node: NodeId, req: &UpdateService) -> Result<(), String>;
}

/// Production caller dispatching `DBS.Deploy` over the RPC stack.
pub struct RpcDeployCaller {
    pub caller: Arc<Caller>,
}

#[async_trait]
impl DeployCaller for RpcDeployCaller {
    async fn deploy(&self, node: NodeId, req: &UpdateService) -> Result<(), String> {
        self.caller
            .call_node::<UpdateService, UpdateServiceResponse>(node, DEPLOY_METHOD, req)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

async fn send_single(
    caller: &dyn DeployCaller,
    req: &UpdateService,
    nodes: &[NodeId],
) -> Result<(), String> {
    let mut inflight: FuturesUnordered<_> = nodes
        .iter()
        .map(|node| {
            let node = *node;
            async move { (node, caller.deploy(node, req).await) }
        })
        .collect();

    // wait for every target; keep the first error observed
    let mut first_error = None;
    while let Some((node, result)) = inflight.next().await {
        match result {
            Ok(()) => debug!(node = %node, "service request accepted"),
            Err(e) => {
                warn!(node = %node, error = %e, "service request failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

/// Fan out `req` to `nodes`; on any failure fan out `rollback` best-effort
/// and report the first observed deploy error.
pub async fn batch_send_svc_req(
    caller: &dyn DeployCaller,
    req: &UpdateService,
    rollback: Option<&UpdateService>,
    nodes: &[NodeId],
) -> Result<(), String> {
    let result = send_single(caller, req, nodes).await;

    if let Err(ref deploy_error) = result {
        if let Some(rollback) = rollback {
            debug!(targets = nodes.len(), "fanning out rollback");
            if let Err(e) = send_single(caller, rollback, nodes).await {
                // rollback is best-effort; reconciliation is an external
                // concern
                warn!(error = %e, deploy_error = %deploy_error, "rollback incomplete");
            }
        }
    }

    result
}
