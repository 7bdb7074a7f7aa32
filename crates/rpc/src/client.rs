use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use cql_core::NodeId;
use cql_kms::Kms;

use crate::conn::dial_conn;
use crate::mux::Session;
use crate::pool::SessionPool;
use crate::proto;
use crate::TransportError;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error string returned by the remote handler
    #[error("Remote error: {0}")]
    Remote(String),
}

/// Synchronous RPC client over the session pool.
pub struct Caller {
    kms: Arc<Kms>,
    pool: Arc<SessionPool>,
}

impl Caller {
    pub fn new(kms: Arc<Kms>, pool: Arc<SessionPool>) -> Self {
        Caller { kms, pool }
    }

    /// Call `method` on `node`: one request, one response, on a pooled
    /// session. The stream is released afterwards; the session stays cached.
    pub async fn call_node<Req, Resp>(
        &self,
        node: NodeId,
        method: &str,
        req: &Req,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = proto::encode(req).map_err(RpcError::Transport)?;
        let stream = self.pool.get(node).await?;

        debug!(node = %node, method, seq = stream.seq(), "calling node");
        let response = match stream.call(method, body).await {
            Ok(response) => response,
            Err(e) => {
                // transport-level failure: drop the session so the next call
                // redials
                self.pool.report_error(&node).await;
                return Err(e.into());
            }
        };

        if let Some(message) = response.error {
            return Err(RpcError::Remote(message));
        }
        let resp = proto::decode(&response.body).map_err(RpcError::Transport)?;
        Ok(resp)
    }

    /// One-shot anonymous call, bypassing the pool entirely. Used for
    /// directory-bootstrap RPCs before this node is registered anywhere.
    pub async fn call_node_anonymous<Req, Resp>(
        &self,
        node: NodeId,
        method: &str,
        req: &Req,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = proto::encode(req).map_err(RpcError::Transport)?;

        let (reader, writer) = dial_conn(&self.kms, &node, true).await?;
        let session = Session::start(node, reader, writer);
        let response = session.open_stream().call(method, body).await?;

        if let Some(message) = response.error {
            return Err(RpcError::Remote(message));
        }
        let resp = proto::decode(&response.body).map_err(RpcError::Transport)?;
        Ok(resp)
    }
}
