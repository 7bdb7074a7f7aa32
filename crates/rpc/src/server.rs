//! RPC server: accepts encrypted connections, verifies presented identities,
//! and dispatches `"Service.Method"` requests to registered handlers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cql_core::NodeId;
use cql_kms::Kms;

use crate::conn::accept_conn;
use crate::proto::{self, RequestEnvelope, ResponseEnvelope};
use crate::Result;

/// A named RPC service. Handlers receive the authenticated caller id, the
/// method name within the service, and the raw request body.
#[async_trait]
pub trait Service: Send + Sync {
    async fn dispatch(
        &self,
        caller: NodeId,
        method: &str,
        body: &[u8],
    ) -> std::result::Result<Vec<u8>, String>;
}

pub struct RpcServer {
    kms: Arc<Kms>,
    difficulty: usize,
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
}

impl RpcServer {
    pub fn new(kms: Arc<Kms>, difficulty: usize) -> Arc<Self> {
        Arc::new(RpcServer {
            kms,
            difficulty,
            services: RwLock::new(HashMap::new()),
        })
    }

    /// Register a service under a name; methods dispatch as `"name.Method"`.
    pub fn register_service(&self, name: &str, service: Arc<dyn Service>) {
        self.services
            .write()
            .expect("service registry poisoned")
            .insert(name.to_string(), service);
        info!(service = name, "registered rpc service");
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "rpc server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(peer = %peer, "inbound connection");
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_conn(stream).await;
            });
        }
    }

    /// Serve a single inbound connection: handshake, then one task per
    /// request so slow handlers never block the frame reader.
    pub async fn handle_conn(self: &Arc<Self>, stream: TcpStream) {
        let (caller, mut reader, writer) =
            match accept_conn(&self.kms, stream, self.difficulty).await {
                Ok(parts) => parts,
                Err(e) => {
                    warn!(error = %e, "handshake failed");
                    return;
                }
            };

        let writer = Arc::new(Mutex::new(writer));

        loop {
            let frame = match reader.read_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(caller = %caller, error = %e, "connection ended");
                    return;
                }
            };

            let request: RequestEnvelope = match proto::decode(&frame) {
                Ok(request) => request,
                Err(e) => {
                    warn!(caller = %caller, error = %e, "undecodable request frame");
                    return;
                }
            };

            let server = self.clone();
            let writer = writer.clone();
            tokio::spawn(async move {
                let response = server.dispatch(caller, request).await;
                let frame = match proto::encode(&response) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "response encode failed");
                        return;
                    }
                };
                let mut writer = writer.lock().await;
                if let Err(e) = writer.write_frame(&frame).await {
                    debug!(caller = %caller, error = %e, "response write failed");
                }
            });
        }
    }

    async fn dispatch(&self, caller: NodeId, request: RequestEnvelope) -> ResponseEnvelope {
        let (service_name, method) = match request.method.split_once('.') {
            Some(parts) => parts,
            None => {
                return ResponseEnvelope {
                    seq: request.seq,
                    error: Some(format!("malformed method: {}", request.method)),
                    body: Vec::new(),
                }
            }
        };

        let service = {
            let services = self.services.read().expect("service registry poisoned");
            services.get(service_name).cloned()
        };

        let Some(service) = service else {
            return ResponseEnvelope {
                seq: request.seq,
                error: Some(format!("unknown service: {}", service_name)),
                body: Vec::new(),
            };
        };

        match service.dispatch(caller, method, &request.body).await {
            Ok(body) => ResponseEnvelope {
                seq: request.seq,
                error: None,
                body,
            },
            Err(message) => ResponseEnvelope {
                seq: request.seq,
                error: Some(message),
                body: Vec::new(),
            },
        }
    }
}
