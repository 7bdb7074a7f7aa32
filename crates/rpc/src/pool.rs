//! Process-wide session pool.
//!
//! Each remote node yields at most one live session; concurrent callers share
//! it and open independent streams. Concurrent `get` calls for the same
//! uncached node share a single dial through a per-node `OnceCell` slot, so
//! two racing callers never create two sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use cql_core::NodeId;
use cql_kms::Kms;

use crate::conn::dial_conn;
use crate::mux::{Session, Stream};
use crate::Result;

#[derive(Default)]
struct DialSlot {
    cell: OnceCell<Arc<Session>>,
}

pub struct SessionPool {
    kms: Arc<Kms>,
    sessions: Mutex<HashMap<NodeId, Arc<DialSlot>>>,
}

impl SessionPool {
    pub fn new(kms: Arc<Kms>) -> Arc<Self> {
        Arc::new(SessionPool {
            kms,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Return a fresh stream to `node`, dialing a session if none is cached.
    ///
    /// The pool lock only covers slot bookkeeping; the dial itself runs
    /// outside it, de-duplicated by the slot's `OnceCell`.
    pub async fn get(&self, node: NodeId) -> Result<Stream> {
        let slot = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&node) {
                Some(slot)
                    if !slot
                        .cell
                        .get()
                        .map(|session| session.is_dead())
                        .unwrap_or(false) =>
                {
                    slot.clone()
                }
                _ => {
                    debug!(node = %node, "installing fresh dial slot");
                    let slot = Arc::new(DialSlot::default());
                    sessions.insert(node, slot.clone());
                    slot
                }
            }
        };

        let kms = self.kms.clone();
        let session = slot
            .cell
            .get_or_try_init(|| async move {
                info!(node = %node, "dialing new session");
                let (reader, writer) = dial_conn(&kms, &node, false).await?;
                Ok::<_, crate::TransportError>(Session::start(node, reader, writer))
            })
            .await?;

        Ok(session.open_stream())
    }

    /// Record an IO error observed on a session; the next `get` rebuilds it.
    pub async fn report_error(&self, node: &NodeId) {
        let mut sessions = self.sessions.lock().await;
        if let Some(slot) = sessions.remove(node) {
            if let Some(session) = slot.cell.get() {
                session.mark_dead();
            }
            debug!(node = %node, "session evicted after error");
        }
    }

    /// Number of cached slots (live or mid-dial).
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
