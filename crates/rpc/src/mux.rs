//! Session multiplexer.
//!
//! One `Session` per remote node carries any number of logically independent
//! request streams over a single encrypted connection. A background reader
//! task routes response frames to per-request oneshot channels keyed by
//! sequence number; the writer half sits behind an async mutex so whole
//! frames interleave, never bytes.
//!
//! A stream performs exactly one request/response exchange. Within a stream
//! the request strictly precedes the response; across streams there is no
//! ordering guarantee.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cql_core::NodeId;

use crate::conn::{CryptoReader, CryptoWriter};
use crate::proto::{self, RequestEnvelope, ResponseEnvelope};
use crate::{Result, TransportError};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<ResponseEnvelope>>>>;

/// A multiplexed session to one remote node. Owned by the session pool;
/// streams borrow it without extending its lifetime past pool eviction.
pub struct Session {
    remote: NodeId,
    writer: Arc<AsyncMutex<CryptoWriter>>,
    pending: PendingMap,
    next_seq: AtomicU64,
    dead: Arc<AtomicBool>,
    reader_handle: JoinHandle<()>,
}

impl Session {
    /// Wrap an established encrypted connection and start its reader task.
    pub fn start(remote: NodeId, reader: CryptoReader, writer: CryptoWriter) -> Arc<Self> {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let dead = Arc::new(AtomicBool::new(false));

        let reader_handle = tokio::spawn(Self::reader_loop(
            remote,
            reader,
            pending.clone(),
            dead.clone(),
        ));

        Arc::new(Session {
            remote,
            writer: Arc::new(AsyncMutex::new(writer)),
            pending,
            next_seq: AtomicU64::new(0),
            dead,
            reader_handle,
        })
    }

    pub fn remote(&self) -> NodeId {
        self.remote
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Relaxed)
    }

    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Relaxed);
    }

    /// Open a fresh logical stream on this session.
    pub fn open_stream(self: &Arc<Self>) -> Stream {
        Stream {
            session: self.clone(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    async fn reader_loop(
        remote: NodeId,
        mut reader: CryptoReader,
        pending: PendingMap,
        dead: Arc<AtomicBool>,
    ) {
        loop {
            match reader.read_frame().await {
                Ok(frame) => {
                    let resp: ResponseEnvelope = match proto::decode(&frame) {
                        Ok(resp) => resp,
                        Err(e) => {
                            warn!(remote = %remote, error = %e, "undecodable response frame");
                            break;
                        }
                    };
                    let sender = pending.lock().expect("pending lock poisoned").remove(&resp.seq);
                    match sender {
                        Some(tx) => {
                            let _ = tx.send(resp);
                        }
                        None => {
                            debug!(remote = %remote, seq = resp.seq, "response for unknown stream");
                        }
                    }
                }
                Err(TransportError::StreamCorrupt) => {
                    warn!(remote = %remote, "stream corrupt, dropping session");
                    break;
                }
                Err(e) => {
                    debug!(remote = %remote, error = %e, "session reader ended");
                    break;
                }
            }
        }

        dead.store(true, Ordering::Relaxed);
        // wake every caller still waiting; their oneshot recv fails
        pending.lock().expect("pending lock poisoned").clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// A single-exchange logical stream borrowed from a session.
pub struct Stream {
    session: Arc<Session>,
    seq: u64,
}

impl Stream {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Write one request and wait for its response.
    pub async fn call(self, method: &str, body: Vec<u8>) -> Result<ResponseEnvelope> {
        if self.session.is_dead() {
            return Err(TransportError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        self.session
            .pending
            .lock()
            .expect("pending lock poisoned")
            .insert(self.seq, tx);

        let request = RequestEnvelope {
            method: method.to_string(),
            seq: self.seq,
            body,
        };
        let frame = proto::encode(&request)?;

        let write_result = {
            let mut writer = self.session.writer.lock().await;
            writer.write_frame(&frame).await
        };

        if let Err(e) = write_result {
            self.session.mark_dead();
            self.session
                .pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&self.seq);
            return Err(e);
        }

        // the reader may have exited between registration and the write; its
        // shutdown drains the pending map, so a late registration would wait
        // forever without this check
        if self.session.is_dead() {
            self.session
                .pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&self.seq);
            return Err(TransportError::ConnectionClosed);
        }

        rx.await.map_err(|_| TransportError::ConnectionClosed)
    }
}
