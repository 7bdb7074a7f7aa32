//! CovenantSQL RPC stack
//!
//! Layers, bottom up:
//! - `conn`: authenticated encrypted byte transport, a 64-byte identity
//!   prelude (`node_id || pow_nonce`) followed by AES-GCM frames
//! - `mux`: one session per remote node multiplexing independent request
//!   streams over the encrypted connection, correlated by sequence number
//! - `pool`: process-wide session cache with de-duplicated dialing
//! - `proto`: request/response envelopes
//! - `client` / `server`: `Caller::call_node` and named-service dispatch

mod client;
mod conn;
mod mux;
mod pool;
mod proto;
mod server;

pub use client::{Caller, RpcError};
pub use conn::{
    accept_conn, dial_conn, CryptoReader, CryptoWriter, MAX_FRAME_PAYLOAD, PRELUDE_LEN,
};
pub use mux::{Session, Stream};
pub use pool::SessionPool;
pub use proto::{RequestEnvelope, ResponseEnvelope};
pub use server::{RpcServer, Service};

use thiserror::Error;

use cql_core::NodeId;

#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection ended inside the 64-byte identity prelude
    #[error("Handshake truncated")]
    HandshakeTruncated,

    /// Presented nonce does not prove the claimed node id
    #[error("Identity rejected for {0}")]
    IdentityRejected(NodeId),

    /// Frame failed authentication; the connection is unusable
    #[error("Stream corrupt")]
    StreamCorrupt,

    /// Remote identity or address is not in the keystore
    #[error("Unknown peer: {0}")]
    UnknownPeer(NodeId),

    #[error("Frame payload too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Session ended while a request was outstanding
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Envelope codec failed: {0}")]
    Codec(String),

    #[error("Key service error: {0}")]
    Kms(cql_kms::KmsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cql_kms::KmsError> for TransportError {
    fn from(err: cql_kms::KmsError) -> Self {
        match err {
            cql_kms::KmsError::UnknownPeer(id) => TransportError::UnknownPeer(id),
            other => TransportError::Kms(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
