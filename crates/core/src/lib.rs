//! CovenantSQL core types
//!
//! Domain types shared by every other crate:
//! - Node identities derived from a public key plus a proof-of-work nonce
//! - The `Peers` structure naming the leader and followers of an instance
//! - Genesis blocks signed by the producing block producer
//! - Service instance metadata persisted in the service map
//! - The tagged transaction envelope and its type registry

mod block;
mod envelope;
mod instance;
mod nonce;
mod peers;
mod types;

pub use block::{Block, BlockHeader, BLOCK_VERSION};
pub use envelope::{
    decode_transaction, encode_transaction, register_transaction, EnvelopeError,
    TransactionWrapper, ENVELOPE_NIL,
};
pub use instance::{DatabaseId, ResourceMeta, ServiceInstance};
pub use nonce::Uint256;
pub use peers::{Peers, Server};
pub use types::{
    derive_node_id, verify_node_id, Hash, Node, NodeId, PublicKey, Role, Signature,
    ANONYMOUS_NODE_ID, DEFAULT_NODE_ID_DIFFICULTY,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid hash string: {0}")]
    InvalidHash(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
