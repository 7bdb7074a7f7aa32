use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::types::{NodeId, PublicKey, Role, Signature};
use crate::CoreError;

/// A single server inside a `Peers` set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub role: Role,
    pub id: NodeId,
    pub public_key: PublicKey,
}

/// Signed set naming the leader and followers of a database instance.
///
/// Invariants: exactly one `Leader`, always at index 0 of `servers`; `term`
/// increases across successive placements of the same database; the structure
/// is immutable once signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peers {
    pub term: u64,
    pub leader: NodeId,
    pub servers: Vec<Server>,
    /// Public key of the constructing block producer
    pub public_key: PublicKey,
    #[serde(with = "BigArray")]
    pub signature: Signature,
}

impl Peers {
    /// Build an unsigned set from an ordered server list. The first server is
    /// promoted to leader.
    pub fn new(term: u64, public_key: PublicKey, mut servers: Vec<Server>) -> Self {
        if let Some(first) = servers.first_mut() {
            first.role = Role::Leader;
        }
        let leader = servers.first().map(|s| s.id).unwrap_or_default();
        Peers {
            term,
            leader,
            servers,
            public_key,
            signature: [0u8; 64],
        }
    }

    /// Data covered by the signature: everything except the signature itself.
    pub fn signable_data(&self) -> Result<Vec<u8>, CoreError> {
        bincode::serialize(&(self.term, &self.leader, &self.servers, &self.public_key))
            .map_err(|e| CoreError::Encoding(e.to_string()))
    }

    pub fn leader_server(&self) -> Option<&Server> {
        self.servers.iter().find(|s| s.role == Role::Leader)
    }

    /// Node ids in placement order (leader first).
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.servers.iter().map(|s| s.id).collect()
    }
}
