use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::nonce::Uint256;
use crate::CoreError;

/// 32-byte ed25519 public key
pub type PublicKey = [u8; 32];

/// 64-byte ed25519 signature (use BigArray for serde support)
pub type Signature = [u8; 64];

/// Difficulty (leading zero bits) a node identity hash must satisfy
pub const DEFAULT_NODE_ID_DIFFICULTY: usize = 8;

/// Sentinel identity presented by anonymous dials. Bypasses proof-of-work
/// verification on the accepting side; only used for directory-bootstrap RPCs.
pub const ANONYMOUS_NODE_ID: NodeId = NodeId([0u8; 32]);

/// A 32-byte SHA-256 digest
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn zero() -> Self {
        Hash([0u8; 32])
    }

    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Number of leading zero bits, scanned from the first byte down.
    pub fn leading_zero_bits(&self) -> usize {
        let mut bits = 0;
        for byte in self.0.iter() {
            if *byte == 0 {
                bits += 8;
            } else {
                bits += byte.leading_zeros() as usize;
                break;
            }
        }
        bits
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|_| CoreError::InvalidHash(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(CoreError::InvalidHash(s.to_string()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Hash(out))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

/// 32-byte node identifier.
///
/// Valid identifiers are SHA-256 digests over `public_key || nonce` meeting a
/// difficulty target; the raw form is the digest bytes, the display form is
/// lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_anonymous(&self) -> bool {
        *self == ANONYMOUS_NODE_ID
    }
}

impl From<Hash> for NodeId {
    fn from(h: Hash) -> Self {
        NodeId(h.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form keeps log lines readable
        write!(f, "NodeId({}..)", &self.to_hex()[..8])
    }
}

/// Hash a public key together with a candidate nonce.
///
/// The digest doubles as the node identifier when it meets the difficulty
/// target.
pub fn derive_node_id(public_key: &PublicKey, nonce: &Uint256) -> Hash {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(public_key);
    data.extend_from_slice(&nonce.to_bytes());
    Hash::compute(&data)
}

/// Check that a claimed node id was actually mined for this public key.
pub fn verify_node_id(
    public_key: &PublicKey,
    nonce: &Uint256,
    id: &NodeId,
    difficulty: usize,
) -> bool {
    let hash = derive_node_id(public_key, nonce);
    hash.as_bytes() == id.as_bytes() && hash.leading_zero_bits() >= difficulty
}

/// Role a node plays in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Block producer leader
    Leader,
    /// Block producer follower
    Follower,
    /// Database host
    Miner,
}

/// Directory entry describing a known node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub public_key: PublicKey,
    /// `host:port` the node listens on
    pub addr: String,
    pub role: Role,
    /// Proof-of-work nonce backing the node id
    pub nonce: Uint256,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Hash Tests ====================

    #[test]
    fn test_hash_leading_zero_bits() {
        let mut bytes = [0xFFu8; 32];
        assert_eq!(Hash(bytes).leading_zero_bits(), 0);

        bytes[0] = 0x00;
        assert_eq!(Hash(bytes).leading_zero_bits(), 8);

        bytes[1] = 0x0F;
        assert_eq!(Hash(bytes).leading_zero_bits(), 12);

        assert_eq!(Hash([0u8; 32]).leading_zero_bits(), 256);
    }

    #[test]
    fn test_hash_hex_roundtrip() {
        let h = Hash::compute(b"covenantsql");
        let restored = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, restored);
    }

    #[test]
    fn test_hash_from_hex_invalid() {
        assert!(Hash::from_hex("zz").is_err());
        assert!(Hash::from_hex("abcd").is_err()); // too short
    }

    // ==================== NodeId Tests ====================

    #[test]
    fn test_derive_and_verify_node_id() {
        let public_key = [7u8; 32];
        let mut nonce = Uint256::default();

        // mine a tiny difficulty by hand
        loop {
            let hash = derive_node_id(&public_key, &nonce);
            if hash.leading_zero_bits() >= 4 {
                let id = NodeId::from(hash);
                assert!(verify_node_id(&public_key, &nonce, &id, 4));
                break;
            }
            nonce.inc();
        }
    }

    #[test]
    fn test_verify_node_id_rejects_wrong_key() {
        let public_key = [7u8; 32];
        let nonce = Uint256::default();
        let id = NodeId::from(derive_node_id(&public_key, &nonce));

        assert!(!verify_node_id(&[8u8; 32], &nonce, &id, 0));
    }

    #[test]
    fn test_anonymous_node_id() {
        assert!(ANONYMOUS_NODE_ID.is_anonymous());
        assert!(!NodeId([1u8; 32]).is_anonymous());
    }

    #[test]
    fn test_node_serialization() {
        let node = Node {
            id: NodeId([1u8; 32]),
            public_key: [2u8; 32],
            addr: "127.0.0.1:2120".to_string(),
            role: Role::Miner,
            nonce: Uint256::default(),
        };
        let bytes = bincode::serialize(&node).unwrap();
        let restored: Node = bincode::deserialize(&bytes).unwrap();
        assert_eq!(node.id, restored.id);
        assert_eq!(node.addr, restored.addr);
        assert_eq!(node.role, restored.role);
    }
}
