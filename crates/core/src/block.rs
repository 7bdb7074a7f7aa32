use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::types::{Hash, NodeId, PublicKey, Signature};
use crate::CoreError;

/// Block format version
pub const BLOCK_VERSION: u32 = 0x0100_0000;

/// Header of a genesis block handed to a fresh database instance.
///
/// `genesis_hash` and `parent_hash` are zero for genesis; the hash covers all
/// header fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub producer: NodeId,
    pub genesis_hash: Hash,
    pub parent_hash: Hash,
    /// UTC wall-clock at creation, unix seconds
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Public key of the signing producer
    pub signee: PublicKey,
    #[serde(with = "BigArray")]
    pub signature: Signature,
}

impl Block {
    /// Build an unsigned genesis block for the given producer.
    pub fn genesis(producer: NodeId, timestamp: u64) -> Self {
        Block {
            header: BlockHeader {
                version: BLOCK_VERSION,
                producer,
                genesis_hash: Hash::zero(),
                parent_hash: Hash::zero(),
                timestamp,
            },
            signee: [0u8; 32],
            signature: [0u8; 64],
        }
    }

    /// Hash over all header fields; this is what gets signed.
    pub fn header_hash(&self) -> Result<Hash, CoreError> {
        let bytes =
            bincode::serialize(&self.header).map_err(|e| CoreError::Encoding(e.to_string()))?;
        Ok(Hash::compute(&bytes))
    }
}
