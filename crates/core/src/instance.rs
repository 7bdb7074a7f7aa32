use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::peers::Peers;

/// Hex identifier of a deployed database instance. The preimage of the hash
/// is `raw requester node id || mined nonce`.
pub type DatabaseId = String;

/// Resources requested for a database instance.
///
/// `node` is the quorum size and must be positive; `memory` is the minimum
/// free memory each host must report. The remaining dimensions are carried on
/// the wire but not yet enforced by the allocator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// Number of miner nodes to allocate
    pub node: u32,
    /// Minimum free memory in bytes
    pub memory: u64,
    /// Reserved: maximum load average per cpu
    pub loadavg_per_cpu: f64,
    /// Reserved: minimum free disk space in bytes
    pub space: u64,
}

/// Metadata of a deployed database instance as held in the service map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: DatabaseId,
    pub peers: Peers,
    pub resource_meta: ResourceMeta,
    pub genesis_block: Option<Block>,
}
