//! Consistent-hash placement ring.
//!
//! Nodes are projected onto a ring of SHA-256 points via virtual nodes;
//! `nearest` walks clockwise from a key's point and returns the first `k`
//! distinct nodes matching a role filter. The ring is rebuilt on membership
//! changes and read-only during allocation.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use cql_core::{Node, NodeId, Role};

/// Virtual nodes per physical node. Spreads ownership evenly for small
/// clusters without making rebuilds expensive.
const VNODE_COUNT: u32 = 64;

fn ring_point(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut chunk = [0u8; 8];
    chunk.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(chunk)
}

fn vnode_point(id: &NodeId, replica: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(b":");
    hasher.update(replica.to_be_bytes());
    let digest = hasher.finalize();
    let mut chunk = [0u8; 8];
    chunk.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(chunk)
}

#[derive(Default)]
struct RingState {
    /// ring point -> index into `nodes`; same-point collisions keep the
    /// lexicographically smaller node id for determinism
    points: BTreeMap<u64, usize>,
    nodes: Vec<Node>,
}

/// Thread-safe placement ring.
#[derive(Default)]
pub struct Ring {
    state: RwLock<RingState>,
}

impl Ring {
    pub fn new() -> Self {
        Ring::default()
    }

    /// Replace the full membership. Called from the directory's membership
    /// event stream.
    pub fn set_nodes(&self, nodes: Vec<Node>) {
        let mut points = BTreeMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            for replica in 0..VNODE_COUNT {
                let point = vnode_point(&node.id, replica);
                match points.entry(point) {
                    std::collections::btree_map::Entry::Vacant(e) => {
                        e.insert(idx);
                    }
                    std::collections::btree_map::Entry::Occupied(mut e) => {
                        if node.id < nodes[*e.get()].id {
                            e.insert(idx);
                        }
                    }
                }
            }
        }
        let mut state = self.state.write().expect("ring lock poisoned");
        state.points = points;
        state.nodes = nodes;
    }

    /// Number of distinct nodes on the ring.
    pub fn len(&self) -> usize {
        self.state.read().expect("ring lock poisoned").nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The first `k` distinct nodes clockwise from `key` whose role is in
    /// `roles`. Returns fewer than `k` when the ring runs out of matches.
    pub fn nearest(&self, key: &str, k: usize, roles: &[Role]) -> Vec<Node> {
        let state = self.state.read().expect("ring lock poisoned");
        if k == 0 || state.nodes.is_empty() {
            return Vec::new();
        }

        let start = ring_point(key.as_bytes());
        let mut selected = Vec::with_capacity(k);
        let mut seen: HashSet<NodeId> = HashSet::new();

        // clockwise from the key's point, wrapping once
        let walk = state
            .points
            .range(start..)
            .chain(state.points.range(..start));

        for (_, idx) in walk {
            let node = &state.nodes[*idx];
            if !roles.contains(&node.role) {
                continue;
            }
            if !seen.insert(node.id) {
                continue;
            }
            selected.push(node.clone());
            if selected.len() == k {
                break;
            }
        }

        selected
    }
}
