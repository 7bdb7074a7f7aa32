//! Iterative database placement.
//!
//! Each round widens the ring neighborhood by the requested quorum size and
//! filters candidates through the free-memory gate. Nodes with no usable
//! metric or too little memory are excluded permanently within one
//! allocation, so later rounds only evaluate genuinely new candidates.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use cql_core::{CoreError, Node, NodeId, Peers, ResourceMeta, Role, Server};
use cql_crypto::sign_peers;
use cql_kms::Kms;
use cql_ring::Ring;

use crate::metrics::NodeMetricMap;
use crate::DEFAULT_ALLOCATION_ROUNDS;

#[derive(Error, Debug)]
pub enum AllocError {
    /// All allocation rounds exhausted without a full quorum
    #[error("Database allocation failed")]
    AllocationExhausted,

    #[error(transparent)]
    Core(#[from] CoreError),
}

struct AllocatedNode {
    node: Node,
    free_memory: u64,
}

/// Resource-aware placement over the consistent-hash ring.
pub struct Allocator {
    pub kms: Arc<Kms>,
    pub ring: Arc<Ring>,
    pub metrics: Arc<NodeMetricMap>,
    pub rounds: usize,
    /// Allow placement onto block producer nodes; test-case injection only
    pub include_bp_nodes: bool,
}

impl Allocator {
    pub fn new(kms: Arc<Kms>, ring: Arc<Ring>, metrics: Arc<NodeMetricMap>) -> Self {
        Allocator {
            kms,
            ring,
            metrics,
            rounds: DEFAULT_ALLOCATION_ROUNDS,
            include_bp_nodes: false,
        }
    }

    /// Allocate `meta.node` miners for `database_id` and build the signed
    /// peers set with term `last_term + 1`.
    pub fn allocate(
        &self,
        last_term: u64,
        database_id: &str,
        meta: &ResourceMeta,
    ) -> Result<Peers, AllocError> {
        let quorum = meta.node as usize;
        if quorum == 0 {
            return Err(AllocError::AllocationExhausted);
        }

        let mut excluded: HashSet<NodeId> = HashSet::new();
        if !self.include_bp_nodes {
            excluded.extend(self.kms.store().block_producer_ids());
        }

        let roles: Vec<Role> = if self.include_bp_nodes {
            vec![Role::Miner, Role::Leader, Role::Follower]
        } else {
            vec![Role::Miner]
        };

        let mut accepted: Vec<AllocatedNode> = Vec::new();

        for round in 0..self.rounds {
            let range = quorum * (round + 1);
            debug!(round = round + 1, range, "node allocation round");

            let candidates: Vec<Node> = self
                .ring
                .nearest(database_id, range, &roles)
                .into_iter()
                .filter(|n| !excluded.contains(&n.id))
                .collect();

            debug!(count = candidates.len(), "suitable nodes after exclusion");

            if candidates.len() < quorum {
                continue;
            }

            accepted.clear();
            for candidate in candidates {
                let free = match self.metrics.free_memory(&candidate.id) {
                    Ok(free) => free,
                    Err(_) => {
                        debug!(node = %candidate.id, "no free-memory metric, excluding");
                        excluded.insert(candidate.id);
                        continue;
                    }
                };

                if free < meta.memory {
                    debug!(node = %candidate.id, free, need = meta.memory, "memory too low, excluding");
                    excluded.insert(candidate.id);
                    continue;
                }

                accepted.push(AllocatedNode {
                    node: candidate,
                    free_memory: free,
                });
            }

            if accepted.len() >= quorum {
                // most free memory first; node id as the deterministic
                // tie-break
                accepted.sort_by(|a, b| {
                    b.free_memory
                        .cmp(&a.free_memory)
                        .then_with(|| a.node.id.cmp(&b.node.id))
                });
                accepted.truncate(quorum);

                return self.build_peers(last_term + 1, &accepted);
            }
        }

        Err(AllocError::AllocationExhausted)
    }

    fn build_peers(&self, term: u64, allocated: &[AllocatedNode]) -> Result<Peers, AllocError> {
        let servers: Vec<Server> = allocated
            .iter()
            .map(|a| Server {
                role: Role::Follower,
                id: a.node.id,
                public_key: a.node.public_key,
            })
            .collect();

        // Peers::new promotes the first server (largest free memory) to leader
        let mut peers = Peers::new(term, self.kms.local_public_key(), servers);
        sign_peers(self.kms.local_keypair(), &mut peers)?;

        debug!(term, leader = %peers.leader, count = peers.servers.len(), "built peers");
        Ok(peers)
    }
}
