use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::info;

use cql_core::{Node, NodeId, Role};

use crate::local::resolve_key_path;
use crate::{KmsError, Result};

/// Public keystore: the directory of known nodes keyed by node id.
///
/// Reads are served from memory; every mutation rewrites the backing file so
/// a restart sees the same directory. An in-memory variant backs tests and
/// ephemeral tooling.
pub struct NodeStore {
    path: Option<PathBuf>,
    nodes: RwLock<HashMap<NodeId, Node>>,
}

impl NodeStore {
    /// Open a keystore file, creating an empty store when the file does not
    /// exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let path = resolve_key_path(path);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(KmsError::CreateDirError)?;
            }
        }

        let nodes = if path.exists() {
            let bytes = std::fs::read(&path).map_err(KmsError::ReadError)?;
            let list: Vec<Node> = bincode::deserialize(&bytes)
                .map_err(|e| KmsError::InvalidFormat(e.to_string()))?;
            info!(count = list.len(), path = %path.display(), "loaded public keystore");
            list.into_iter().map(|n| (n.id, n)).collect()
        } else {
            HashMap::new()
        };

        Ok(NodeStore {
            path: Some(path),
            nodes: RwLock::new(nodes),
        })
    }

    /// Purely in-memory store, used by tests and one-shot tooling.
    pub fn in_memory() -> Self {
        NodeStore {
            path: None,
            nodes: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_node(&self, node: Node) -> Result<()> {
        {
            let mut nodes = self.nodes.write().expect("store lock poisoned");
            nodes.insert(node.id, node);
        }
        self.persist()
    }

    pub fn get_node(&self, id: &NodeId) -> Result<Node> {
        self.nodes
            .read()
            .expect("store lock poisoned")
            .get(id)
            .cloned()
            .ok_or(KmsError::UnknownPeer(*id))
    }

    /// All known nodes, in unspecified order.
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes
            .read()
            .expect("store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Ids of known block producers (ring leaders and followers).
    pub fn block_producer_ids(&self) -> Vec<NodeId> {
        self.nodes
            .read()
            .expect("store lock poisoned")
            .values()
            .filter(|n| matches!(n.role, Role::Leader | Role::Follower))
            .map(|n| n.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let list: Vec<Node> = self.nodes();
        let bytes = bincode::serialize(&list).map_err(|e| KmsError::InvalidFormat(e.to_string()))?;
        std::fs::write(path, bytes).map_err(KmsError::WriteError)
    }
}
