//! Durable registry of deployed database instances.
//!
//! The in-memory map (plus a reverse node index) is a cache over an external
//! consensus-replicated store reached through [`CommitStore`]. Writes commit
//! synchronously and only update memory after the commit acknowledges; reads
//! are served from memory. Startup rehydrates from the store.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use thiserror::Error;
use tracing::{info, warn};

use cql_core::{DatabaseId, NodeId, ServiceInstance};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store IO failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store encoding failed: {0}")]
    Codec(String),
}

#[derive(Error, Debug)]
pub enum MapError {
    #[error("No such database: {0}")]
    NotFound(DatabaseId),

    /// Critical: the commit did not acknowledge. The registry may now
    /// disagree with the durable log until external reconciliation runs.
    #[error("Store commit failed: {0}")]
    StoreCommitFailed(StoreError),
}

/// Seam to the consensus-replicated store backing the registry.
pub trait CommitStore: Send + Sync {
    fn commit_set(&self, instance: &ServiceInstance) -> Result<(), StoreError>;
    fn commit_delete(&self, id: &str) -> Result<(), StoreError>;
    fn load_all(&self) -> Result<Vec<ServiceInstance>, StoreError>;
}

#[derive(Default)]
struct MapInner {
    instances: HashMap<DatabaseId, ServiceInstance>,
    by_node: HashMap<NodeId, HashSet<DatabaseId>>,
}

impl MapInner {
    fn insert(&mut self, instance: ServiceInstance) {
        for id in instance.peers.node_ids() {
            self.by_node.entry(id).or_default().insert(instance.id.clone());
        }
        self.instances.insert(instance.id.clone(), instance);
    }

    fn remove(&mut self, id: &str) {
        if let Some(instance) = self.instances.remove(id) {
            for node in instance.peers.node_ids() {
                if let Some(set) = self.by_node.get_mut(&node) {
                    set.remove(id);
                    if set.is_empty() {
                        self.by_node.remove(&node);
                    }
                }
            }
        }
    }
}

/// Mapping `DatabaseId -> ServiceInstance` with a `NodeId` reverse index.
pub struct ServiceMap {
    store: Box<dyn CommitStore>,
    inner: RwLock<MapInner>,
}

impl ServiceMap {
    pub fn new(store: Box<dyn CommitStore>) -> Self {
        ServiceMap {
            store,
            inner: RwLock::new(MapInner::default()),
        }
    }

    /// Load every committed instance into memory. Call once at startup.
    pub fn rehydrate(&self) -> Result<usize, MapError> {
        let instances = self.store.load_all().map_err(MapError::StoreCommitFailed)?;
        let count = instances.len();

        let mut inner = self.inner.write().expect("service map poisoned");
        *inner = MapInner::default();
        for instance in instances {
            inner.insert(instance);
        }

        info!(count, "service map rehydrated");
        Ok(count)
    }

    /// Register an instance. The store commit must acknowledge before the
    /// in-memory index changes.
    pub fn set(&self, instance: ServiceInstance) -> Result<(), MapError> {
        if let Err(e) = self.store.commit_set(&instance) {
            warn!(id = %instance.id, error = %e, "service map commit failed");
            return Err(MapError::StoreCommitFailed(e));
        }

        self.inner
            .write()
            .expect("service map poisoned")
            .insert(instance);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<ServiceInstance, MapError> {
        self.inner
            .read()
            .expect("service map poisoned")
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| MapError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .read()
            .expect("service map poisoned")
            .instances
            .contains_key(id)
    }

    pub fn delete(&self, id: &str) -> Result<(), MapError> {
        if !self.contains(id) {
            return Err(MapError::NotFound(id.to_string()));
        }
        if let Err(e) = self.store.commit_delete(id) {
            warn!(id, error = %e, "service map delete commit failed");
            return Err(MapError::StoreCommitFailed(e));
        }

        self.inner.write().expect("service map poisoned").remove(id);
        Ok(())
    }

    /// All instances a node serves.
    pub fn get_databases(&self, node: &NodeId) -> Vec<ServiceInstance> {
        let inner = self.inner.read().expect("service map poisoned");
        let Some(ids) = inner.by_node.get(node) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.instances.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("service map poisoned")
            .instances
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory commit store for tests and single-process tooling.
#[derive(Default)]
pub struct MemStore {
    committed: Mutex<HashMap<DatabaseId, ServiceInstance>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }
}

impl CommitStore for MemStore {
    fn commit_set(&self, instance: &ServiceInstance) -> Result<(), StoreError> {
        self.committed
            .lock()
            .expect("mem store poisoned")
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    fn commit_delete(&self, id: &str) -> Result<(), StoreError> {
        self.committed.lock().expect("mem store poisoned").remove(id);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<ServiceInstance>, StoreError> {
        Ok(self
            .committed
            .lock()
            .expect("mem store poisoned")
            .values()
            .cloned()
            .collect())
    }
}

/// Single-node file-backed commit store: rewrites a bincode snapshot per
/// commit. Stands in for the replicated log on standalone deployments.
pub struct FileStore {
    path: PathBuf,
    committed: Mutex<HashMap<DatabaseId, ServiceInstance>>,
}

impl FileStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let committed = if path.exists() {
            let bytes = std::fs::read(path)?;
            let list: Vec<ServiceInstance> =
                bincode::deserialize(&bytes).map_err(|e| StoreError::Codec(e.to_string()))?;
            list.into_iter().map(|i| (i.id.clone(), i)).collect()
        } else {
            HashMap::new()
        };

        Ok(FileStore {
            path: path.to_path_buf(),
            committed: Mutex::new(committed),
        })
    }

    fn persist(&self, committed: &HashMap<DatabaseId, ServiceInstance>) -> Result<(), StoreError> {
        let list: Vec<&ServiceInstance> = committed.values().collect();
        let bytes = bincode::serialize(&list).map_err(|e| StoreError::Codec(e.to_string()))?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl CommitStore for FileStore {
    fn commit_set(&self, instance: &ServiceInstance) -> Result<(), StoreError> {
        let mut committed = self.committed.lock().expect("file store poisoned");
        committed.insert(instance.id.clone(), instance.clone());
        self.persist(&committed)
    }

    fn commit_delete(&self, id: &str) -> Result<(), StoreError> {
        let mut committed = self.committed.lock().expect("file store poisoned");
        committed.remove(id);
        self.persist(&committed)
    }

    fn load_all(&self) -> Result<Vec<ServiceInstance>, StoreError> {
        Ok(self
            .committed
            .lock()
            .expect("file store poisoned")
            .values()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cql_core::{Peers, ResourceMeta, Role, Server};

    fn instance(id: &str, nodes: &[u8]) -> ServiceInstance {
        let servers = nodes
            .iter()
            .map(|n| Server {
                role: Role::Follower,
                id: NodeId([*n; 32]),
                public_key: [*n; 32],
            })
            .collect();
        ServiceInstance {
            id: id.to_string(),
            peers: Peers::new(1, [0u8; 32], servers),
            resource_meta: ResourceMeta::default(),
            genesis_block: None,
        }
    }

    #[test]
    fn test_set_get_delete() {
        let map = ServiceMap::new(Box::new(MemStore::new()));
        map.set(instance("db1", &[1, 2, 3])).unwrap();

        assert_eq!(map.get("db1").unwrap().id, "db1");
        map.delete("db1").unwrap();
        assert!(matches!(map.get("db1"), Err(MapError::NotFound(_))));
    }

    #[test]
    fn test_delete_missing_not_found() {
        let map = ServiceMap::new(Box::new(MemStore::new()));
        assert!(matches!(map.delete("nope"), Err(MapError::NotFound(_))));
    }

    #[test]
    fn test_reverse_index() {
        let map = ServiceMap::new(Box::new(MemStore::new()));
        map.set(instance("db1", &[1, 2])).unwrap();
        map.set(instance("db2", &[2, 3])).unwrap();

        let node2 = NodeId([2u8; 32]);
        let mut ids: Vec<String> = map
            .get_databases(&node2)
            .into_iter()
            .map(|i| i.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["db1", "db2"]);

        map.delete("db1").unwrap();
        let ids: Vec<String> = map
            .get_databases(&node2)
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["db2"]);

        assert!(map.get_databases(&NodeId([1u8; 32])).is_empty());
    }

    #[test]
    fn test_rehydrate_restores_memory() {
        let store = MemStore::new();
        store.commit_set(&instance("db1", &[1])).unwrap();
        store.commit_set(&instance("db2", &[2])).unwrap();

        let map = ServiceMap::new(Box::new(store));
        assert!(map.is_empty());

        assert_eq!(map.rehydrate().unwrap(), 2);
        assert!(map.contains("db1"));
        assert_eq!(map.get_databases(&NodeId([2u8; 32])).len(), 1);
    }

    #[test]
    fn test_commit_failure_keeps_memory_unchanged() {
        struct FailingStore;
        impl CommitStore for FailingStore {
            fn commit_set(&self, _: &ServiceInstance) -> Result<(), StoreError> {
                Err(StoreError::Codec("log unavailable".to_string()))
            }
            fn commit_delete(&self, _: &str) -> Result<(), StoreError> {
                Err(StoreError::Codec("log unavailable".to_string()))
            }
            fn load_all(&self) -> Result<Vec<ServiceInstance>, StoreError> {
                Ok(Vec::new())
            }
        }

        let map = ServiceMap::new(Box::new(FailingStore));
        let result = map.set(instance("db1", &[1]));
        assert!(matches!(result, Err(MapError::StoreCommitFailed(_))));
        // memory must not run ahead of the store
        assert!(!map.contains("db1"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = std::env::temp_dir().join("cql_test_filestore");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("servicemap.db");

        {
            let store = FileStore::open(&path).unwrap();
            let map = ServiceMap::new(Box::new(store));
            map.set(instance("db1", &[1, 2])).unwrap();
        }

        let map = ServiceMap::new(Box::new(FileStore::open(&path).unwrap()));
        map.rehydrate().unwrap();
        assert!(map.contains("db1"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
