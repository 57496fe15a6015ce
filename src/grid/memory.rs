//! In-process grid
//!
//! Single-process stand-in for a partitioned data grid. Each simulated node
//! holds its own region maps, writes replicate to every owner of the key's
//! shard, and reads go to the primary unless backup reads are enabled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::GridConfig;
use crate::grid::placement::{GridNode, Placement};
use crate::grid::{GridError, GridResult, KeyValueGrid, LockLease, Region};

type RegionMap = HashMap<(Region, String), Vec<u8>>;

pub struct MemoryGrid {
    topology: Vec<GridNode>,
    stores: Vec<RwLock<RegionMap>>,
    placement: Placement,
    backups: usize,
    read_from_backup: bool,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryGrid {
    /// Build a grid of `config.nodes` simulated nodes, each on its own host.
    pub fn new(config: &GridConfig) -> Self {
        let nodes = config.nodes.max(1);
        let topology = (0..nodes)
            .map(|i| GridNode::new(format!("node-{i}"), format!("host-{i}")))
            .collect();
        Self::with_topology(topology, config.replicas, config.read_from_backup)
    }

    /// Build a grid over an explicit topology.
    pub fn with_topology(topology: Vec<GridNode>, backups: usize, read_from_backup: bool) -> Self {
        let stores = topology.iter().map(|_| RwLock::new(HashMap::new())).collect();
        let backups = backups.min(topology.len().saturating_sub(1));
        debug!(
            "memory grid with {} nodes, {} backups per shard",
            topology.len(),
            backups
        );
        Self {
            topology,
            stores,
            placement: Placement::new(),
            backups,
            read_from_backup,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn owners(&self, key: &str) -> GridResult<Vec<usize>> {
        let shard = self.placement.shard(key)?;
        Ok(self.placement.assign(shard, &self.topology, self.backups))
    }

    fn read_owner(&self, owners: &[usize], key: &str) -> usize {
        if self.read_from_backup && owners.len() > 1 {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(key.as_bytes());
            owners[hasher.finalize() as usize % owners.len()]
        } else {
            owners[0]
        }
    }

    #[cfg(test)]
    async fn replica_count(&self, region: Region, key: &str) -> usize {
        let mut copies = 0;
        for store in &self.stores {
            if store.read().await.contains_key(&(region, key.to_string())) {
                copies += 1;
            }
        }
        copies
    }

    #[cfg(test)]
    async fn lock_entries(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[async_trait]
impl KeyValueGrid for MemoryGrid {
    async fn get(&self, region: Region, key: &str) -> GridResult<Option<Vec<u8>>> {
        let owners = self.owners(key)?;
        if owners.is_empty() {
            return Ok(None);
        }
        let node = self.read_owner(&owners, key);
        let store = self.stores[node].read().await;
        Ok(store.get(&(region, key.to_string())).cloned())
    }

    async fn put(&self, region: Region, key: &str, value: Vec<u8>) -> GridResult<()> {
        let owners = self.owners(key)?;
        if owners.is_empty() {
            return Err(GridError::Store("no owners for key".to_string()));
        }
        for node in &owners {
            let mut store = self.stores[*node].write().await;
            store.insert((region, key.to_string()), value.clone());
        }
        Ok(())
    }

    async fn get_many(
        &self,
        region: Region,
        keys: &[String],
    ) -> GridResult<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(region, key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn lock(&self, region: Region, key: &str, timeout: Duration) -> GridResult<LockLease> {
        let name = format!("{region}/{key}");
        let entry = {
            let mut registry = self.locks.lock().await;
            // an entry referenced only by the registry has no holder and no waiter
            registry.retain(|_, lock| Arc::strong_count(lock) > 1);
            registry
                .entry(name)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        match tokio::time::timeout(timeout, entry.lock_owned()).await {
            Ok(guard) => Ok(LockLease::new(guard)),
            Err(_) => Err(GridError::LockTimeout {
                key: key.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn shard_of(&self, key: &str) -> GridResult<u32> {
        Ok(self.placement.shard(key)?)
    }
}
