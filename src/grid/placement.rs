//! Day-of-year placement
//!
//! Maps every persisted key to one of 366 shards using the calendar day
//! embedded in the key. All records for one day land on the same shard, so a
//! day's bitmaps, group metadata and window entries stay co-located and a
//! single-day query touches a single primary node. Shard-to-node assignment
//! uses rendezvous hashing with host anti-affinity for backups.

use std::collections::HashSet;

use tracing::error;

use crate::keys::{self, KeyGrammar, KeyResult};

/// One node visible to placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridNode {
    /// Stable node identifier
    pub id: String,
    /// Physical host the node runs on
    pub host: String,
}

impl GridNode {
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
        }
    }
}

/// Key-to-shard and shard-to-node mapping
#[derive(Debug)]
pub struct Placement {
    shards: u32,
    grammar: KeyGrammar,
}

impl Placement {
    /// Number of shards in the ring. Covers every possible day-of-year;
    /// changing it moves existing data and requires a reshard.
    pub const RING_SIZE: u32 = 366;

    pub fn new() -> Self {
        Self::with_shards(Self::RING_SIZE)
    }

    /// Build a placement over a custom ring size. Panics if `shards` is zero.
    pub fn with_shards(shards: u32) -> Self {
        assert!(shards > 0, "ring must have at least one shard");
        Self {
            shards,
            grammar: KeyGrammar::new(),
        }
    }

    pub fn shards(&self) -> u32 {
        self.shards
    }

    /// Shard of a key: day-of-year of the embedded calendar day, modulo the
    /// ring size. Pure and stable for a given key.
    pub fn shard(&self, key: &str) -> KeyResult<u32> {
        let day = self.grammar.day_of(key).map_err(|err| {
            error!("cannot place key {key}: {err}");
            err
        })?;
        Ok(keys::day_of_year(day)? % self.shards)
    }

    /// Pick `backups + 1` owner indexes for a shard from the topology,
    /// primary first. Nodes are ranked by rendezvous score; a host already
    /// holding a copy is skipped, so primary and backups land on distinct
    /// hosts. When fewer distinct hosts exist than requested copies, the
    /// host constraint is relaxed rather than leaving the shard under-owned.
    pub fn assign(&self, shard: u32, topology: &[GridNode], backups: usize) -> Vec<usize> {
        let copies = (backups + 1).min(topology.len());
        if copies == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<(u32, usize)> = topology
            .iter()
            .enumerate()
            .map(|(idx, node)| (score(node, shard), idx))
            .collect();
        ranked.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| topology[a.1].id.cmp(&topology[b.1].id))
        });

        let mut owners = Vec::with_capacity(copies);
        let mut hosts = HashSet::new();
        for (_, idx) in &ranked {
            if owners.len() == copies {
                break;
            }
            if hosts.insert(topology[*idx].host.as_str()) {
                owners.push(*idx);
            }
        }
        if owners.len() < copies {
            for (_, idx) in &ranked {
                if owners.len() == copies {
                    break;
                }
                if !owners.contains(idx) {
                    owners.push(*idx);
                }
            }
        }
        owners
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::new()
    }
}

fn score(node: &GridNode, shard: u32) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(node.id.as_bytes());
    hasher.update(&shard.to_le_bytes());
    hasher.finalize()
}
