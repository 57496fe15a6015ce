//! Key-value grid
//!
//! The engine persists everything through a narrow key-value surface modeled
//! on a partitioned data grid. Records live in four named regions, and every
//! key routes to a shard through [`Placement`]:
//!
//! ```text
//!   put/get(region, key)
//!         |
//!         v
//!   Placement::shard(key)      day-of-year % 366
//!         |
//!         v
//!   Placement::assign(shard)   rendezvous, host anti-affinity
//!         |
//!         v
//!   primary node (+ backups)
//! ```
//!
//! [`MemoryGrid`] is the in-process implementation used by the engine and its
//! tests. The trait is the seam for backing the index with an external grid.

mod memory;
mod placement;

pub use memory::MemoryGrid;
pub use placement::{GridNode, Placement};

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::keys::KeyError;

/// The four record families the engine stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Serialized partition bitmaps
    Bitmaps,
    /// Partition-group metadata, one record per (day, dimension, value)
    GroupMeta,
    /// Row span per ingestion window
    Windows,
    /// Window-key list per calendar day
    DayWindows,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Region::Bitmaps => "bitmaps",
            Region::GroupMeta => "group_meta",
            Region::Windows => "windows",
            Region::DayWindows => "day_windows",
        };
        write!(f, "{name}")
    }
}

/// Errors raised by grid operations
#[derive(Error, Debug)]
pub enum GridError {
    /// A named lock could not be acquired within the deadline. Retriable.
    #[error("lock on {key} timed out after {timeout_ms}ms")]
    LockTimeout { key: String, timeout_ms: u64 },

    /// The key could not be routed to a shard
    #[error("placement error: {0}")]
    Placement(#[from] KeyError),

    /// The backing store rejected the operation
    #[error("grid store error: {0}")]
    Store(String),
}

/// Result type alias for grid operations
pub type GridResult<T> = Result<T, GridError>;

/// Held side of a named grid lock. The lock releases when the lease drops.
pub struct LockLease {
    _held: Box<dyn std::any::Any + Send>,
}

impl LockLease {
    pub fn new(held: impl std::any::Any + Send) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

impl fmt::Debug for LockLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockLease")
    }
}

/// Byte-valued storage surface the index engine runs against
#[async_trait]
pub trait KeyValueGrid: Send + Sync {
    /// Read one record, `None` if absent.
    async fn get(&self, region: Region, key: &str) -> GridResult<Option<Vec<u8>>>;

    /// Write one record, replacing any previous value.
    async fn put(&self, region: Region, key: &str, value: Vec<u8>) -> GridResult<()>;

    /// Read a batch of records. Absent keys are left out of the result.
    async fn get_many(
        &self,
        region: Region,
        keys: &[String],
    ) -> GridResult<HashMap<String, Vec<u8>>>;

    /// Acquire the named lock for `key`, waiting at most `timeout`.
    async fn lock(&self, region: Region, key: &str, timeout: Duration) -> GridResult<LockLease>;

    /// Shard a key routes to.
    fn shard_of(&self, key: &str) -> GridResult<u32>;
}
