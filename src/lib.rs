//! # Prism
//!
//! Dimensional Bitmap Index Engine - maps dimension values observed on
//! ingested rows to compressed bitmaps of 64-bit row ids, sharded by
//! calendar day across a key-value grid.
//!
//! ## Features
//!
//! - **Compressed posting lists**: 64-bit roaring bitmaps, compacted on write
//! - **Partitioned groups**: hot dimension values split across size-bounded partitions
//! - **Day placement**: day-of-year sharding keeps a day's records on one node
//! - **Windowed time index**: per-day row spans clip query results
//! - **Soft deletes**: tombstone bitmaps subtracted at query time
//!
//! ## Modules
//!
//! - [`index`]: dimension and time-range indexes
//! - [`bitmap`]: bitmap codec and set operations
//! - [`grid`]: key-value grid trait, placement and the in-process grid
//! - [`page`]: pagination over by-day query results
//! - [`keys`]: persisted key grammar
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use prism::{
//!     bitmap, Config, DimensionFilter, DimensionIndex, Indexer, KeyValueGrid,
//!     MemoryGrid, RowSpan, TimeRange, TimeRangeIndex,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let grid: Arc<dyn KeyValueGrid> = Arc::new(MemoryGrid::new(&config.grid));
//!     let time_index = Arc::new(TimeRangeIndex::new(grid.clone()));
//!     let index = DimensionIndex::new(grid, time_index, config.index);
//!
//!     // Index rows observed for a dimension value
//!     let day = TimeRange::day(2024, 3, 5).unwrap().start;
//!     index.index(day, "status", "active", bitmap::of(&[1, 2, 3])).await?;
//!     index
//!         .add_time_index(TimeRange::new(day, day + 60_000), RowSpan::new(0, 10))
//!         .await?;
//!
//!     // Query a day range
//!     let rows = index
//!         .get_row_ids(
//!             TimeRange::day(2024, 3, 5).unwrap(),
//!             &[DimensionFilter::new("status", "active")],
//!         )
//!         .await?;
//!
//!     println!("Matched {} days", rows.len());
//!     Ok(())
//! }
//! ```

pub mod bitmap;
pub mod config;
pub mod grid;
pub mod index;
pub mod keys;
pub mod page;

// Re-export top-level types for convenience
pub use index::{
    group_by_dimension, DimensionFilter, DimensionIndex, Event, IndexError, IndexResult, Indexer,
    PartitionMeta, RowSpan, TimeRange, TimeRangeIndex,
};

pub use bitmap::{BitmapError, BitmapResult};

pub use grid::{
    GridError, GridNode, GridResult, KeyValueGrid, LockLease, MemoryGrid, Placement, Region,
};

pub use keys::{KeyError, KeyGrammar, KeyResult, ParsedKey, DAY_MS, TOMBSTONE_KEY, TOMBSTONE_VALUE};

pub use page::{select_page, PageError, PageRequest, PageResult, SortOrder, MAX_PAGE_SIZE};

pub use config::{Config, ConfigError, GridConfig, IndexConfig, LoggingConfig};

// The bitmap type the whole engine speaks
pub use roaring::RoaringTreemap;
