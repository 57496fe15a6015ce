//! Dimensional index engine
//!
//! Maps `(day, dimension key, dimension value)` to compressed sets of 64-bit
//! row ids, and time windows to the row spans they produced. Queries combine
//! the two:
//!
//! ```text
//!   get_row_ids(range, filters)
//!         |
//!         +--> TimeRangeIndex::day_spans     row bounds per day
//!         |
//!         +--> per-day worker (one task per calendar day)
//!                 union partitions per filter
//!                 intersect across filters
//!                 subtract tombstones
//!                 clip to the day's span
//! ```
//!
//! Bitmaps for one `(day, dimension, value)` are stored as a partition group:
//! a metadata record listing partitions plus one bitmap record per partition.
//! Only the newest partition accepts writes; older ones are sealed.

mod dimension;
mod error;
mod time_range;

pub use dimension::DimensionIndex;
pub use error::{IndexError, IndexResult};
pub use time_range::TimeRangeIndex;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};

use crate::bitmap;
use crate::keys::{self, DAY_MS};

/// A half-open time range `[start, end)` in epoch milliseconds UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: i64,
    /// End timestamp (exclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range. Panics if `start >= end`.
    pub fn new(start: i64, end: i64) -> Self {
        assert!(start < end, "start must be before end");
        Self { start, end }
    }

    /// Create a time range, returning `None` if invalid.
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Range covering the last `hours` hours from now.
    pub fn last_hours(hours: i64) -> Self {
        let now = Utc::now().timestamp_millis();
        Self::new(now - hours * 3_600_000, now)
    }

    /// Range covering the last `days` days from now.
    pub fn last_days(days: i64) -> Self {
        let now = Utc::now().timestamp_millis();
        Self::new(now - days * DAY_MS, now)
    }

    /// Range covering one UTC calendar day.
    pub fn day(year: i32, month: u32, day: u32) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let start = Utc
            .from_utc_datetime(&date.and_hms_opt(0, 0, 0)?)
            .timestamp_millis();
        Some(Self::new(start, start + DAY_MS))
    }

    /// Check if a timestamp falls within this range.
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Start of every UTC calendar day the range touches, ascending.
    pub fn days(&self) -> Vec<i64> {
        let mut days = Vec::new();
        let mut day = keys::day_start(self.start);
        while day < self.end {
            days.push(day);
            day += DAY_MS;
        }
        days
    }
}

/// Half-open span of row ids `[start, end)` produced by an ingestion window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSpan {
    /// First row id (inclusive)
    pub start: u64,
    /// One past the last row id (exclusive)
    pub end: u64,
}

impl RowSpan {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, row: u64) -> bool {
        row >= self.start && row < self.end
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Attributes of one partition in a partition group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMeta {
    /// Position in the group, 0-based. The highest sequence is the only
    /// partition that accepts writes.
    pub partition: u32,
    /// Serialized size of the partition's bitmap, in bytes
    pub size_bytes: u64,
    /// Observed row-id bounds of the partition's contents, if any
    pub rows: Option<RowSpan>,
}

impl PartitionMeta {
    pub fn new(partition: u32) -> Self {
        Self {
            partition,
            size_bytes: 0,
            rows: None,
        }
    }
}

/// One dimension predicate of a query: `key == value`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimensionFilter {
    pub key: String,
    pub value: String,
}

impl DimensionFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One ingested record as the index sees it: a row id plus the dimension
/// values observed on it
#[derive(Debug, Clone)]
pub struct Event {
    /// Row id within the owning day
    pub row: u64,
    /// Dimension key-value pairs
    pub dimensions: HashMap<String, String>,
}

impl Event {
    pub fn new(row: u64) -> Self {
        Self {
            row,
            dimensions: HashMap::new(),
        }
    }

    /// Add a dimension (builder style).
    pub fn dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }
}

/// Group a batch of events into one bitmap per distinct dimension pair.
pub fn group_by_dimension(events: &[Event]) -> HashMap<DimensionFilter, RoaringTreemap> {
    let mut groups: HashMap<DimensionFilter, RoaringTreemap> = HashMap::new();
    for event in events {
        for (key, value) in &event.dimensions {
            groups
                .entry(DimensionFilter::new(key.clone(), value.clone()))
                .or_default()
                .insert(event.row);
        }
    }
    groups
}

/// Write and query surface of the dimensional index
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Merge `rows` into the bitmap for `(day, dimension, value)`. The day is
    /// normalized to its UTC day start.
    async fn index(
        &self,
        day: i64,
        dimension: &str,
        value: &str,
        rows: RoaringTreemap,
    ) -> IndexResult<()>;

    /// Index a single row.
    async fn index_row(&self, day: i64, dimension: &str, value: &str, row: u64) -> IndexResult<()> {
        self.index(day, dimension, value, bitmap::of(&[row])).await
    }

    /// Mark rows of a day as deleted. Deleted rows are excluded from query
    /// results but stay in their dimension bitmaps.
    async fn delete_rows(&self, day: i64, rows: RoaringTreemap) -> IndexResult<()>;

    /// Record the row span an ingestion window produced.
    async fn add_time_index(&self, window: TimeRange, rows: RowSpan) -> IndexResult<()>;

    /// Row ids matching every filter, grouped by day start. Days that cannot
    /// satisfy a filter are left out of the result.
    async fn get_row_ids(
        &self,
        range: TimeRange,
        filters: &[DimensionFilter],
    ) -> IndexResult<BTreeMap<i64, Vec<u64>>>;
}
