//! Dimension-to-bitmap index
//!
//! One bitmap per `(day, dimension key, dimension value)`, stored as a
//! partition group so a hot value never produces one oversized record.
//! Writes always land in the newest partition; when the merged bitmap would
//! exceed the configured size limit a fresh partition is appended and the
//! old tail is sealed. Deletes write the same way into a reserved tombstone
//! group and are subtracted at query time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roaring::RoaringTreemap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bitmap;
use crate::config::IndexConfig;
use crate::grid::{KeyValueGrid, Region};
use crate::keys::{self, TOMBSTONE_KEY, TOMBSTONE_VALUE};

use super::{
    group_by_dimension, DimensionFilter, Event, IndexError, IndexResult, Indexer, PartitionMeta,
    RowSpan, TimeRange, TimeRangeIndex,
};

/// Production implementation of [`Indexer`] over a key-value grid
#[derive(Clone)]
pub struct DimensionIndex {
    grid: Arc<dyn KeyValueGrid>,
    time_index: Arc<TimeRangeIndex>,
    config: IndexConfig,
}

impl DimensionIndex {
    pub fn new(
        grid: Arc<dyn KeyValueGrid>,
        time_index: Arc<TimeRangeIndex>,
        config: IndexConfig,
    ) -> Self {
        Self {
            grid,
            time_index,
            config,
        }
    }

    /// Index a batch of events in one call, one write per distinct dimension
    /// pair observed in the batch.
    pub async fn index_batch(&self, day: i64, events: &[Event]) -> IndexResult<()> {
        for (filter, rows) in group_by_dimension(events) {
            self.index(day, &filter.key, &filter.value, rows).await?;
        }
        Ok(())
    }

    /// Partition metadata recorded for `(day, dimension, value)`, ascending
    /// by sequence. Empty when the pair has never been indexed.
    pub async fn partition_group(
        &self,
        day: i64,
        dimension: &str,
        value: &str,
    ) -> IndexResult<Vec<PartitionMeta>> {
        let day = keys::day_start(day);
        let mut group = self
            .load_group(&keys::group_key(day, dimension, value)?)
            .await?;
        group.sort_by_key(|meta| meta.partition);
        Ok(group)
    }

    async fn load_group(&self, group_key: &str) -> IndexResult<Vec<PartitionMeta>> {
        match self.grid.get(Region::GroupMeta, group_key).await? {
            Some(raw) => Ok(bincode::deserialize(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Merge `rows` into the tail partition of the pair's group, appending a
    /// new partition first when the merged bitmap would outgrow the limit.
    async fn write_rows(
        &self,
        day: i64,
        dimension: &str,
        value: &str,
        mut rows: RoaringTreemap,
    ) -> IndexResult<()> {
        bitmap::compact(&mut rows);
        let incoming = bitmap::serialized_size(&rows);

        let group_key = keys::group_key(day, dimension, value)?;
        let mut group = self.load_group(&group_key).await?;
        group.sort_by_key(|meta| meta.partition);

        let mut tail = group.pop().unwrap_or_else(|| PartitionMeta::new(0));
        if incoming + tail.size_bytes > self.config.partition_max_bytes {
            info!(
                "group {group_key}: partition {} holds {} bytes, {} more would exceed {}; opening partition {}",
                tail.partition,
                tail.size_bytes,
                incoming,
                self.config.partition_max_bytes,
                tail.partition + 1
            );
            let next = tail.partition + 1;
            group.push(tail);
            tail = PartitionMeta::new(next);
        }

        let bitmap_key = keys::partition_key(day, dimension, value, tail.partition)?;
        let stored = self.grid.get(Region::Bitmaps, &bitmap_key).await?;
        let mut merged = bitmap::decode(stored.as_deref())?;
        merged |= &rows;
        let bytes = bitmap::encode(&mut merged)?;

        tail.size_bytes = bytes.len() as u64;
        tail.rows = match (merged.min(), merged.max()) {
            (Some(first), Some(last)) => Some(RowSpan::new(first, last + 1)),
            _ => None,
        };
        group.push(tail);

        // Metadata before bytes, with no transaction across the two records.
        // A failure in between leaves the tail listed with no bytes, which
        // reads back as empty.
        self.grid
            .put(Region::GroupMeta, &group_key, bincode::serialize(&group)?)
            .await?;
        self.grid.put(Region::Bitmaps, &bitmap_key, bytes).await?;
        debug!("indexed {} rows into {bitmap_key}", rows.len());
        Ok(())
    }

    /// Union of every partition bitmap for the pair. `None` when the pair
    /// has no partition group for the day.
    async fn filter_bitmap(
        &self,
        day: i64,
        dimension: &str,
        value: &str,
    ) -> IndexResult<Option<RoaringTreemap>> {
        let group = self
            .load_group(&keys::group_key(day, dimension, value)?)
            .await?;
        if group.is_empty() {
            return Ok(None);
        }
        let bitmap_keys = group
            .iter()
            .map(|meta| keys::partition_key(day, dimension, value, meta.partition))
            .collect::<Result<Vec<_>, _>>()?;
        let stored = self.grid.get_many(Region::Bitmaps, &bitmap_keys).await?;

        let mut merged = RoaringTreemap::new();
        for key in &bitmap_keys {
            // a partition listed in metadata with no bytes reads as empty
            let part = bitmap::decode(stored.get(key).map(Vec::as_slice))?;
            merged |= &part;
        }
        Ok(Some(merged))
    }

    async fn delete_set(&self, day: i64) -> IndexResult<RoaringTreemap> {
        Ok(self
            .filter_bitmap(day, TOMBSTONE_KEY, TOMBSTONE_VALUE)
            .await?
            .unwrap_or_else(RoaringTreemap::new))
    }

    /// Resolve one day of a query. `Ok(None)` means the day cannot match and
    /// is left out of the result; `Ok(Some)` carries the day's row ids, which
    /// may be empty.
    async fn day_row_ids(
        &self,
        day: i64,
        filters: &[DimensionFilter],
        span: Option<RowSpan>,
    ) -> IndexResult<Option<Vec<u64>>> {
        if filters.is_empty() {
            let Some(span) = span else {
                return Ok(Some(Vec::new()));
            };
            let deleted = self.delete_set(day).await?;
            let rows = (span.start..span.end)
                .filter(|row| !deleted.contains(*row))
                .collect();
            return Ok(Some(rows));
        }

        let mut matched: Option<RoaringTreemap> = None;
        for filter in filters {
            match self.filter_bitmap(day, &filter.key, &filter.value).await? {
                Some(rows) => {
                    matched = Some(match matched {
                        Some(acc) => acc & &rows,
                        None => rows,
                    });
                }
                None => {
                    debug!(
                        "day {day} has no bitmaps for {}={}, skipping day",
                        filter.key, filter.value
                    );
                    return Ok(None);
                }
            }
        }
        let Some(matched) = matched else {
            return Ok(None);
        };

        let deleted = self.delete_set(day).await?;
        let matched = matched - &deleted;
        let rows = match span {
            Some(span) => matched.iter().filter(|row| span.contains(*row)).collect(),
            None => Vec::new(),
        };
        Ok(Some(rows))
    }

    async fn query(
        &self,
        range: TimeRange,
        filters: &[DimensionFilter],
    ) -> IndexResult<BTreeMap<i64, Vec<u64>>> {
        let query_id = Uuid::new_v4();
        let days = range.days();
        debug!(
            "query {query_id}: {} days, {} filters",
            days.len(),
            filters.len()
        );
        let spans = self.time_index.day_spans(range).await?;

        let mut workers = Vec::with_capacity(days.len());
        for day in days {
            let index = self.clone();
            let filters = filters.to_vec();
            let span = spans.get(&day).copied();
            workers.push((
                day,
                tokio::spawn(async move { index.day_row_ids(day, &filters, span).await }),
            ));
        }

        // Await days in order, each under its own deadline. The first
        // failure abandons the whole query and aborts the rest.
        let deadline = Duration::from_millis(self.config.day_query_timeout_ms);
        let mut rows = BTreeMap::new();
        let mut failure: Option<IndexError> = None;
        let mut pending = workers.into_iter();
        for (day, mut worker) in pending.by_ref() {
            match tokio::time::timeout(deadline, &mut worker).await {
                Err(_) => {
                    worker.abort();
                    failure = Some(IndexError::QueryTimeout {
                        day,
                        timeout_ms: self.config.day_query_timeout_ms,
                    });
                    break;
                }
                Ok(Err(join_err)) => {
                    failure = Some(IndexError::Worker(join_err.to_string()));
                    break;
                }
                Ok(Ok(Err(err))) => {
                    failure = Some(err);
                    break;
                }
                Ok(Ok(Ok(None))) => {}
                Ok(Ok(Ok(Some(day_rows)))) => {
                    rows.insert(day, day_rows);
                }
            }
        }
        if let Some(err) = failure {
            for (_, worker) in pending {
                worker.abort();
            }
            warn!("query {query_id} abandoned: {err}");
            return Err(err);
        }
        debug!("query {query_id}: {} days matched", rows.len());
        Ok(rows)
    }
}

#[async_trait]
impl Indexer for DimensionIndex {
    async fn index(
        &self,
        day: i64,
        dimension: &str,
        value: &str,
        rows: RoaringTreemap,
    ) -> IndexResult<()> {
        self.write_rows(keys::day_start(day), dimension, value, rows)
            .await
    }

    async fn delete_rows(&self, day: i64, rows: RoaringTreemap) -> IndexResult<()> {
        let day = keys::day_start(day);
        let lock_key = keys::group_key(day, TOMBSTONE_KEY, TOMBSTONE_VALUE)?;
        let deadline = Duration::from_millis(self.config.delete_lock_timeout_ms);
        let _lease = self
            .grid
            .lock(Region::GroupMeta, &lock_key, deadline)
            .await
            .map_err(|err| {
                warn!("delete for day {day} not applied: {err}");
                err
            })?;
        self.write_rows(day, TOMBSTONE_KEY, TOMBSTONE_VALUE, rows)
            .await
    }

    async fn add_time_index(&self, window: TimeRange, rows: RowSpan) -> IndexResult<()> {
        self.time_index.store_rows_in_window(window, rows).await
    }

    async fn get_row_ids(
        &self,
        range: TimeRange,
        filters: &[DimensionFilter],
    ) -> IndexResult<BTreeMap<i64, Vec<u64>>> {
        self.query(range, filters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::grid::{GridResult, LockLease, MemoryGrid};
    use crate::keys::DAY_MS;
    use std::collections::HashMap;

    const MAR_5_2024: i64 = 1_709_596_800_000;

    fn engine() -> (DimensionIndex, Arc<dyn KeyValueGrid>) {
        engine_with(IndexConfig::default())
    }

    fn engine_with(config: IndexConfig) -> (DimensionIndex, Arc<dyn KeyValueGrid>) {
        let grid: Arc<dyn KeyValueGrid> = Arc::new(MemoryGrid::new(&GridConfig::default()));
        let time_index = Arc::new(TimeRangeIndex::new(grid.clone()));
        (DimensionIndex::new(grid.clone(), time_index, config), grid)
    }

    fn full_day(day: i64) -> TimeRange {
        TimeRange::new(day, day + DAY_MS)
    }

    async fn span_of(index: &DimensionIndex, day: i64, span: RowSpan) {
        index
            .add_time_index(TimeRange::new(day, day + 60_000), span)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_index_then_query_round_trip() {
        let (index, _) = engine();
        let rows: Vec<u64> = (0..1_000).collect();
        index
            .index(MAR_5_2024, "status", "active", bitmap::of(&rows))
            .await
            .unwrap();
        span_of(&index, MAR_5_2024, RowSpan::new(0, 1_000)).await;

        let matched = index
            .get_row_ids(full_day(MAR_5_2024), &[DimensionFilter::new("status", "active")])
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[&MAR_5_2024], rows);
    }

    #[tokio::test]
    async fn test_filters_intersect() {
        let (index, _) = engine();
        index
            .index(MAR_5_2024, "status", "active", bitmap::of(&[1, 2, 3, 4]))
            .await
            .unwrap();
        index
            .index(MAR_5_2024, "region", "eu", bitmap::of(&[3, 4, 5]))
            .await
            .unwrap();
        span_of(&index, MAR_5_2024, RowSpan::new(0, 10)).await;

        let matched = index
            .get_row_ids(
                full_day(MAR_5_2024),
                &[
                    DimensionFilter::new("status", "active"),
                    DimensionFilter::new("region", "eu"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(matched[&MAR_5_2024], vec![3, 4]);
    }

    #[tokio::test]
    async fn test_rows_outside_day_span_clipped() {
        let (index, _) = engine();
        index
            .index(MAR_5_2024, "status", "active", bitmap::of(&[1, 5, 50]))
            .await
            .unwrap();
        span_of(&index, MAR_5_2024, RowSpan::new(0, 10)).await;

        let matched = index
            .get_row_ids(full_day(MAR_5_2024), &[DimensionFilter::new("status", "active")])
            .await
            .unwrap();
        assert_eq!(matched[&MAR_5_2024], vec![1, 5]);
    }

    #[tokio::test]
    async fn test_day_without_span_yields_empty_entry() {
        let (index, _) = engine();
        index
            .index(MAR_5_2024, "status", "active", bitmap::of(&[1, 2]))
            .await
            .unwrap();

        let matched = index
            .get_row_ids(full_day(MAR_5_2024), &[DimensionFilter::new("status", "active")])
            .await
            .unwrap();
        assert_eq!(matched[&MAR_5_2024], Vec::<u64>::new());
    }

    #[tokio::test]
    async fn test_day_missing_a_filter_is_skipped() {
        let (index, _) = engine();
        let day_two = MAR_5_2024 + DAY_MS;
        index
            .index(MAR_5_2024, "status", "active", bitmap::of(&[1]))
            .await
            .unwrap();
        index
            .index(MAR_5_2024, "region", "eu", bitmap::of(&[1]))
            .await
            .unwrap();
        index
            .index(day_two, "status", "active", bitmap::of(&[100]))
            .await
            .unwrap();
        span_of(&index, MAR_5_2024, RowSpan::new(0, 10)).await;
        span_of(&index, day_two, RowSpan::new(100, 110)).await;

        let matched = index
            .get_row_ids(
                TimeRange::new(MAR_5_2024, day_two + DAY_MS),
                &[
                    DimensionFilter::new("status", "active"),
                    DimensionFilter::new("region", "eu"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[&MAR_5_2024], vec![1]);
    }

    #[tokio::test]
    async fn test_deleted_rows_excluded_but_retained() {
        let (index, grid) = engine();
        index
            .index(MAR_5_2024, "status", "active", bitmap::of(&[1, 2, 3]))
            .await
            .unwrap();
        span_of(&index, MAR_5_2024, RowSpan::new(0, 10)).await;
        index
            .delete_rows(MAR_5_2024, bitmap::of(&[2]))
            .await
            .unwrap();

        let matched = index
            .get_row_ids(full_day(MAR_5_2024), &[DimensionFilter::new("status", "active")])
            .await
            .unwrap();
        assert_eq!(matched[&MAR_5_2024], vec![1, 3]);

        // the dimension bitmap itself still holds the deleted row
        let key = keys::partition_key(MAR_5_2024, "status", "active", 0).unwrap();
        let raw = grid.get(Region::Bitmaps, &key).await.unwrap();
        let stored = bitmap::decode(raw.as_deref()).unwrap();
        assert!(stored.contains(2));
    }

    #[tokio::test]
    async fn test_empty_filters_return_span_minus_deleted() {
        let (index, _) = engine();
        span_of(&index, MAR_5_2024, RowSpan::new(5, 15)).await;
        index
            .delete_rows(MAR_5_2024, bitmap::of(&[7]))
            .await
            .unwrap();

        let matched = index
            .get_row_ids(full_day(MAR_5_2024), &[])
            .await
            .unwrap();
        let expected: Vec<u64> = (5..15).filter(|row| *row != 7).collect();
        assert_eq!(matched[&MAR_5_2024], expected);
    }

    #[tokio::test]
    async fn test_partition_split_preserves_sealed_bytes() {
        let (index, grid) = engine_with(IndexConfig {
            partition_max_bytes: 1,
            ..IndexConfig::default()
        });
        let first: Vec<u64> = (0..100).collect();
        let second: Vec<u64> = (200..300).collect();
        index
            .index(MAR_5_2024, "status", "active", bitmap::of(&first))
            .await
            .unwrap();

        let sealed_key = keys::partition_key(MAR_5_2024, "status", "active", 1).unwrap();
        let sealed_before = grid.get(Region::Bitmaps, &sealed_key).await.unwrap();

        index
            .index(MAR_5_2024, "status", "active", bitmap::of(&second))
            .await
            .unwrap();

        let group = index
            .partition_group(MAR_5_2024, "status", "active")
            .await
            .unwrap();
        assert_eq!(group.len(), 3);
        assert_eq!(
            group.iter().map(|meta| meta.partition).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        // sealed partition bytes did not change when the group grew
        let sealed_after = grid.get(Region::Bitmaps, &sealed_key).await.unwrap();
        assert_eq!(sealed_before, sealed_after);

        span_of(&index, MAR_5_2024, RowSpan::new(0, 300)).await;
        let matched = index
            .get_row_ids(full_day(MAR_5_2024), &[DimensionFilter::new("status", "active")])
            .await
            .unwrap();
        let expected: Vec<u64> = first.iter().chain(second.iter()).copied().collect();
        assert_eq!(matched[&MAR_5_2024], expected);
    }

    #[tokio::test]
    async fn test_tail_metadata_tracks_size_and_bounds() {
        let (index, grid) = engine();
        index
            .index(MAR_5_2024, "status", "active", bitmap::of(&[10, 20]))
            .await
            .unwrap();

        let group = index
            .partition_group(MAR_5_2024, "status", "active")
            .await
            .unwrap();
        assert_eq!(group.len(), 1);
        let tail = &group[0];
        assert_eq!(tail.rows, Some(RowSpan::new(10, 21)));

        let key = keys::partition_key(MAR_5_2024, "status", "active", 0).unwrap();
        let raw = grid.get(Region::Bitmaps, &key).await.unwrap().unwrap();
        assert_eq!(tail.size_bytes, raw.len() as u64);
    }

    #[tokio::test]
    async fn test_multi_day_results_group_by_day() {
        let (index, _) = engine();
        let day_two = MAR_5_2024 + DAY_MS;
        index
            .index(MAR_5_2024, "status", "active", bitmap::of(&[1, 2]))
            .await
            .unwrap();
        index
            .index(day_two, "status", "active", bitmap::of(&[100, 101]))
            .await
            .unwrap();
        span_of(&index, MAR_5_2024, RowSpan::new(0, 10)).await;
        span_of(&index, day_two, RowSpan::new(100, 110)).await;

        let matched = index
            .get_row_ids(
                TimeRange::new(MAR_5_2024, day_two + DAY_MS),
                &[DimensionFilter::new("status", "active")],
            )
            .await
            .unwrap();
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[&MAR_5_2024], vec![1, 2]);
        assert_eq!(matched[&day_two], vec![100, 101]);
    }

    #[tokio::test]
    async fn test_index_row_shorthand() {
        let (index, _) = engine();
        index
            .index_row(MAR_5_2024, "status", "active", 42)
            .await
            .unwrap();
        span_of(&index, MAR_5_2024, RowSpan::new(0, 100)).await;

        let matched = index
            .get_row_ids(full_day(MAR_5_2024), &[DimensionFilter::new("status", "active")])
            .await
            .unwrap();
        assert_eq!(matched[&MAR_5_2024], vec![42]);
    }

    #[tokio::test]
    async fn test_index_batch_groups_events() {
        let (index, _) = engine();
        let events = vec![
            Event::new(1).dimension("status", "ok"),
            Event::new(2).dimension("status", "ok"),
            Event::new(3).dimension("status", "error"),
        ];
        index.index_batch(MAR_5_2024, &events).await.unwrap();
        span_of(&index, MAR_5_2024, RowSpan::new(0, 10)).await;

        let matched = index
            .get_row_ids(full_day(MAR_5_2024), &[DimensionFilter::new("status", "ok")])
            .await
            .unwrap();
        assert_eq!(matched[&MAR_5_2024], vec![1, 2]);
    }

    #[tokio::test]
    async fn test_delete_lock_contention_times_out() {
        let (index, grid) = engine_with(IndexConfig {
            delete_lock_timeout_ms: 50,
            ..IndexConfig::default()
        });
        let lock_key = keys::group_key(MAR_5_2024, TOMBSTONE_KEY, TOMBSTONE_VALUE).unwrap();
        let lease = grid
            .lock(Region::GroupMeta, &lock_key, Duration::from_secs(1))
            .await
            .unwrap();

        let result = index.delete_rows(MAR_5_2024, bitmap::of(&[1])).await;
        assert!(matches!(result, Err(IndexError::LockTimeout { .. })));
        drop(lease);

        // retriable: succeeds once the lock is free
        index
            .delete_rows(MAR_5_2024, bitmap::of(&[1]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_partition_bytes_fail_query() {
        let (index, grid) = engine();
        index
            .index(MAR_5_2024, "status", "active", bitmap::of(&[1, 2]))
            .await
            .unwrap();
        span_of(&index, MAR_5_2024, RowSpan::new(0, 10)).await;

        // clobber the stored partition behind the metadata's back
        let key = keys::partition_key(MAR_5_2024, "status", "active", 0).unwrap();
        grid.put(Region::Bitmaps, &key, vec![0xde, 0xad, 0xbe, 0xef])
            .await
            .unwrap();

        let result = index
            .get_row_ids(full_day(MAR_5_2024), &[DimensionFilter::new("status", "active")])
            .await;
        assert!(matches!(result, Err(IndexError::CorruptBitmap(_))));
    }

    /// Grid that stalls every read, for exercising the per-day deadline.
    struct SlowGrid {
        inner: MemoryGrid,
        delay: Duration,
    }

    #[async_trait]
    impl KeyValueGrid for SlowGrid {
        async fn get(&self, region: Region, key: &str) -> GridResult<Option<Vec<u8>>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(region, key).await
        }

        async fn put(&self, region: Region, key: &str, value: Vec<u8>) -> GridResult<()> {
            self.inner.put(region, key, value).await
        }

        async fn get_many(
            &self,
            region: Region,
            keys: &[String],
        ) -> GridResult<HashMap<String, Vec<u8>>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_many(region, keys).await
        }

        async fn lock(
            &self,
            region: Region,
            key: &str,
            timeout: Duration,
        ) -> GridResult<LockLease> {
            self.inner.lock(region, key, timeout).await
        }

        fn shard_of(&self, key: &str) -> GridResult<u32> {
            self.inner.shard_of(key)
        }
    }

    #[tokio::test]
    async fn test_slow_day_times_out_whole_query() {
        let grid: Arc<dyn KeyValueGrid> = Arc::new(SlowGrid {
            inner: MemoryGrid::new(&GridConfig::default()),
            delay: Duration::from_millis(50),
        });
        let time_index = Arc::new(TimeRangeIndex::new(grid.clone()));
        let index = DimensionIndex::new(
            grid,
            time_index,
            IndexConfig {
                day_query_timeout_ms: 10,
                ..IndexConfig::default()
            },
        );

        let result = index
            .get_row_ids(full_day(MAR_5_2024), &[DimensionFilter::new("status", "active")])
            .await;
        assert!(matches!(result, Err(IndexError::QueryTimeout { .. })));
    }
}
