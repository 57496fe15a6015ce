//! Window-to-row-span index
//!
//! Ingestion happens in windows; each window produces a contiguous span of
//! row ids. This index records the span per window and, per calendar day,
//! the list of windows that touched the day. Queries collapse a day's
//! windows into one span from the earliest window's first row to the latest
//! window's last row.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::grid::{KeyValueGrid, Region};
use crate::keys;

use super::{IndexResult, RowSpan, TimeRange};

pub struct TimeRangeIndex {
    grid: Arc<dyn KeyValueGrid>,
}

impl TimeRangeIndex {
    pub fn new(grid: Arc<dyn KeyValueGrid>) -> Self {
        Self { grid }
    }

    /// Record the row span produced by one ingestion window. Only the
    /// window's start identifies it; re-storing the same window overwrites
    /// the span and leaves the day's window list unchanged.
    ///
    /// The span and the day list are written without a transaction, so a
    /// failure between the two writes can leave a window entry that no day
    /// lists. Such entries are unreachable and harmless.
    pub async fn store_rows_in_window(&self, window: TimeRange, rows: RowSpan) -> IndexResult<()> {
        let window_key = keys::window_key(window.start)?;
        self.grid
            .put(Region::Windows, &window_key, bincode::serialize(&rows)?)
            .await?;

        let day_key = keys::day_key(window.start)?;
        let mut listed: Vec<String> = match self.grid.get(Region::DayWindows, &day_key).await? {
            Some(raw) => bincode::deserialize(&raw)?,
            None => Vec::new(),
        };
        if !listed.contains(&window_key) {
            listed.push(window_key.clone());
            self.grid
                .put(Region::DayWindows, &day_key, bincode::serialize(&listed)?)
                .await?;
        }
        debug!(
            "stored window {window_key}: rows [{}, {})",
            rows.start, rows.end
        );
        Ok(())
    }

    /// Row span per calendar day for every window starting inside `range`.
    /// A day's span runs from its earliest window's first row to its latest
    /// window's last row. Days with no matching windows are omitted with a
    /// warning; callers treat them as having no rows.
    pub async fn day_spans(&self, range: TimeRange) -> IndexResult<HashMap<i64, RowSpan>> {
        let days = range.days();
        let day_keys = days
            .iter()
            .map(|day| keys::day_key(*day))
            .collect::<Result<Vec<_>, _>>()?;
        let lists = self.grid.get_many(Region::DayWindows, &day_keys).await?;

        // bucket window keys by day, keeping their start timestamps for ordering
        let mut buckets: BTreeMap<i64, Vec<(i64, String)>> = BTreeMap::new();
        let mut window_keys = Vec::new();
        for raw in lists.values() {
            let listed: Vec<String> = bincode::deserialize(raw)?;
            for window_key in listed {
                let start = keys::parse_iso(&window_key)?;
                if range.contains(start) {
                    buckets
                        .entry(keys::day_start(start))
                        .or_default()
                        .push((start, window_key.clone()));
                    window_keys.push(window_key);
                }
            }
        }
        let stored = self.grid.get_many(Region::Windows, &window_keys).await?;

        let mut spans = HashMap::new();
        for (day, mut windows) in buckets {
            windows.sort_by_key(|(start, _)| *start);
            let first_key = &windows[0].1;
            let last_key = &windows[windows.len() - 1].1;
            match (stored.get(first_key), stored.get(last_key)) {
                (Some(first_raw), Some(last_raw)) => {
                    let first: RowSpan = bincode::deserialize(first_raw)?;
                    let last: RowSpan = bincode::deserialize(last_raw)?;
                    spans.insert(day, RowSpan::new(first.start, last.end));
                }
                _ => warn!("window entries missing for day {day}; omitting its row span"),
            }
        }
        for day in &days {
            if !spans.contains_key(day) {
                warn!("no ingestion windows for day {day} in requested range");
            }
        }
        Ok(spans)
    }
}
