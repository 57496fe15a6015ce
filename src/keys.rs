//! Persisted key grammar
//!
//! Every record the engine stores is addressed by a string key derived from a
//! UTC timestamp:
//!
//! - Partition bitmap: `d_<isoDayStart>_p_<dimKey>_v_<dimValue>_pn_<sequence>`
//! - Partition-group metadata: `d_<isoDayStart>_p_<dimKey>_v_<dimValue>`
//! - Time window: raw ISO window-start timestamp
//! - Per-day window list: ISO day-start timestamp
//!
//! The calendar day embedded in a key drives placement, so parsing must accept
//! all four forms. Dimension keys and values must not contain the `_p_`,
//! `_v_` or `_pn_` separators; the grammar does not escape them.

use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use thiserror::Error;

/// Reserved dimension key addressing a day's tombstone set.
pub const TOMBSTONE_KEY: &str = "$delete";

/// Reserved dimension value addressing a day's tombstone set.
pub const TOMBSTONE_VALUE: &str = "~set";

/// One UTC calendar day, in milliseconds.
pub const DAY_MS: i64 = 86_400_000;

const BITMAP_KEY_PATTERN: &str = r"^d_(?P<date>.+?)_p_(?P<dim>.+)_v_(?P<value>.+?)_pn_(?P<part>\d+)$";
const GROUP_KEY_PATTERN: &str = r"^d_(?P<date>.+?)_p_(?P<dim>.+)_v_(?P<value>.+)$";

/// Errors raised while building or parsing keys
#[derive(Error, Debug)]
pub enum KeyError {
    /// Key does not match any of the persisted key forms
    #[error("key does not match the index key grammar: {0}")]
    InvalidKey(String),

    /// Timestamp cannot be rendered as a calendar instant
    #[error("timestamp out of representable range: {0}")]
    InvalidTimestamp(i64),
}

/// Result type alias for key operations
pub type KeyResult<T> = Result<T, KeyError>;

/// Floor a timestamp to the start of its UTC calendar day.
pub fn day_start(timestamp_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(DAY_MS)
}

/// Render a timestamp as RFC 3339 UTC, `Z` suffix, subseconds only when
/// non-zero. This is the canonical form embedded in every key.
pub fn iso(timestamp_ms: i64) -> KeyResult<String> {
    let instant = datetime(timestamp_ms)?;
    Ok(instant.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Parse a canonical ISO timestamp back to epoch milliseconds.
pub fn parse_iso(value: &str) -> KeyResult<i64> {
    DateTime::parse_from_rfc3339(value)
        .map(|instant| instant.timestamp_millis())
        .map_err(|_| KeyError::InvalidKey(value.to_string()))
}

fn datetime(timestamp_ms: i64) -> KeyResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .ok_or(KeyError::InvalidTimestamp(timestamp_ms))
}

/// Build the key of one partition's bitmap bytes.
pub fn partition_key(
    day_ms: i64,
    dimension: &str,
    value: &str,
    partition: u32,
) -> KeyResult<String> {
    Ok(format!(
        "d_{}_p_{}_v_{}_pn_{}",
        iso(day_start(day_ms))?,
        dimension,
        value,
        partition
    ))
}

/// Build the key of a partition group's metadata record.
pub fn group_key(day_ms: i64, dimension: &str, value: &str) -> KeyResult<String> {
    Ok(format!(
        "d_{}_p_{}_v_{}",
        iso(day_start(day_ms))?,
        dimension,
        value
    ))
}

/// Build the key of a time window entry (the raw window-start instant).
pub fn window_key(window_start_ms: i64) -> KeyResult<String> {
    iso(window_start_ms)
}

/// Build the key of a calendar day's window list.
pub fn day_key(timestamp_ms: i64) -> KeyResult<String> {
    iso(day_start(timestamp_ms))
}

/// A structured key decoded back into its components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    /// Day start, epoch milliseconds UTC
    pub day: i64,
    /// Dimension key
    pub dimension: String,
    /// Dimension value
    pub value: String,
    /// Partition sequence; `None` for group metadata keys
    pub partition: Option<u32>,
}

/// Compiled parsers for the structured key forms
#[derive(Debug)]
pub struct KeyGrammar {
    bitmap: Regex,
    group: Regex,
}

impl KeyGrammar {
    pub fn new() -> Self {
        // Patterns are fixed literals; compilation cannot fail.
        Self {
            bitmap: Regex::new(BITMAP_KEY_PATTERN).expect("bitmap key pattern"),
            group: Regex::new(GROUP_KEY_PATTERN).expect("group key pattern"),
        }
    }

    /// Decode a structured (bitmap or group) key.
    pub fn parse(&self, key: &str) -> KeyResult<ParsedKey> {
        if let Some(caps) = self.bitmap.captures(key) {
            let partition: u32 = caps["part"]
                .parse()
                .map_err(|_| KeyError::InvalidKey(key.to_string()))?;
            return Ok(ParsedKey {
                day: day_start(parse_iso(&caps["date"])?),
                dimension: caps["dim"].to_string(),
                value: caps["value"].to_string(),
                partition: Some(partition),
            });
        }
        if let Some(caps) = self.group.captures(key) {
            return Ok(ParsedKey {
                day: day_start(parse_iso(&caps["date"])?),
                dimension: caps["dim"].to_string(),
                value: caps["value"].to_string(),
                partition: None,
            });
        }
        Err(KeyError::InvalidKey(key.to_string()))
    }

    /// Extract the calendar-day start from any persisted key form: structured
    /// keys carry the day in their `d_` segment, window and day-list keys are
    /// bare ISO timestamps.
    pub fn day_of(&self, key: &str) -> KeyResult<i64> {
        if let Some(caps) = self.bitmap.captures(key) {
            return Ok(day_start(parse_iso(&caps["date"])?));
        }
        if let Some(caps) = self.group.captures(key) {
            return Ok(day_start(parse_iso(&caps["date"])?));
        }
        Ok(day_start(parse_iso(key)?))
    }
}

impl Default for KeyGrammar {
    fn default() -> Self {
        Self::new()
    }
}

/// Day-of-year (1 to 366) of the calendar day containing a timestamp.
pub fn day_of_year(timestamp_ms: i64) -> KeyResult<u32> {
    Ok(datetime(timestamp_ms)?.ordinal())
}
