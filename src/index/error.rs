//! Error types for index operations

use thiserror::Error;

use crate::bitmap::BitmapError;
use crate::grid::GridError;
use crate::keys::KeyError;

/// Errors raised by the dimension and time-range indexes
#[derive(Error, Debug)]
pub enum IndexError {
    /// A key failed to build or parse. Indicates a caller bug or corrupt
    /// stored key; never retried.
    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    /// Stored bitmap bytes failed to decode. The backing record is unusable.
    #[error("corrupt bitmap: {0}")]
    CorruptBitmap(String),

    /// The delete lock was not acquired within its deadline. The operation
    /// was not applied and the caller may retry.
    #[error("delete lock on {key} timed out after {timeout_ms}ms")]
    LockTimeout { key: String, timeout_ms: u64 },

    /// One day of a query exceeded its deadline; the whole query is abandoned.
    #[error("query for day {day} timed out after {timeout_ms}ms")]
    QueryTimeout { day: i64, timeout_ms: u64 },

    /// Metadata or span records failed to serialize or deserialize
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing grid rejected an operation
    #[error("grid error: {0}")]
    Grid(String),

    /// A spawned day worker failed to complete
    #[error("day worker failed: {0}")]
    Worker(String),
}

impl From<BitmapError> for IndexError {
    fn from(err: BitmapError) -> Self {
        match err {
            BitmapError::Corrupt(msg) => IndexError::CorruptBitmap(msg),
            BitmapError::Encode(msg) => IndexError::Serialization(msg),
        }
    }
}

impl From<GridError> for IndexError {
    fn from(err: GridError) -> Self {
        match err {
            GridError::LockTimeout { key, timeout_ms } => {
                IndexError::LockTimeout { key, timeout_ms }
            }
            GridError::Placement(key_err) => IndexError::InvalidKey(key_err),
            other => IndexError::Grid(other.to_string()),
        }
    }
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::QueryTimeout {
            day: 1_709_596_800_000,
            timeout_ms: 100,
        };
        assert_eq!(
            err.to_string(),
            "query for day 1709596800000 timed out after 100ms"
        );
    }

    #[test]
    fn test_lock_timeout_conversion() {
        let grid_err = GridError::LockTimeout {
            key: "k".to_string(),
            timeout_ms: 200,
        };
        let err: IndexError = grid_err.into();
        assert!(matches!(err, IndexError::LockTimeout { timeout_ms: 200, .. }));
    }

    #[test]
    fn test_placement_conversion() {
        let grid_err = GridError::Placement(KeyError::InvalidKey("junk".to_string()));
        let err: IndexError = grid_err.into();
        assert!(matches!(err, IndexError::InvalidKey(_)));
    }

    #[test]
    fn test_corrupt_bitmap_conversion() {
        let err: IndexError = BitmapError::Corrupt("bad magic".to_string()).into();
        assert!(matches!(err, IndexError::CorruptBitmap(_)));
    }
}
