//! Bitmap codec
//!
//! Serialization boundary between 64-bit roaring bitmaps and the byte values
//! persisted in the grid. Encoding always compacts the bitmap's internal
//! representation first, so stored bytes are as small as the format allows
//! and the reported size is the size that will actually be persisted.

use roaring::RoaringTreemap;
use thiserror::Error;

/// Errors raised by the bitmap codec
#[derive(Error, Debug)]
pub enum BitmapError {
    /// Stored bytes do not decode as a roaring bitmap. The backing record is
    /// unusable and the error is not retriable.
    #[error("corrupt bitmap payload: {0}")]
    Corrupt(String),

    /// Bitmap could not be serialized
    #[error("bitmap encode failed: {0}")]
    Encode(String),
}

/// Result type alias for codec operations
pub type BitmapResult<T> = Result<T, BitmapError>;

/// Build a bitmap from a slice of row ids.
pub fn of(rows: &[u64]) -> RoaringTreemap {
    let mut set = RoaringTreemap::new();
    for row in rows {
        set.insert(*row);
    }
    set
}

/// Compact a bitmap's internal container representation. Contents are
/// unchanged; only the encoding (and therefore the serialized size) may
/// shrink.
pub fn compact(set: &mut RoaringTreemap) {
    set.optimize();
}

/// Compact, then serialize. The bitmap is mutated in place so that the
/// caller's copy reflects the representation that was written.
pub fn encode(set: &mut RoaringTreemap) -> BitmapResult<Vec<u8>> {
    compact(set);
    let mut buf = Vec::with_capacity(set.serialized_size());
    set.serialize_into(&mut buf)
        .map_err(|err| BitmapError::Encode(err.to_string()))?;
    Ok(buf)
}

/// Serialized size of a bitmap in its current representation, in bytes.
pub fn serialized_size(set: &RoaringTreemap) -> u64 {
    set.serialized_size() as u64
}

/// Decode stored bytes back into a bitmap. An absent value decodes to the
/// empty bitmap, which makes a missing partition record indistinguishable
/// from an empty one on the read path.
pub fn decode(bytes: Option<&[u8]>) -> BitmapResult<RoaringTreemap> {
    match bytes {
        Some(raw) => RoaringTreemap::deserialize_from(raw)
            .map_err(|err| BitmapError::Corrupt(err.to_string())),
        None => Ok(RoaringTreemap::new()),
    }
}

/// Union of two bitmaps, leaving both inputs untouched.
pub fn union(a: &RoaringTreemap, b: &RoaringTreemap) -> RoaringTreemap {
    a.clone() | b
}

/// Intersection of two bitmaps, leaving both inputs untouched.
pub fn intersect(a: &RoaringTreemap, b: &RoaringTreemap) -> RoaringTreemap {
    a.clone() & b
}

/// Rows in `a` that are not in `b`, leaving both inputs untouched.
pub fn difference(a: &RoaringTreemap, b: &RoaringTreemap) -> RoaringTreemap {
    a.clone() - b
}
