//! Query result pagination
//!
//! Flattens a by-day query result into one global ordering (day first, then
//! row id, both in the requested direction) and returns the slice for a
//! 1-based page. Days whose rows fall entirely on earlier pages are dropped
//! from the page, so every returned day carries at least one row.

use std::collections::BTreeMap;

use thiserror::Error;

/// Largest allowed page, in rows
pub const MAX_PAGE_SIZE: usize = 500;

/// Traversal direction for days and rows within days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// One requested page of a query result
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Page number, 1-based
    pub page_num: usize,
    /// Rows per page, at most [`MAX_PAGE_SIZE`]
    pub page_size: usize,
    /// Day and row traversal direction
    pub order: SortOrder,
}

impl PageRequest {
    pub fn new(page_num: usize, page_size: usize) -> Self {
        Self {
            page_num,
            page_size,
            order: SortOrder::Ascending,
        }
    }

    /// Switch to newest-first traversal (builder style).
    pub fn descending(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    fn offset(&self) -> usize {
        // a clamped offset is past the total, which selects an empty page
        (self.page_num - 1).saturating_mul(self.page_size)
    }
}

/// Errors raised for unsatisfiable page requests
#[derive(Error, Debug)]
pub enum PageError {
    #[error("invalid page request: {0}")]
    InvalidPageRequest(String),
}

/// Result type alias for pagination
pub type PageResult<T> = Result<T, PageError>;

/// Select one page from a by-day result. Days are visited in `order`, each
/// day's rows are sorted in the same direction, and the global offset is
/// spliced across day boundaries. An offset at or past the total row count
/// yields an empty page.
pub fn select_page(
    rows: &BTreeMap<i64, Vec<u64>>,
    request: &PageRequest,
) -> PageResult<Vec<(i64, Vec<u64>)>> {
    if request.page_size > MAX_PAGE_SIZE {
        return Err(PageError::InvalidPageRequest(format!(
            "page size {} exceeds maximum {MAX_PAGE_SIZE}",
            request.page_size
        )));
    }
    if request.page_size < 1 {
        return Err(PageError::InvalidPageRequest(
            "page size must be at least 1".to_string(),
        ));
    }
    if request.page_num < 1 {
        return Err(PageError::InvalidPageRequest(
            "page number must be at least 1".to_string(),
        ));
    }

    let total: usize = rows.values().map(Vec::len).sum();
    let mut offset = request.offset();
    if offset >= total {
        return Ok(Vec::new());
    }

    let days: Vec<i64> = match request.order {
        SortOrder::Ascending => rows.keys().copied().collect(),
        SortOrder::Descending => rows.keys().rev().copied().collect(),
    };

    let mut page = Vec::new();
    let mut remaining = request.page_size;
    for day in days {
        if remaining == 0 {
            break;
        }
        let Some(day_rows) = rows.get(&day) else {
            continue;
        };
        if offset >= day_rows.len() {
            offset -= day_rows.len();
            continue;
        }

        let mut sorted = day_rows.clone();
        sorted.sort_unstable();
        let take = remaining.min(sorted.len() - offset);
        let slice: Vec<u64> = match request.order {
            SortOrder::Ascending => sorted[offset..offset + take].to_vec(),
            SortOrder::Descending => sorted.iter().rev().skip(offset).take(take).copied().collect(),
        };
        page.push((day, slice));
        remaining -= take;
        offset = 0;
    }
    Ok(page)
}
