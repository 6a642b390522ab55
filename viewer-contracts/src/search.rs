use serde::Serialize;

use crate::files::ListingItem;

/// Response body for `GET /api/search`.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    /// Matching files, ordered by FTS rank then name.
    pub items: Vec<ListingItem>,
    /// Total matches across all pages.
    pub total_items: u64,
}
