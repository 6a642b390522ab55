//! `GET /api/search` — free text, `tag:`, `-tag:`, and `NOT tag:` terms,
//! parsed by [`viewer_core::store::search::parse`] and executed by
//! [`viewer_core::store::CatalogueStore::search`].

use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;

use viewer_contracts::files::ListingItem;
use viewer_contracts::search::SearchResponse;
use viewer_model::{Page, TypeFilter};

use crate::errors::AppResult;
use crate::routes::files::{resolve_page, resolve_type_filter, MediaKindQuery};
use crate::state::AppState;

/// Query parameters for `/api/search`.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
    #[serde(rename = "type")]
    type_filter: Option<MediaKindQuery>,
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

/// `GET /api/search?q=…` — e.g. `q=sunset tag:vacation -tag:duplicate`
/// matches free text against indexed filenames while narrowing by tags.
pub async fn search(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<SearchResponse>> {
    let type_filter: TypeFilter = resolve_type_filter(q.type_filter);
    let page: Page = resolve_page(q.page, q.page_size);

    let result = state.store.search(&q.q, type_filter, page).await?;
    let items = result.items.iter().map(ListingItem::from_file).collect();

    Ok(Json(SearchResponse { items, total_items: result.total_items }))
}
