//! `/api/favorites*` — straightforward CRUD over
//! [`viewer_core::store::CatalogueStore`]'s favorite methods.

use axum::extract::{Path, State};
use axum::response::Json;

use viewer_contracts::favorites::FavoriteView;
use viewer_contracts::ApiResponse;
use viewer_core::store::normalize_path;

use crate::errors::AppResult;
use crate::state::AppState;

/// `GET /api/favorites` — most recently favorited first.
pub async fn list_favorites(State(state): State<AppState>) -> AppResult<Json<Vec<FavoriteView>>> {
    let favorites = state.store.list_favorites().await?;
    Ok(Json(favorites.into_iter().map(FavoriteView::from).collect()))
}

/// `POST /api/favorites/{path}` — favorite a file. Idempotent.
pub async fn add_favorite(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.store.add_favorite(&normalize_path(&path)).await?;
    Ok(Json(ApiResponse::ok()))
}

/// `DELETE /api/favorites/{path}` — remove a favorite. Not an error if it
/// did not exist.
pub async fn remove_favorite(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.store.remove_favorite(&normalize_path(&path)).await?;
    Ok(Json(ApiResponse::ok()))
}
