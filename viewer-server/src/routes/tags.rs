//! `/api/tags*` — tag CRUD and bulk rename, backed directly by
//! [`viewer_core::store::CatalogueStore`]'s tag methods.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;

use viewer_contracts::tags::{AddTagRequest, RenameTagRequest, RenameTagResponse, TagView};
use viewer_contracts::ApiResponse;
use viewer_core::store::normalize_path;
use viewer_core::ViewerError;

use crate::errors::AppResult;
use crate::state::AppState;

/// `GET /api/tags` — every tag with its live usage count.
pub async fn list_tags(State(state): State<AppState>) -> AppResult<Json<Vec<TagView>>> {
    let tags = state.store.list_tags().await?;
    Ok(Json(tags.into_iter().map(TagView::from).collect()))
}

/// `POST /api/tags/{path}` — attach a tag to a file, creating it if new.
pub async fn add_tag(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(body): Json<AddTagRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    state
        .store
        .add_tag(&normalize_path(&path), &body.tag, body.color.as_deref())
        .await?;
    Ok(Json(ApiResponse::ok()))
}

/// Query parameter for `DELETE /api/tags/{path}`: which tag to detach.
#[derive(Debug, Deserialize)]
pub struct RemoveTagQuery {
    tag: String,
}

/// `DELETE /api/tags/{path}` — detach a tag from a file. Not an error if
/// the pair did not exist.
pub async fn remove_tag(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(q): Query<RemoveTagQuery>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.store.remove_tag(&normalize_path(&path), &q.tag).await?;
    Ok(Json(ApiResponse::ok()))
}

/// `POST /api/tags/rename` — rename (and, if the target exists, merge) a
/// tag. Renaming a tag onto itself is a no-op with `affected_files: 0`.
pub async fn rename_tag(
    State(state): State<AppState>,
    Json(body): Json<RenameTagRequest>,
) -> AppResult<Json<RenameTagResponse>> {
    let outcome = state.store.rename_tag(&body.old_name, &body.new_name).await?;
    Ok(Json(RenameTagResponse {
        affected_files: outcome.affected_files,
        old_name: body.old_name,
        new_name: body.new_name,
    }))
}

/// `DELETE /api/tags/by-name/{name}` — delete a tag and all its file
/// associations. The store reports a missing tag as `NotFound`; this
/// handler remaps a delete of an already-deleted tag to `Conflict` (409)
/// rather than letting it read as a generic 404.
pub async fn delete_tag(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.store.delete_tag(&name).await.map_err(|err| match err {
        ViewerError::NotFound(msg) => ViewerError::Conflict(format!("tag already deleted: {msg}")),
        other => other,
    })?;
    Ok(Json(ApiResponse::ok()))
}
