//! `/api/thumbnail*` — on-demand generation, invalidation, and bulk
//! rebuild, thin wrappers over [`viewer_core::thumbnail::ThumbnailEngine`].

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use viewer_contracts::ApiResponse;
use viewer_core::store::normalize_path;
use viewer_core::thumbnail::GetOutcome;
use viewer_core::ViewerError;

use crate::errors::AppResult;
use crate::state::AppState;

/// Generic placeholder icon (a 1x1 transparent PNG) served when a build
/// exceeds its soft deadline for a prefetching caller. A direct `GET` is
/// never a prefetch (see [`get_thumbnail`]), so this only matters if a
/// future background prefetch surface starts reusing this handler.
const FALLBACK_ICON: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// `GET /api/thumbnail/{path}` — thumbnail bytes, building on first
/// request and caching thereafter. A direct client request is never
/// treated as an anonymous prefetch, so this always waits for the real
/// build rather than returning the fallback icon early.
pub async fn get_thumbnail(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Response> {
    let file = state
        .store
        .get_file(&normalize_path(&path))
        .await?
        .ok_or_else(|| ViewerError::NotFound(format!("no such file: {path}")))?;

    match state.thumbnails.get(&file.path, file.kind, false).await? {
        GetOutcome::Ready(artifact) => {
            let disk_path = state.thumbnails.artifact_file_path(&artifact.key, file.kind);
            let bytes = tokio::fs::read(&disk_path).await.map_err(ViewerError::from)?;
            Ok((StatusCode::OK, [(header::CONTENT_TYPE, artifact.content_type)], bytes).into_response())
        }
        GetOutcome::FallbackIcon => {
            Ok((StatusCode::OK, [(header::CONTENT_TYPE, "image/png".to_string())], FALLBACK_ICON).into_response())
        }
    }
}

/// `DELETE /api/thumbnail/{path}` — invalidate one cached thumbnail; the
/// next `GET` rebuilds it.
pub async fn invalidate_thumbnail(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    let file = state
        .store
        .get_file(&normalize_path(&path))
        .await?
        .ok_or_else(|| ViewerError::NotFound(format!("no such file: {path}")))?;
    state.thumbnails.invalidate(&file.path, file.kind).await?;
    Ok(Json(ApiResponse::ok()))
}

/// `POST /api/thumbnails/rebuild` — clear the entire cache and kick a
/// background sweep to repopulate it. Responds as soon as the clear
/// completes; the rebuild itself runs asynchronously.
pub async fn rebuild_thumbnails(State(state): State<AppState>) -> AppResult<Json<ApiResponse<()>>> {
    state.thumbnails.clear_all().await?;

    let store = state.store.clone();
    let thumbnails = state.thumbnails.clone();
    tokio::spawn(async move {
        let uncached = match thumbnails.find_uncached().await {
            Ok(paths) => paths,
            Err(err) => {
                tracing::warn!(%err, "rebuild sweep: find_uncached failed");
                return;
            }
        };
        for path in uncached {
            let Ok(Some(file)) = store.get_file(&path).await else { continue };
            if let Err(err) = thumbnails.get(&file.path, file.kind, true).await {
                tracing::debug!(%err, path = %file.path, "rebuild sweep: build failed");
            }
        }
    });

    Ok(Json(ApiResponse::ok()))
}
