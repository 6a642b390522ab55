//! `/api/files`, `/api/media`, and `/api/file/{path}` handlers.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tokio::io::{AsyncSeekExt, AsyncReadExt};
use tokio_util::io::ReaderStream;
use viewer_core::fs_resilience::FileSystem;
use viewer_core::store::DirEntry;
use viewer_model::{MediaKind, Page, SortKey, SortOrder, TypeFilter};
use viewer_contracts::files::{FileListResponse, ListingItem, MediaListResponse, PlaylistResponse};

use crate::errors::AppResult;
use crate::range::parse_range_header;
use crate::state::AppState;

/// Query parameters shared by `/api/files` and `/api/media`.
#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    #[serde(default)]
    dir: String,
    sort: Option<SortKey>,
    order: Option<SortOrder>,
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
    #[serde(rename = "type")]
    type_filter: Option<MediaKindQuery>,
}

/// A wire-level mirror of [`MediaKind`] excluding `Folder`, which is never
/// a valid restriction for a client-supplied `type` query.
///
/// Shared with [`crate::routes::search`], which restricts results the same
/// way `/api/files` and `/api/media` do.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub(crate) enum MediaKindQuery {
    Image,
    Video,
    Playlist,
}

impl From<MediaKindQuery> for MediaKind {
    fn from(q: MediaKindQuery) -> Self {
        match q {
            MediaKindQuery::Image => Self::Image,
            MediaKindQuery::Video => Self::Video,
            MediaKindQuery::Playlist => Self::Playlist,
        }
    }
}

pub(crate) fn resolve_type_filter(q: Option<MediaKindQuery>) -> TypeFilter {
    q.map(|k| TypeFilter::Only(k.into())).unwrap_or(TypeFilter::All)
}

pub(crate) fn resolve_page(number: Option<u32>, size: Option<u32>) -> Page {
    Page::new(number.unwrap_or(1), size.unwrap_or(Page::DEFAULT_SIZE))
}

/// `GET /api/files` — paged directory listing with files and synthetic
/// folder aggregates.
pub async fn list_files(
    State(state): State<AppState>,
    Query(q): Query<ListingQuery>,
) -> AppResult<Json<FileListResponse>> {
    let result = state
        .store
        .list_dir(
            &q.dir,
            q.sort.unwrap_or_default(),
            q.order.unwrap_or_default(),
            resolve_page(q.page, q.page_size),
            resolve_type_filter(q.type_filter),
        )
        .await?;

    let items = result
        .items
        .iter()
        .map(|entry| match entry {
            DirEntry::File(file) => ListingItem::from_file(file),
            DirEntry::Folder { path, child_count } => ListingItem::Folder {
                path: path.clone(),
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                child_count: *child_count,
            },
        })
        .collect();

    Ok(Json(FileListResponse { items, total_items: result.total_items }))
}

/// `GET /api/media` — flat media listing, no folder aggregation (achieved
/// by filtering folders out of the same store query `/api/files` uses).
pub async fn list_media(
    State(state): State<AppState>,
    Query(q): Query<ListingQuery>,
) -> AppResult<Json<MediaListResponse>> {
    let type_filter = resolve_type_filter(q.type_filter);
    let result = state
        .store
        .list_dir(
            &q.dir,
            q.sort.unwrap_or_default(),
            q.order.unwrap_or_default(),
            resolve_page(q.page, q.page_size),
            type_filter,
        )
        .await?;

    let items: Vec<ListingItem> = result
        .items
        .iter()
        .filter_map(|entry| match entry {
            DirEntry::File(file) => Some(ListingItem::from_file(file)),
            DirEntry::Folder { .. } => None,
        })
        .collect();
    let total_items = items.len() as u64;

    Ok(Json(MediaListResponse { items, total_items }))
}

/// `GET /api/file/{path}` — original bytes, with single-range support.
pub async fn serve_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let file = state
        .store
        .get_file(&viewer_core::store::normalize_path(&path))
        .await?
        .ok_or_else(|| viewer_core::ViewerError::NotFound(format!("no such file: {path}")))?;
    let absolute = state.resolve_media_path(&file.path)?;

    let metadata = state.fs.metadata(&absolute).await.map_err(viewer_core::ViewerError::from)?;
    let content_type = file.mime_hint();

    if let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        if let Some(range) = parse_range_header(range_header, metadata.len) {
            let mut handle = tokio::fs::File::open(&absolute)
                .await
                .map_err(viewer_core::ViewerError::from)?;
            handle
                .seek(std::io::SeekFrom::Start(range.start))
                .await
                .map_err(viewer_core::ViewerError::from)?;
            let limited = handle.take(range.len());
            let stream = ReaderStream::new(limited);
            let body = Body::from_stream(stream);

            return Ok((
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, content_type.to_string()),
                    (header::CONTENT_LENGTH, range.len().to_string()),
                    (header::CONTENT_RANGE, format!("bytes {}-{}/{}", range.start, range.end, metadata.len)),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
                body,
            )
                .into_response());
        }
    }

    let handle = tokio::fs::File::open(&absolute).await.map_err(viewer_core::ViewerError::from)?;
    let stream = ReaderStream::new(handle);
    let body = Body::from_stream(stream);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, metadata.len.to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
        body,
    )
        .into_response())
}

/// `GET /api/playlist/{path}` — parses a WPL playlist and resolves each
/// `<media src>` entry against the catalogue per §4.5's four rules.
pub async fn resolve_playlist(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Json<PlaylistResponse>> {
    let normalized = viewer_core::store::normalize_path(&path);
    let file = state
        .store
        .get_file(&normalized)
        .await?
        .ok_or_else(|| viewer_core::ViewerError::NotFound(format!("no such file: {path}")))?;
    if file.kind != MediaKind::Playlist {
        return Err(viewer_core::ViewerError::Validation(format!("not a playlist: {path}")).into());
    }

    let absolute = state.resolve_media_path(&file.path)?;
    let bytes = state.fs.read(&absolute).await.map_err(viewer_core::ViewerError::from)?;
    let entries = viewer_core::store::playlist::resolve(&normalized, &bytes, state.store.as_ref()).await?;

    Ok(Json(PlaylistResponse { entries }))
}
