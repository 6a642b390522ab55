use serde::Serialize;
use viewer_model::{File, MediaKind};

/// A single row in a directory listing: either a real file or a synthetic
/// folder aggregate.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ListingItem {
    /// A real catalogued file.
    File {
        /// Repository-relative path.
        path: String,
        /// Basename.
        name: String,
        /// Size in bytes.
        size: u64,
        /// Modification time, RFC 3339.
        modified: chrono::DateTime<chrono::Utc>,
        /// MIME type hint.
        mime: String,
        /// Underlying media kind (never `Folder` for this variant).
        media_kind: MediaKind,
    },
    /// A synthetic directory entry aggregated from its children.
    Folder {
        /// Repository-relative path of the directory.
        path: String,
        /// Basename of the directory.
        name: String,
        /// Number of direct + nested children under this folder.
        child_count: u64,
    },
}

impl ListingItem {
    /// Build a [`ListingItem::File`] from a catalogue [`File`].
    #[must_use]
    pub fn from_file(file: &File) -> Self {
        Self::File {
            path: file.path.clone(),
            name: file.name().to_string(),
            size: file.size,
            modified: file.modified,
            mime: file.mime_hint().to_string(),
            media_kind: file.kind,
        }
    }
}

/// Response body for `GET /api/files`.
#[derive(Debug, Serialize)]
pub struct FileListResponse {
    /// The page of items.
    pub items: Vec<ListingItem>,
    /// Total matching rows across all pages.
    pub total_items: u64,
}

/// Response body for `GET /api/media`: a flat list, no folder aggregation.
#[derive(Debug, Serialize)]
pub struct MediaListResponse {
    /// The matching files.
    pub items: Vec<ListingItem>,
    /// Total matching rows across all pages.
    pub total_items: u64,
}

/// Response body for `GET /api/playlist/{path}`: the resolved entries of a
/// WPL playlist, in file order.
#[derive(Debug, Serialize)]
pub struct PlaylistResponse {
    /// The resolved (or left-opaque) entries, in playlist order.
    pub entries: Vec<viewer_model::PlaylistEntry>,
}
