use chrono::{DateTime, Utc};

/// A favorited file. At most one per file; cascades on file deletion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Favorite {
    /// Path of the favorited file.
    pub file_path: String,
    /// When the file was favorited.
    pub created_at: DateTime<Utc>,
}
