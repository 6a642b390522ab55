use chrono::{DateTime, Utc};
use serde::Serialize;
use viewer_model::Favorite;

/// A favorite as returned to clients.
#[derive(Debug, Serialize)]
pub struct FavoriteView {
    /// Path of the favorited file.
    pub file_path: String,
    /// When it was favorited.
    pub created_at: DateTime<Utc>,
}

impl From<Favorite> for FavoriteView {
    fn from(f: Favorite) -> Self {
        Self {
            file_path: f.file_path,
            created_at: f.created_at,
        }
    }
}
