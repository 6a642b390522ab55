use serde::{Deserialize, Serialize};
use viewer_model::Tag;

/// A tag as returned to clients.
#[derive(Debug, Serialize)]
pub struct TagView {
    /// Tag name.
    pub name: String,
    /// Optional UI color.
    pub color: Option<String>,
    /// Number of files carrying this tag.
    pub item_count: u64,
}

impl From<Tag> for TagView {
    fn from(t: Tag) -> Self {
        Self {
            name: t.name,
            color: t.color,
            item_count: t.item_count,
        }
    }
}

/// Body of `POST /api/tags/{file}` — attach a tag to a file.
#[derive(Debug, Deserialize)]
pub struct AddTagRequest {
    /// Tag name to attach.
    pub tag: String,
    /// Color to set if the tag is being created.
    pub color: Option<String>,
}

/// Body of `POST /api/tags/rename` — rename (and possibly merge) a tag.
#[derive(Debug, Deserialize)]
pub struct RenameTagRequest {
    /// Existing tag name.
    pub old_name: String,
    /// Desired new tag name.
    pub new_name: String,
}

/// Response body of a successful rename.
#[derive(Debug, Serialize)]
pub struct RenameTagResponse {
    /// Number of files whose tag set changed as a result of the rename.
    pub affected_files: u64,
    /// The name that was renamed away from.
    pub old_name: String,
    /// The name now in effect.
    pub new_name: String,
}
