//! Core data model definitions shared across the media viewer crates.
//!
//! Identity conventions follow the catalogue's data model: a [`File`] is
//! identified by its repository-relative path, a [`Tag`] by its name, and a
//! [`ThumbKey`] is derived from a file's path, size, and modification time so
//! cache entries invalidate themselves the moment the source changes.

pub mod favorite;
pub mod file;
pub mod kind;
pub mod playlist;
pub mod session;
pub mod sort;
pub mod tag;
pub mod thumb;

pub use favorite::Favorite;
pub use file::File;
pub use kind::MediaKind;
pub use playlist::PlaylistEntry;
pub use session::{Credential, PasswordRecord, Session};
pub use sort::{Page, SortKey, SortOrder, TypeFilter};
pub use tag::{FileTag, Tag};
pub use thumb::{ThumbArtifact, ThumbKey};
