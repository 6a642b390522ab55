use chrono::{DateTime, Utc};

use crate::kind::MediaKind;

/// A catalogued file.
///
/// Identity is the repository-relative path: forward-slash separated, no
/// leading slash, NFC-normalised. The indexer is the only writer; it is
/// created when a new entry is observed, mutated only by the indexer on
/// size/mtime change, and deleted only when a full scan confirms the path
/// is gone (a poll cycle never deletes, to tolerate transient NFS
/// hiccups without mistaking them for real removals).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct File {
    /// Repository-relative path, e.g. `"vacation/2024/beach.jpg"`.
    pub path: String,
    /// Size in bytes at last observation.
    pub size: u64,
    /// Last modified time, UTC, millisecond resolution.
    pub modified: DateTime<Utc>,
    /// Media kind derived from the file's extension at index time.
    pub kind: MediaKind,
    /// Lazily computed content hash, populated on demand only.
    pub content_hash: Option<String>,
}

impl File {
    /// The file's basename (final path segment).
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// The parent directory prefix, or `""` for a root-level file.
    #[must_use]
    pub fn parent(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }

    /// The extension, lowercased, without the leading dot.
    #[must_use]
    pub fn extension(&self) -> &str {
        match self.name().rsplit_once('.') {
            Some((_, ext)) => ext,
            None => "",
        }
    }

    /// A MIME type hint derived from this file's extension and kind.
    #[must_use]
    pub fn mime_hint(&self) -> &'static str {
        self.kind.mime_hint(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> File {
        File {
            path: path.to_string(),
            size: 100,
            modified: Utc::now(),
            kind: MediaKind::Image,
            content_hash: None,
        }
    }

    #[test]
    fn splits_name_and_parent() {
        let f = file("vacation/2024/beach.jpg");
        assert_eq!(f.name(), "beach.jpg");
        assert_eq!(f.parent(), "vacation/2024");
        assert_eq!(f.extension(), "jpg");
    }

    #[test]
    fn root_level_file_has_empty_parent() {
        let f = file("beach.jpg");
        assert_eq!(f.parent(), "");
    }
}
