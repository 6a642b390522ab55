use chrono::{DateTime, Utc};

/// A content-derived cache key for a thumbnail.
///
/// `sha256(path || 0x00 || size_le_u64 || mtime_ns_le_u64)`, hex-truncated
/// to 32 characters. Because the key folds in size and mtime, any change to
/// the source file produces a different key: stale artifacts simply become
/// unreachable rather than needing synchronous invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThumbKey(pub String);

impl ThumbKey {
    /// Length, in hex characters, of a derived key.
    pub const LEN: usize = 32;

    /// The two-character shard prefix used for the on-disk cache directory
    /// layout (`{cache}/thumbnails/{key[:2]}/{key}.{ext}`).
    #[must_use]
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl AsRef<str> for ThumbKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThumbKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cached thumbnail artifact's metadata; the bytes themselves live on
/// disk under the path implied by [`ThumbKey::shard`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThumbArtifact {
    /// The key this artifact was built for.
    pub key: ThumbKey,
    /// MIME content type of the cached bytes.
    pub content_type: String,
    /// When the artifact was generated.
    pub generated_at: DateTime<Utc>,
}
