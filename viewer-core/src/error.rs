//! Domain-level error kinds, shared by every core subsystem.
//!
//! These are deliberately coarser than Rust's I/O error taxonomy: callers
//! (ultimately the HTTP surface) only need to know which of a handful of
//! outcome categories occurred, not which syscall failed.

use thiserror::Error;

/// The result type returned by every `viewer-core` operation.
pub type ViewerResult<T> = Result<T, ViewerError>;

/// A domain-level error kind.
///
/// Internal layers return these unchanged; only the HTTP surface maps them
/// to status codes.
#[derive(Debug, Error)]
pub enum ViewerError {
    /// Bad input: an escaping path, an unknown sort key, an overlong tag.
    /// Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// No session/credential was presented where one is required.
    #[error("authentication required")]
    AuthRequired,

    /// A session or credential was presented but rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A true conflict (e.g. deleting an already-deleted tag). Renaming a
    /// tag onto an existing one is a merge, not a conflict — see
    /// [`crate::store::CatalogueStore::rename_tag`].
    #[error("conflict: {0}")]
    Conflict(String),

    /// A transient failure (NFS stale handle exhausted its retries, store
    /// temporarily locked). Safe to retry at a higher layer; surfaced as
    /// HTTP 503.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The client disconnected mid-response. Not logged as an error.
    #[error("client gone")]
    ClientGone,

    /// Anything unexpected. Detail stays in logs; callers see an opaque
    /// message.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ViewerError {
    /// Wrap any `std::error::Error` as an [`ViewerError::Internal`],
    /// preserving its message for logs but not for clients.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for ViewerError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.message().contains("locked") => {
                Self::Transient(err.to_string())
            }
            sqlx::Error::RowNotFound => Self::NotFound("row not found".into()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ViewerError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::Validation(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}
