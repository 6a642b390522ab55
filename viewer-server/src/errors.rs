//! HTTP-surface error type: the one place domain [`ViewerError`] kinds turn
//! into status codes. Internal layers never construct an `AppError`
//! directly — they return `ViewerResult`, and handlers convert at the edge.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use viewer_core::ViewerError;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// An error ready to become an HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    /// `ClientGone` is deliberately not logged as an error by callers that
    /// inspect this flag before emitting a `tracing::error!`.
    pub is_client_gone: bool,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), is_client_gone: false }
    }

    /// 403: the request is well-formed and the caller may be authenticated,
    /// but the operation itself is not permitted right now — first-run
    /// setup after a password already exists is the one case that needs
    /// this rather than one of [`ViewerError`]'s kinds (which has no
    /// "forbidden" variant; this isn't an auth failure, a missing session,
    /// or a domain conflict).
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<ViewerError> for AppError {
    fn from(err: ViewerError) -> Self {
        match err {
            ViewerError::Validation(msg) => Self::new(StatusCode::BAD_REQUEST, msg),
            ViewerError::AuthRequired => {
                Self::new(StatusCode::UNAUTHORIZED, "authentication required")
            }
            ViewerError::AuthFailed(msg) => Self::new(StatusCode::UNAUTHORIZED, msg),
            ViewerError::NotFound(msg) => Self::new(StatusCode::NOT_FOUND, msg),
            ViewerError::Conflict(msg) => Self::new(StatusCode::CONFLICT, msg),
            ViewerError::Transient(msg) => Self::new(StatusCode::SERVICE_UNAVAILABLE, msg),
            ViewerError::ClientGone => Self { is_client_gone: true, ..Self::new(StatusCode::OK, "client gone") },
            ViewerError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}
