//! Session cookie plumbing and request logging gate.
//!
//! There's no cookie-jar crate in the dependency stack, so cookies are
//! handled by hand: parsing the `Cookie` header for `session=...` and
//! building `Set-Cookie` strings with a fixed attribute set (`HttpOnly`,
//! `SameSite=Strict`, `Path=/`, `Secure` iff the request came in over
//! HTTPS).

use axum::extract::{FromRef, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use viewer_core::session::validate_and_renew;
use viewer_model::Session;

use crate::errors::AppError;
use crate::state::AppState;

/// Name of the session cookie.
pub const SESSION_COOKIE_NAME: &str = "session";

/// Extractor for handlers that require an authenticated caller: pulls the
/// session cookie, validates and slides it, and persists the renewal.
/// Rejects with [`viewer_core::ViewerError::AuthRequired`] when absent or
/// invalid, which [`AppError`] maps to 401.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession(pub Session);

impl<S> FromRequestParts<S> for AuthenticatedSession
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = cookie_value(&parts.headers, SESSION_COOKIE_NAME)
            .ok_or(viewer_core::ViewerError::AuthRequired)?;
        let session = app_state
            .store
            .get_session(&token)
            .await?
            .ok_or(viewer_core::ViewerError::AuthRequired)?;
        let renewed = validate_and_renew(&session, chrono::Utc::now(), app_state.config.session_duration_chrono())?;
        app_state.store.touch_session(&renewed).await?;
        Ok(Self(renewed))
    }
}

/// Router-layer gate for every route that isn't part of the login surface
/// itself: runs the [`AuthenticatedSession`] extractor and rejects with its
/// `AppError` (401) before the wrapped handler ever runs, instead of
/// leaving each handler to remember to require it.
pub async fn require_session(_session: AuthenticatedSession, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// Extract a single named cookie's value from the raw `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let pair = pair.trim();
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

/// Build the `Set-Cookie` header value for a fresh or renewed session.
#[must_use]
pub fn session_cookie_header(session: &Session, secure: bool) -> HeaderValue {
    let max_age = (session.expires_at - chrono::Utc::now()).num_seconds().max(0);
    let secure_attr = if secure { "; Secure" } else { "" };
    let value = format!(
        "{SESSION_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}{secure_attr}"
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Build the `Set-Cookie` header value that clears the session cookie.
#[must_use]
pub fn clear_session_cookie_header(secure: bool) -> HeaderValue {
    let secure_attr = if secure { "; Secure" } else { "" };
    let value = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0{secure_attr}");
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Whether the inbound request arrived over HTTPS, per the `Secure`
/// attribute rule ("Secure iff request scheme is HTTPS"). Trusts
/// `X-Forwarded-Proto` from a terminating reverse proxy, falling back to
/// the request's own scheme.
#[must_use]
pub fn is_https_request(headers: &HeaderMap, uri: &axum::http::Uri) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("https"))
        .unwrap_or_else(|| uri.scheme().map(|s| s.as_str() == "https").unwrap_or(false))
}

/// Request-logging middleware: always logs API routes; gates `/health`,
/// `/livez`, `/readyz` behind `LOG_HEALTH_CHECKS` and any path under
/// `/static` behind `LOG_STATIC_FILES`.
pub async fn request_logging(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().clone();
    let is_health = matches!(path.as_str(), "/health" | "/livez" | "/readyz");
    let is_static = path.starts_with("/static");

    let should_log = if is_health {
        state.config.log_health_checks
    } else if is_static {
        state.config.log_static_files
    } else {
        true
    };

    let response = next.run(request).await;

    if should_log {
        tracing::info!(%method, %path, status = response.status().as_u16(), "request");
    }
    response
}
