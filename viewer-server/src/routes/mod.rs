//! HTTP route wiring: one module per resource, merged into a single
//! `Router` in [`create_app`].

pub mod auth;
pub mod favorites;
pub mod files;
pub mod health;
pub mod search;
pub mod stream;
pub mod tags;
pub mod thumbnails;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::{request_logging, require_session};
use crate::state::AppState;

/// Build the full application router over `state`. `/metrics` is included
/// here only when metrics are enabled and share the main port; when a
/// distinct `METRICS_PORT` is configured, the caller binds
/// [`metrics_router`] separately instead.
///
/// The API surface splits into a public part (the login flows themselves,
/// which obviously can't require a session) and everything else, which is
/// gated behind [`require_session`] — this is a single-user server, so
/// every piece of the media tree, not just account management, is private.
pub fn create_app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health))
        .route("/livez", get(health::livez))
        .route("/readyz", get(health::readyz));
    if state.config.metrics_enabled && state.config.metrics_port == state.config.port {
        router = router.route("/metrics", get(health::metrics));
    }

    let public_auth = Router::new()
        .route("/auth/setup", post(auth::setup))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/check", get(auth::check))
        .route("/auth/webauthn/login/begin", post(auth::webauthn_login_begin))
        .route("/auth/webauthn/login/finish", post(auth::webauthn_login_finish));

    let protected = Router::new()
        .route("/files", get(files::list_files))
        .route("/media", get(files::list_media))
        .route("/file/{*path}", get(files::serve_file))
        .route("/playlist/{*path}", get(files::resolve_playlist))
        .route("/stream/{*path}", get(stream::stream_media))
        .route("/stream-info/{*path}", get(stream::stream_info))
        .route("/thumbnail/{*path}", get(thumbnails::get_thumbnail).delete(thumbnails::invalidate_thumbnail))
        .route("/thumbnails/rebuild", post(thumbnails::rebuild_thumbnails))
        .route("/search", get(search::search))
        .route("/tags", get(tags::list_tags))
        .route("/tags/rename", post(tags::rename_tag))
        .route("/tags/by-name/{name}", delete(tags::delete_tag))
        .route("/tags/{*path}", post(tags::add_tag).delete(tags::remove_tag))
        .route("/favorites", get(favorites::list_favorites))
        .route("/favorites/{*path}", post(favorites::add_favorite).delete(favorites::remove_favorite))
        .route("/auth/password", put(auth::change_password))
        .route("/auth/webauthn/register/begin", post(auth::webauthn_register_begin))
        .route("/auth/webauthn/register/finish", post(auth::webauthn_register_finish))
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_session));

    let api = public_auth.merge(protected);

    router
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(state.clone(), request_logging))
        .with_state(state)
}

/// A standalone router exposing only `/metrics`, bound on `METRICS_PORT`
/// when it differs from the main listen port.
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(health::metrics))
}
