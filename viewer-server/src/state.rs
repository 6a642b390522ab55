//! Shared application state handed to every handler through axum's
//! `State` extractor: one `Arc`-wrapped struct constructed once in `main`
//! and cloned cheaply per request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;
use webauthn_rs::prelude::{PasskeyAuthentication, PasskeyRegistration};

use viewer_core::fs_resilience::{RealFs, ResilientFs};
use viewer_core::indexer::Indexer;
use viewer_core::memory::MemoryGovernor;
use viewer_core::session::webauthn::WebauthnService;
use viewer_core::store::CatalogueStore;
use viewer_core::thumbnail::ThumbnailEngine;
use viewer_core::{ViewerError, ViewerResult};

use crate::config::Config;

/// Filesystem type every component in this binary is generic over.
pub type Fs = ResilientFs<RealFs>;

/// This server has exactly one administrator and no multi-user account
/// model; WebAuthn nonetheless requires a user handle, so every credential
/// is registered against this fixed id.
pub const SINGLE_USER_ID: Uuid = Uuid::nil();

/// Display name presented to authenticators during registration.
pub const SINGLE_USER_NAME: &str = "admin";

/// Ceremony state held between a WebAuthn `begin` and `finish` call,
/// correlated through a short-lived cookie (see
/// [`crate::middleware::SESSION_COOKIE_NAME`]'s sibling,
/// `webauthn_ceremony`) since `finish_*` needs the exact in-progress state
/// `start_*` produced.
#[derive(Debug)]
pub enum WebauthnCeremony {
    /// A passkey registration ceremony is in progress.
    Registration(PasskeyRegistration),
    /// A passkey login (assertion) ceremony is in progress.
    Authentication(PasskeyAuthentication),
}

/// Process-wide application state.
#[derive(Clone)]
pub struct AppState {
    /// Resolved configuration.
    pub config: Arc<Config>,
    /// The catalogue store.
    pub store: Arc<CatalogueStore>,
    /// Resilient filesystem handle rooted implicitly at the OS root; callers
    /// always pass absolute paths built from `config.media_dir`.
    pub fs: Arc<Fs>,
    /// Memory governor.
    pub memory: Arc<MemoryGovernor>,
    /// Media indexer.
    pub indexer: Arc<Indexer<Fs>>,
    /// Thumbnail engine.
    pub thumbnails: Arc<ThumbnailEngine<Fs>>,
    /// WebAuthn service, if relying-party configuration was valid.
    pub webauthn: Arc<WebauthnService>,
    /// In-flight WebAuthn ceremonies, keyed by the `webauthn_ceremony`
    /// cookie value. One-shot: a `finish_*` call removes its entry.
    pub webauthn_ceremonies: Arc<DashMap<String, WebauthnCeremony>>,
}

impl AppState {
    /// Resolve a client-supplied repository-relative path to an absolute
    /// path under `media_dir`, rejecting any attempt to escape the root
    /// (`..` segments, absolute paths, drive letters). This is the single
    /// checkpoint that rejects a path escaping the media root.
    pub fn resolve_media_path(&self, requested: &str) -> ViewerResult<PathBuf> {
        resolve_under_root(&self.config.media_dir, requested)
    }
}

fn resolve_under_root(root: &Path, requested: &str) -> ViewerResult<PathBuf> {
    let normalized = viewer_core::store::normalize_path(requested);
    if normalized.split('/').any(|segment| segment == "..") {
        return Err(ViewerError::Validation(format!("path escapes media root: {requested}")));
    }
    Ok(root.join(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_traversal() {
        let root = PathBuf::from("/media");
        assert!(resolve_under_root(&root, "../../etc/passwd").is_err());
    }

    #[test]
    fn joins_clean_relative_paths() {
        let root = PathBuf::from("/media");
        let resolved = resolve_under_root(&root, "vacation/2024/beach.jpg").unwrap();
        assert_eq!(resolved, PathBuf::from("/media/vacation/2024/beach.jpg"));
    }
}
