//! WebAuthn (FIDO2/passkey) register and assert flows, wrapped around
//! `webauthn-rs`'s `Webauthn` handle.
//!
//! Registration requires an existing session (enforced by the HTTP surface
//! before calling [`WebauthnService::start_registration`]); assertion
//! produces a new session identical in shape to a password login. Ceremony
//! state (the ephemeral challenge + expected credential properties)
//! doesn't belong in the catalogue store — callers keep it in the same
//! session-scoped store the HTTP layer already uses for in-flight request
//! state and hand it back to `finish_*` unchanged.

use base64::Engine;
use webauthn_rs::prelude::*;

use crate::error::{ViewerError, ViewerResult};
use viewer_model::Credential;

/// Configuration for the relying party this server presents to
/// authenticators.
#[derive(Debug, Clone)]
pub struct RelyingPartyConfig {
    /// The RP id (`WEBAUTHN_RP_ID`), typically the bare hostname.
    pub id: String,
    /// Human-readable RP name (`WEBAUTHN_RP_NAME`).
    pub name: String,
    /// Origins allowed to complete a ceremony (`WEBAUTHN_ORIGINS`).
    pub origins: Vec<String>,
}

/// Wraps a configured [`Webauthn`] handle with the two ceremony pairs the
/// design calls for.
pub struct WebauthnService {
    webauthn: Webauthn,
}

impl WebauthnService {
    /// Build the service from relying-party configuration. The first
    /// configured origin is used as the primary origin passed to
    /// `WebauthnBuilder`; the remainder are registered as additional
    /// allowed origins.
    pub fn new(config: &RelyingPartyConfig) -> ViewerResult<Self> {
        let primary = config
            .origins
            .first()
            .ok_or_else(|| ViewerError::Internal("WEBAUTHN_ORIGINS must not be empty".into()))?;
        let origin = Url::parse(primary)
            .map_err(|err| ViewerError::Internal(format!("invalid webauthn origin: {err}")))?;
        let mut builder = WebauthnBuilder::new(&config.id, &origin)
            .map_err(|err| ViewerError::Internal(format!("webauthn builder: {err}")))?
            .rp_name(&config.name);
        for extra in config.origins.iter().skip(1) {
            let extra_origin = Url::parse(extra)
                .map_err(|err| ViewerError::Internal(format!("invalid webauthn origin: {err}")))?;
            builder = builder.append_allowed_origin(&extra_origin);
        }
        let webauthn = builder
            .build()
            .map_err(|err| ViewerError::Internal(format!("webauthn build: {err}")))?;
        Ok(Self { webauthn })
    }

    /// Begin registering a new passkey for the (already authenticated)
    /// user. `exclude` should list credential ids already registered so the
    /// authenticator can refuse to create a duplicate.
    pub fn start_registration(
        &self,
        user_id: Uuid,
        user_name: &str,
        exclude: &[CredentialID],
    ) -> ViewerResult<(CreationChallengeResponse, PasskeyRegistration)> {
        let exclude = if exclude.is_empty() {
            None
        } else {
            Some(exclude.to_vec())
        };
        self.webauthn
            .start_passkey_registration(user_id, user_name, user_name, exclude)
            .map_err(|err| ViewerError::Validation(format!("webauthn registration start: {err}")))
    }

    /// Complete registration, producing a serialized [`Credential`] ready
    /// for [`crate::store::CatalogueStore::add_credential`]. `friendly_name`
    /// is supplied by the caller (the user names their new key in the UI).
    pub fn finish_registration(
        &self,
        response: &RegisterPublicKeyCredential,
        state: &PasskeyRegistration,
        friendly_name: impl Into<String>,
    ) -> ViewerResult<Credential> {
        let passkey = self
            .webauthn
            .finish_passkey_registration(response, state)
            .map_err(|err| ViewerError::Validation(format!("webauthn registration finish: {err}")))?;
        let public_key = serde_json::to_vec(&passkey)
            .map_err(|err| ViewerError::Internal(format!("serialize passkey: {err}")))?;
        Ok(Credential {
            credential_id: base64::engine::general_purpose::URL_SAFE_NO_PAD
                .encode(passkey.cred_id().as_ref()),
            public_key,
            signature_count: passkey.counter(),
            transports: Vec::new(),
            friendly_name: friendly_name.into(),
            created_at: chrono::Utc::now(),
            last_used_at: None,
        })
    }

    /// Begin an assertion ceremony against the caller's registered
    /// passkeys.
    pub fn start_assertion(
        &self,
        passkeys: &[Passkey],
    ) -> ViewerResult<(RequestChallengeResponse, PasskeyAuthentication)> {
        self.webauthn
            .start_passkey_authentication(passkeys)
            .map_err(|err| ViewerError::Validation(format!("webauthn assertion start: {err}")))
    }

    /// Complete an assertion. Returns the new signature counter; callers
    /// must compare it against the stored counter themselves and reject a
    /// regression as a cloned-authenticator failure before persisting via
    /// [`crate::store::CatalogueStore::touch_credential`] — `webauthn-rs`
    /// already rejects a counter that didn't increase when both the stored
    /// and presented values are nonzero, but a stored value of zero (a
    /// credential that has never asserted) must be allowed to establish a
    /// baseline.
    pub fn finish_assertion(
        &self,
        response: &PublicKeyCredential,
        state: &PasskeyAuthentication,
    ) -> ViewerResult<AuthenticationResult> {
        self.webauthn
            .finish_passkey_authentication(response, state)
            .map_err(|err| ViewerError::AuthFailed(format!("webauthn assertion: {err}")))
    }
}

/// Deserialize a stored [`Credential::public_key`] blob back into a
/// `webauthn-rs` [`Passkey`] for use in an assertion ceremony.
pub fn passkey_from_credential(credential: &Credential) -> ViewerResult<Passkey> {
    serde_json::from_slice(&credential.public_key)
        .map_err(|err| ViewerError::Internal(format!("corrupt stored passkey: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_origins() {
        let config = RelyingPartyConfig {
            id: "example.com".into(),
            name: "Media Viewer".into(),
            origins: Vec::new(),
        };
        let err = WebauthnService::new(&config).unwrap_err();
        assert!(matches!(err, ViewerError::Internal(_)));
    }

    #[test]
    fn builds_from_valid_config() {
        let config = RelyingPartyConfig {
            id: "example.com".into(),
            name: "Media Viewer".into(),
            origins: vec!["https://example.com".into()],
        };
        assert!(WebauthnService::new(&config).is_ok());
    }
}
