//! Session & authentication domain logic.
//!
//! Covers the parts of C7 that are pure domain logic and therefore belong
//! in the core library: session token minting and sliding-renewal
//! decisions, password hashing/verification with a slow KDF, and the
//! WebAuthn register/assert flows against a configured relying party. The
//! HTTP surface (cookie attributes, route wiring) lives in
//! `viewer-server`.

pub mod webauthn;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use constant_time_eq::constant_time_eq;
use rand::RngCore;

use crate::error::{ViewerError, ViewerResult};
use viewer_model::{PasswordRecord, Session};

/// Default sliding session lifetime.
pub const DEFAULT_SESSION_DURATION: Duration = Duration::hours(24);

/// Minimum password length.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Mint a fresh session token: 128 bits of CSPRNG output, base64url
/// (no padding) encoded.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build a new [`Session`] starting now with the given duration.
#[must_use]
pub fn new_session(duration: Duration) -> Session {
    let now = Utc::now();
    Session {
        token: generate_token(),
        created_at: now,
        expires_at: now + duration,
        last_seen_at: now,
    }
}

/// Validate a presented session against `now` and, if it is valid, compute
/// its renewed form per the sliding-expiration rule: `last_seen_at` always
/// advances to `now`; `expires_at` only advances when less than half of
/// `session_duration` remains.
///
/// Returns [`ViewerError::AuthFailed`] for an expired session — the caller
/// (HTTP surface) maps this to 401 and does not rewrite the cookie.
pub fn validate_and_renew(
    session: &Session,
    now: DateTime<Utc>,
    session_duration: Duration,
) -> ViewerResult<Session> {
    if !session.is_valid_at(now) {
        return Err(ViewerError::AuthFailed("session expired".into()));
    }
    let mut renewed = session.clone();
    renewed.last_seen_at = now;
    if session.needs_renewal(now, session_duration) {
        renewed.expires_at = now + session_duration;
    }
    Ok(renewed)
}

/// Hash a password with argon2id, returning a PHC-formatted string and the
/// KDF id to store alongside it.
pub fn hash_password(password: &str) -> ViewerResult<PasswordRecord> {
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
    use argon2::Argon2;

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ViewerError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| ViewerError::Internal(format!("password hash failed: {err}")))?
        .to_string();
    Ok(PasswordRecord {
        kdf_id: "argon2id".to_string(),
        hash,
        updated_at: Utc::now(),
    })
}

/// Verify `password` against a stored [`PasswordRecord`] in constant time
/// with respect to the comparison step (the KDF itself does the slow,
/// expensive work; `argon2`'s `verify_password` already compares digests in
/// constant time, this wrapper exists so every caller goes through one
/// documented entry point rather than hand-rolling comparisons).
pub fn verify_password(password: &str, record: &PasswordRecord) -> ViewerResult<bool> {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};
    use argon2::Argon2;

    match record.kdf_id.as_str() {
        "argon2id" => {
            let parsed = PasswordHash::new(&record.hash)
                .map_err(|err| ViewerError::Internal(format!("corrupt password hash: {err}")))?;
            Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        }
        other => Err(ViewerError::Internal(format!("unsupported kdf: {other}"))),
    }
}

/// Constant-time equality check for tokens/secrets that are not themselves
/// KDF-protected (e.g. comparing a presented session token to a stored
/// one, where the store lookup is by indexed equality but a caller with a
/// raw candidate token wants to avoid timing signal before the lookup).
#[must_use]
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewal_advances_expiry_past_half_life() {
        let now = Utc::now();
        let duration = Duration::hours(2);
        let session = Session {
            token: "t".into(),
            created_at: now - Duration::hours(1),
            expires_at: now + Duration::minutes(30),
            last_seen_at: now - Duration::minutes(5),
        };
        let renewed = validate_and_renew(&session, now, duration).unwrap();
        assert_eq!(renewed.last_seen_at, now);
        assert_eq!(renewed.expires_at, now + duration);
    }

    #[test]
    fn renewal_leaves_fresh_expiry_alone() {
        let now = Utc::now();
        let duration = Duration::hours(2);
        let session = Session {
            token: "t".into(),
            created_at: now,
            expires_at: now + duration,
            last_seen_at: now,
        };
        let renewed = validate_and_renew(&session, now, duration).unwrap();
        assert_eq!(renewed.expires_at, session.expires_at);
    }

    #[test]
    fn expired_session_fails_and_is_not_renewed() {
        let now = Utc::now();
        let session = Session {
            token: "t".into(),
            created_at: now - Duration::hours(3),
            expires_at: now - Duration::seconds(1),
            last_seen_at: now - Duration::hours(1),
        };
        let err = validate_and_renew(&session, now, Duration::hours(2)).unwrap_err();
        assert!(matches!(err, ViewerError::AuthFailed(_)));
    }

    #[test]
    fn password_hash_roundtrip() {
        let record = hash_password("correct-horse").unwrap();
        assert!(verify_password("correct-horse", &record).unwrap());
        assert!(!verify_password("wrong-password", &record).unwrap());
    }

    #[test]
    fn password_too_short_is_rejected() {
        let err = hash_password("abc").unwrap_err();
        assert!(matches!(err, ViewerError::Validation(_)));
    }
}
