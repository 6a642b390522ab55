use chrono::{DateTime, Utc};

/// A sliding-expiration session bound to either a password login or a
/// WebAuthn assertion.
///
/// Invariant: `expires_at > last_seen_at >= created_at`. The session token
/// itself (128 bits of CSPRNG output, base64url-encoded) lives only in the
/// cookie and the store's lookup key; it is never serialized back to
/// clients inside this struct.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Session {
    /// Opaque session token, base64url-encoded.
    #[cfg_attr(feature = "serde", serde(skip_serializing))]
    pub token: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session expires absent renewal.
    pub expires_at: DateTime<Utc>,
    /// Last request that authenticated with this session.
    pub last_seen_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session is still valid at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Whether this session's remaining lifetime warrants sliding renewal:
    /// true once less than half of `session_duration` remains.
    #[must_use]
    pub fn needs_renewal(&self, now: DateTime<Utc>, session_duration: chrono::Duration) -> bool {
        self.expires_at - now < session_duration / 2
    }
}

/// The singleton password credential record.
///
/// Created during first-run setup, replaced wholesale by change-password.
/// The hash is produced by a slow KDF (argon2id by default); `kdf_id`
/// records which algorithm produced `hash` so a future migration can
/// recognize and upgrade legacy bcrypt-compatible records.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PasswordRecord {
    /// Identifier of the KDF that produced `hash` (`"argon2id"` or `"bcrypt"`).
    pub kdf_id: String,
    /// The full PHC-formatted hash string (embeds salt and parameters).
    pub hash: String,
    /// When this record was created or last replaced.
    pub updated_at: DateTime<Utc>,
}

/// A registered WebAuthn credential (passkey).
///
/// Identity is the credential id. The signature counter must be
/// monotonically non-decreasing; a regression is treated as a cloned
/// authenticator and fails assertion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Credential {
    /// Raw credential id bytes, base64url-encoded for transport.
    pub credential_id: String,
    /// Opaque serialized public key + algorithm, as produced by the
    /// WebAuthn library.
    #[cfg_attr(feature = "serde", serde(skip_serializing))]
    pub public_key: Vec<u8>,
    /// Last observed signature counter.
    pub signature_count: u32,
    /// Authenticator transports reported at registration (`"usb"`, `"nfc"`, …).
    pub transports: Vec<String>,
    /// User-chosen friendly name, e.g. `"YubiKey 5"`.
    pub friendly_name: String,
    /// When the credential was registered.
    pub created_at: DateTime<Utc>,
    /// Last time this credential was used to authenticate.
    pub last_used_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expires_in: Duration) -> Session {
        let now = Utc::now();
        Session {
            token: "tok".into(),
            created_at: now,
            expires_at: now + expires_in,
            last_seen_at: now,
        }
    }

    #[test]
    fn expired_session_is_invalid() {
        let s = session(Duration::seconds(-1));
        assert!(!s.is_valid_at(Utc::now()));
    }

    #[test]
    fn renewal_triggers_past_half_life() {
        let duration = Duration::hours(2);
        let s = session(Duration::minutes(30));
        assert!(s.needs_renewal(Utc::now(), duration));

        let fresh = session(Duration::hours(2));
        assert!(!fresh.needs_renewal(Utc::now(), duration));
    }
}
