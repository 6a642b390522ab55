//! `/api/auth/*` — password setup/login/logout/check/change, and the
//! WebAuthn register/login ceremony pairs.

use axum::extract::{Json as JsonExtract, State};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Json, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use webauthn_rs::prelude::{CredentialID, PublicKeyCredential, RegisterPublicKeyCredential};

use viewer_contracts::auth::{AuthCheckResponse, ChangePasswordRequest, LoginRequest, LoginResponse};
use viewer_contracts::ApiResponse;
use viewer_core::session::{
    self, constant_time_str_eq, hash_password, new_session, validate_and_renew, verify_password,
};
use viewer_core::session::webauthn::passkey_from_credential;
use viewer_core::ViewerError;
use viewer_model::PasswordRecord;

use crate::errors::{AppError, AppResult};
use crate::middleware::{
    clear_session_cookie_header, cookie_value, is_https_request, session_cookie_header,
    AuthenticatedSession, SESSION_COOKIE_NAME,
};
use crate::state::{AppState, WebauthnCeremony, SINGLE_USER_ID, SINGLE_USER_NAME};

/// Name of the short-lived cookie correlating a WebAuthn `begin` call with
/// its matching `finish` call (see [`WebauthnCeremony`]).
const CEREMONY_COOKIE_NAME: &str = "webauthn_ceremony";

fn session_response(session: &viewer_model::Session, secure: bool) -> Response {
    let mut response = Json(LoginResponse { expires_at: session.expires_at }).into_response();
    response.headers_mut().insert(axum::http::header::SET_COOKIE, session_cookie_header(session, secure));
    response
}

fn ceremony_cookie_header(id: &str, secure: bool) -> axum::http::HeaderValue {
    let secure_attr = if secure { "; Secure" } else { "" };
    let value = format!("{CEREMONY_COOKIE_NAME}={id}; Path=/; HttpOnly; SameSite=Strict; Max-Age=300{secure_attr}");
    axum::http::HeaderValue::from_str(&value)
        .unwrap_or_else(|_| axum::http::HeaderValue::from_static(""))
}

fn clear_ceremony_cookie_header(secure: bool) -> axum::http::HeaderValue {
    let secure_attr = if secure { "; Secure" } else { "" };
    let value = format!("{CEREMONY_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0{secure_attr}");
    axum::http::HeaderValue::from_str(&value)
        .unwrap_or_else(|_| axum::http::HeaderValue::from_static(""))
}

/// `POST /api/auth/setup` — first-run password creation. Available only
/// while no [`PasswordRecord`] exists; when several setup calls race, the
/// store's
/// [`create_password_record_if_absent`](viewer_core::store::CatalogueStore::create_password_record_if_absent)
/// `INSERT OR IGNORE` guarantees exactly one wins and the rest see
/// `created == false`.
pub async fn setup(
    State(state): State<AppState>,
    JsonExtract(body): JsonExtract<LoginRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let record = hash_password(&body.password)?;
    let created = state.store.create_password_record_if_absent(&record).await?;
    if !created {
        return Err(AppError::forbidden("setup has already completed"));
    }
    Ok(Json(ApiResponse::ok()))
}

/// `POST /api/auth/login` — password login, minting a fresh sliding
/// session on success.
pub async fn login(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    JsonExtract(body): JsonExtract<LoginRequest>,
) -> AppResult<Response> {
    let record = state
        .store
        .get_password_record()
        .await?
        .ok_or_else(|| ViewerError::AuthFailed("no password has been set up".into()))?;

    if !verify_password(&body.password, &record)? {
        return Err(ViewerError::AuthFailed("incorrect password".into()).into());
    }

    let new = new_session(state.config.session_duration_chrono());
    state.store.create_session(&new).await?;
    let secure = is_https_request(&headers, &uri);
    Ok(session_response(&new, secure))
}

/// `POST /api/auth/logout` — drop the session server-side and clear the
/// cookie. Not an error if the cookie was already absent or invalid.
pub async fn logout(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> AppResult<Response> {
    if let Some(token) = cookie_value(&headers, SESSION_COOKIE_NAME) {
        state.store.delete_session(&token).await?;
    }
    let secure = is_https_request(&headers, &uri);
    let mut response = Json(ApiResponse::ok()).into_response();
    response
        .headers_mut()
        .insert(axum::http::header::SET_COOKIE, clear_session_cookie_header(secure));
    Ok(response)
}

/// `GET /api/auth/check` — session status. A missing or expired session is
/// reported as `{authenticated: false}`, not a 401: this endpoint exists
/// precisely so clients can ask without risking one.
pub async fn check(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<AuthCheckResponse>> {
    let Some(token) = cookie_value(&headers, SESSION_COOKIE_NAME) else {
        return Ok(Json(AuthCheckResponse { authenticated: false, expires_at: None }));
    };
    let Some(existing) = state.store.get_session(&token).await? else {
        return Ok(Json(AuthCheckResponse { authenticated: false, expires_at: None }));
    };
    match validate_and_renew(&existing, chrono::Utc::now(), state.config.session_duration_chrono()) {
        Ok(renewed) => {
            state.store.touch_session(&renewed).await?;
            Ok(Json(AuthCheckResponse { authenticated: true, expires_at: Some(renewed.expires_at) }))
        }
        Err(_) => Ok(Json(AuthCheckResponse { authenticated: false, expires_at: None })),
    }
}

/// `PUT /api/auth/password` — change password; requires proof of the
/// current one. Requires an existing session (password or passkey).
pub async fn change_password(
    State(state): State<AppState>,
    AuthenticatedSession(_session): AuthenticatedSession,
    JsonExtract(body): JsonExtract<ChangePasswordRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    let record = state
        .store
        .get_password_record()
        .await?
        .ok_or_else(|| ViewerError::Validation("no password has been set up".into()))?;
    if !verify_password(&body.current_password, &record)? {
        return Err(ViewerError::AuthFailed("incorrect current password".into()).into());
    }
    let new_record: PasswordRecord = hash_password(&body.new_password)?;
    state.store.set_password_record(&new_record).await?;
    Ok(Json(ApiResponse::ok()))
}

/// `POST /api/auth/webauthn/register/begin` — requires an existing session.
/// Excludes already-registered credentials so an authenticator already
/// enrolled refuses to create a duplicate.
pub async fn webauthn_register_begin(
    State(state): State<AppState>,
    AuthenticatedSession(_session): AuthenticatedSession,
    uri: Uri,
    headers: HeaderMap,
) -> AppResult<Response> {
    let existing = state.store.list_credentials().await?;
    let exclude: Vec<CredentialID> = existing
        .iter()
        .filter_map(|c| URL_SAFE_NO_PAD.decode(&c.credential_id).ok())
        .map(CredentialID::from)
        .collect();

    let (challenge, reg_state) = state.webauthn.start_registration(SINGLE_USER_ID, SINGLE_USER_NAME, &exclude)?;

    let ceremony_id = session::generate_token();
    state.webauthn_ceremonies.insert(ceremony_id.clone(), WebauthnCeremony::Registration(reg_state));

    let secure = is_https_request(&headers, &uri);
    let mut response = Json(challenge).into_response();
    response
        .headers_mut()
        .insert(axum::http::header::SET_COOKIE, ceremony_cookie_header(&ceremony_id, secure));
    Ok(response)
}

/// Body of `POST /api/auth/webauthn/register/finish`.
#[derive(Debug, serde::Deserialize)]
pub struct WebauthnRegisterFinishRequest {
    /// The authenticator's attestation response, as produced by
    /// `navigator.credentials.create()`.
    pub credential: RegisterPublicKeyCredential,
    /// Friendly name the user chose for the new passkey.
    pub friendly_name: String,
}

/// `POST /api/auth/webauthn/register/finish` — completes registration and
/// persists the new credential.
pub async fn webauthn_register_finish(
    State(state): State<AppState>,
    AuthenticatedSession(_session): AuthenticatedSession,
    uri: Uri,
    headers: HeaderMap,
    JsonExtract(body): JsonExtract<WebauthnRegisterFinishRequest>,
) -> AppResult<Response> {
    let ceremony_id = cookie_value(&headers, CEREMONY_COOKIE_NAME)
        .ok_or_else(|| ViewerError::Validation("no registration ceremony in progress".into()))?;
    let (_, ceremony) = state
        .webauthn_ceremonies
        .remove(&ceremony_id)
        .ok_or_else(|| ViewerError::Validation("registration ceremony expired or unknown".into()))?;
    let WebauthnCeremony::Registration(reg_state) = ceremony else {
        return Err(ViewerError::Validation("ceremony is not a registration".into()).into());
    };

    let credential = state
        .webauthn
        .finish_registration(&body.credential, &reg_state, body.friendly_name)?;
    state.store.add_credential(&credential).await?;

    let secure = is_https_request(&headers, &uri);
    let mut response = Json(ApiResponse::ok()).into_response();
    response
        .headers_mut()
        .insert(axum::http::header::SET_COOKIE, clear_ceremony_cookie_header(secure));
    Ok(response)
}

/// `POST /api/auth/webauthn/login/begin` — starts an assertion against
/// every currently registered passkey (this server has exactly one user).
pub async fn webauthn_login_begin(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> AppResult<Response> {
    let credentials = state.store.list_credentials().await?;
    if credentials.is_empty() {
        return Err(ViewerError::AuthFailed("no passkeys registered".into()).into());
    }
    let passkeys = credentials
        .iter()
        .map(passkey_from_credential)
        .collect::<Result<Vec<_>, _>>()?;

    let (challenge, auth_state) = state.webauthn.start_assertion(&passkeys)?;

    let ceremony_id = session::generate_token();
    state.webauthn_ceremonies.insert(ceremony_id.clone(), WebauthnCeremony::Authentication(auth_state));

    let secure = is_https_request(&headers, &uri);
    let mut response = Json(challenge).into_response();
    response
        .headers_mut()
        .insert(axum::http::header::SET_COOKIE, ceremony_cookie_header(&ceremony_id, secure));
    Ok(response)
}

/// `POST /api/auth/webauthn/login/finish` — completes the assertion and,
/// on success, mints a new session identical in shape to a password login.
/// A signature-counter regression is treated as a cloned authenticator and
/// fails the assertion.
pub async fn webauthn_login_finish(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    JsonExtract(body): JsonExtract<PublicKeyCredential>,
) -> AppResult<Response> {
    let ceremony_id = cookie_value(&headers, CEREMONY_COOKIE_NAME)
        .ok_or_else(|| ViewerError::Validation("no login ceremony in progress".into()))?;
    let (_, ceremony) = state
        .webauthn_ceremonies
        .remove(&ceremony_id)
        .ok_or_else(|| ViewerError::Validation("login ceremony expired or unknown".into()))?;
    let WebauthnCeremony::Authentication(auth_state) = ceremony else {
        return Err(ViewerError::Validation("ceremony is not a login".into()).into());
    };

    let result = state.webauthn.finish_assertion(&body, &auth_state)?;
    let credential_id = URL_SAFE_NO_PAD.encode(result.cred_id().as_ref());
    let stored = state
        .store
        .get_credential(&credential_id)
        .await?
        .ok_or_else(|| ViewerError::AuthFailed("unknown credential".into()))?;

    if result.counter() != 0 && result.counter() <= stored.signature_count && stored.signature_count != 0 {
        tracing::warn!(credential_id = %credential_id, "webauthn signature counter did not increase");
        return Err(ViewerError::AuthFailed("signature counter regressed".into()).into());
    }
    state.store.touch_credential(&credential_id, result.counter()).await?;

    let new = new_session(state.config.session_duration_chrono());
    state.store.create_session(&new).await?;

    let secure = is_https_request(&headers, &uri);
    let mut response = session_response(&new, secure);
    response
        .headers_mut()
        .insert(axum::http::header::SET_COOKIE, clear_ceremony_cookie_header(secure));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_compare_is_available() {
        assert!(constant_time_str_eq("a", "a"));
        assert!(!constant_time_str_eq("a", "b"));
    }
}
