use serde::{Deserialize, Serialize};

/// Body of `POST /api/auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// The password to check against the stored record.
    pub password: String,
}

/// Body of `PUT /api/auth/password`.
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    /// The current password, for proof of ownership.
    pub current_password: String,
    /// The new password; must be at least 6 characters.
    pub new_password: String,
}

/// Response body of `GET /api/auth/check`.
#[derive(Debug, Serialize)]
pub struct AuthCheckResponse {
    /// Whether the request carried a valid session.
    pub authenticated: bool,
    /// Session expiry, if authenticated.
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Response body of a successful login: carries no token (the session lives
/// in the cookie), only the expiry clients may want to display.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// When the new session expires.
    pub expires_at: chrono::DateTime<chrono::Utc>,
}
