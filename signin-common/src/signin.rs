//! Sign-in request and token response types.

use serde::{Deserialize, Serialize};

/// Token type advertised in every successful sign-in response.
pub const BEARER: &str = "Bearer";

/// Body of a sign-in request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    /// Opaque identity token issued by the provider.
    pub token: String,
    /// Provider name, matched case-insensitively (e.g. "google").
    pub provider: String,
}

/// Public view of an account returned alongside issued tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDto {
    pub name: String,
    pub username: String,
    pub picture: String,
}

/// Successful sign-in response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(rename = "type")]
    pub token_type: String,
    /// Access token lifetime in seconds (0 when no access token was issued).
    pub expires_in: u64,
    pub refresh_token: String,
    pub user: UserDto,
}

impl TokenResponse {
    pub fn new(refresh_token: String, user: UserDto) -> Self {
        Self {
            access_token: String::new(),
            token_type: BEARER.to_string(),
            expires_in: 0,
            refresh_token,
            user,
        }
    }

    pub fn with_access_token(mut self, access_token: String, expires_in: u64) -> Self {
        self.access_token = access_token;
        self.expires_in = expires_in;
        self
    }
}
