//! Client for the incident service's account endpoints.
//!
//! Credential storage and login screens live outside this crate; this
//! module only speaks the wire protocol and hands back the token.

use serde::{Deserialize, Serialize};

use crate::FetchError;
use crate::http::send_text;

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
    /// Display name.
    pub full_name: String,
    /// Role, e.g. `"police"` or `"public"`.
    pub role: String,
    /// Contact number.
    pub phone_number: Option<String>,
    /// Department or unit.
    pub department: Option<String>,
}

/// Token returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// The bearer token.
    pub access_token: String,
    /// Token scheme, normally `"bearer"`.
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Thin client for `/auth/*`.
#[derive(Debug, Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    /// Creates a client for the service at `api_url`.
    #[must_use]
    pub fn new(client: reqwest::Client, api_url: &str) -> Self {
        Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Exchanges credentials for an access token.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Status`] for rejected credentials and
    /// [`FetchError::Decode`] if the response lacks a token.
    pub async fn login(&self, request: &LoginRequest) -> Result<AccessToken, FetchError> {
        let body = send_text(
            self.client
                .post(format!("{}/auth/login", self.base_url))
                .json(request),
        )
        .await?;
        parse_token(&body)
    }

    /// Creates an account. The response body is returned as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the request fails or the body is not JSON.
    pub async fn register(
        &self,
        request: &RegisterRequest,
    ) -> Result<serde_json::Value, FetchError> {
        let body = send_text(
            self.client
                .post(format!("{}/auth/register", self.base_url))
                .json(request),
        )
        .await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode {
            message: format!("register response: {e}"),
        })
    }
}

fn parse_token(body: &str) -> Result<AccessToken, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Decode {
        message: format!("login response: {e}"),
    })
}
