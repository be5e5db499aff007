//! HTTP client for the incident service.
//!
//! No retries happen here: a failed fetch is reported to the poller,
//! which keeps the last good snapshot and tries again on its next cycle.

use std::time::Duration;

use async_trait::async_trait;
use traffic_watch_incident_models::RawIncident;

use crate::{FetchError, IncidentFetcher};

/// Default base URL of the incident service.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Per-request timeout. Kept below the default poll interval so a hung
/// request cannot stall more than one cycle.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(4);

/// Maximum length of the response body preview included in errors.
const BODY_PREVIEW_LEN: usize = 200;

/// Fetches the incident collection from `GET {api}/incidents/`.
#[derive(Debug, Clone)]
pub struct HttpIncidentFetcher {
    client: reqwest::Client,
    url: String,
    access_token: Option<String>,
}

impl HttpIncidentFetcher {
    /// Creates a fetcher for the service at `api_url` with its own client.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(api_url: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Creates a fetcher sharing an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, api_url: &str) -> Self {
        Self {
            client,
            url: incidents_url(api_url),
            access_token: None,
        }
    }

    /// Sends `token` as a bearer token on every request.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// The full incidents URL this fetcher polls.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl IncidentFetcher for HttpIncidentFetcher {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<RawIncident>, FetchError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let body = send_text(request).await?;
        decode_incidents(&body)
    }
}

/// Builds the incidents URL from an API base URL.
#[must_use]
pub fn incidents_url(api_url: &str) -> String {
    format!("{}/incidents/", api_url.trim_end_matches('/'))
}

/// Sends a request and returns the body of a successful response.
///
/// # Errors
///
/// Returns [`FetchError::Http`] on transport failure and
/// [`FetchError::Status`] for any non-2xx response.
pub async fn send_text(request: reqwest::RequestBuilder) -> Result<String, FetchError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        });
    }
    Ok(response.text().await?)
}

/// Decodes the incident array, keeping every element.
///
/// # Errors
///
/// Returns [`FetchError::Decode`] if the body is not JSON or its top level
/// is not an array.
pub fn decode_incidents(body: &str) -> Result<Vec<RawIncident>, FetchError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| FetchError::Decode {
            message: format!("{e} (body preview: {})", preview(body)),
        })?;

    let serde_json::Value::Array(items) = value else {
        return Err(FetchError::Decode {
            message: format!("expected a JSON array, got: {}", preview(body)),
        });
    };

    Ok(items.into_iter().map(RawIncident::from_value).collect())
}

fn preview(body: &str) -> String {
    if body.len() > BODY_PREVIEW_LEN {
        let cut = (0..=BODY_PREVIEW_LEN)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
pub(crate) fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}
