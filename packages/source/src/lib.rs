#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident feed access for the traffic dashboard.
//!
//! The poller depends only on the [`IncidentFetcher`] trait. The
//! production implementation, [`http::HttpIncidentFetcher`], issues
//! `GET {api}/incidents/` and decodes the array leniently; tests plug in
//! scripted fetchers instead.

pub mod auth;
pub mod http;

use async_trait::async_trait;
use traffic_watch_incident_models::RawIncident;

/// Errors that can occur while fetching from the incident service.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Response status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// The body was not the expected JSON shape.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of what went wrong.
        message: String,
    },
}

impl FetchError {
    /// Returns `true` if the next attempt may succeed without any change
    /// on the client side (timeouts, connection resets, 429, 5xx).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => http::is_transient(e),
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Decode { .. } => true,
        }
    }
}

/// Anything that can produce the full incident collection.
#[async_trait]
pub trait IncidentFetcher: Send + Sync {
    /// Human-readable name for log messages.
    fn name(&self) -> &str;

    /// Fetches every incident currently known to the service.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the collection could not be retrieved or
    /// is not a JSON array. Individual malformed elements are not errors;
    /// they are returned as-is and rejected later by validation.
    async fn fetch(&self) -> Result<Vec<RawIncident>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_errors() {
        let status = |status| FetchError::Status {
            status,
            url: "http://localhost:8000/incidents/".to_string(),
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(401).is_transient());
    }
}
