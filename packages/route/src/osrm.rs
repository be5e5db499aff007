//! OSRM routing service client.
//!
//! Uses the `route` service with full GeoJSON geometry:
//! `GET {base}/route/v1/{profile}/{lng},{lat};{lng},{lat}?overview=full&geometries=geojson`.
//!
//! See <https://project-osrm.org/docs/v5.24.0/api/#route-service>

use std::time::Duration;

use async_trait::async_trait;
use traffic_watch_incident_models::Coordinate;
use traffic_watch_route_models::RoutePath;

use crate::{RouteError, RoutePlanner};

/// Public OSRM demo server.
pub const DEFAULT_OSRM_URL: &str = "https://router.project-osrm.org";

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delegates route computation to an OSRM-compatible service.
#[derive(Debug, Clone)]
pub struct OsrmPlanner {
    client: reqwest::Client,
    base_url: String,
    profile: String,
}

impl OsrmPlanner {
    /// Creates a planner for the service at `base_url` using the
    /// `driving` profile.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, RouteError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Creates a planner sharing an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            profile: "driving".to_string(),
        }
    }

    /// Uses another routing profile, e.g. `"foot"`.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// URL of the route query between two positions.
    #[must_use]
    pub fn route_url(&self, start: Coordinate, end: Coordinate) -> String {
        format!(
            "{}/route/v1/{}/{},{};{},{}?overview=full&geometries=geojson",
            self.base_url,
            self.profile,
            start.longitude,
            start.latitude,
            end.longitude,
            end.latitude
        )
    }
}

#[async_trait]
impl RoutePlanner for OsrmPlanner {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn plan(&self, start: Coordinate, end: Coordinate) -> Result<RoutePath, RouteError> {
        let resp = self.client.get(self.route_url(start, end)).send().await?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| RouteError::Backend {
            message: format!("HTTP {status}: unreadable response: {e}"),
        })?;
        parse_response(&body)
    }
}

/// Parses an OSRM route response, taking the first route.
fn parse_response(body: &serde_json::Value) -> Result<RoutePath, RouteError> {
    let code = body["code"].as_str().unwrap_or("Missing");
    if code != "Ok" {
        let message = body["message"].as_str().unwrap_or("no message");
        return Err(RouteError::Backend {
            message: format!("{code}: {message}"),
        });
    }

    let route = body["routes"]
        .as_array()
        .and_then(|routes| routes.first())
        .ok_or_else(|| RouteError::Backend {
            message: "OSRM response has no routes".to_string(),
        })?;

    let coordinates = route["geometry"]["coordinates"]
        .as_array()
        .ok_or_else(|| RouteError::Backend {
            message: "Missing geometry in OSRM route".to_string(),
        })?;

    let points = coordinates
        .iter()
        .map(|pair| match (pair[0].as_f64(), pair[1].as_f64()) {
            (Some(lng), Some(lat)) => Ok(Coordinate::new(lat, lng)),
            _ => Err(RouteError::Backend {
                message: format!("Invalid coordinate in OSRM geometry: {pair}"),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if points.len() < 2 {
        return Err(RouteError::Backend {
            message: "OSRM geometry has fewer than two points".to_string(),
        });
    }

    let distance_m = route["distance"].as_f64().ok_or_else(|| RouteError::Backend {
        message: "Missing distance in OSRM route".to_string(),
    })?;

    Ok(RoutePath {
        points,
        distance_m,
        duration_s: route["duration"].as_f64(),
    })
}
