#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Types shared by the route session and its consumers.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use traffic_watch_incident_models::Coordinate;

/// One end of a route: a position with an optional display label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Name the user picked, if the endpoint came from the location list.
    pub label: Option<String>,
    /// Where the endpoint is.
    pub position: Coordinate,
}

impl Endpoint {
    /// An unnamed endpoint.
    #[must_use]
    pub const fn at(position: Coordinate) -> Self {
        Self {
            label: None,
            position,
        }
    }

    /// A labelled endpoint.
    #[must_use]
    pub fn named(label: impl Into<String>, position: Coordinate) -> Self {
        Self {
            label: Some(label.into()),
            position,
        }
    }

    /// Whether both endpoints denote the same place. Labels are ignored.
    #[must_use]
    pub fn same_place(&self, other: &Self) -> bool {
        self.position == other.position
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.label {
            Some(label) => f.write_str(label),
            None => write!(
                f,
                "({:.5}, {:.5})",
                self.position.latitude, self.position.longitude
            ),
        }
    }
}

/// A computed route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePath {
    /// Ordered positions from start to end.
    pub points: Vec<Coordinate>,
    /// Length of the path in meters.
    pub distance_m: f64,
    /// Expected travel time in seconds, when the backend provides one.
    pub duration_s: Option<f64>,
}

/// Progress of the latest route request.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestState {
    /// No request, or the last one was reset.
    #[default]
    Idle,
    /// A computation is in flight.
    Pending,
    /// A path is available.
    Ready,
    /// The computation failed.
    Failed,
}

/// Observable state of a route session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteState {
    /// Increases with every request and reset.
    pub generation: u64,
    /// Request progress.
    pub request: RequestState,
    /// Selected start.
    pub start: Option<Endpoint>,
    /// Selected destination.
    pub end: Option<Endpoint>,
    /// Path of a [`RequestState::Ready`] session.
    pub path: Option<RoutePath>,
    /// Error detail of a [`RequestState::Failed`] session.
    pub error: Option<String>,
}

impl RouteState {
    /// Whether a path should be drawn.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.request, RequestState::Ready)
    }
}
