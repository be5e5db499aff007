#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Route checks between two chosen endpoints.
//!
//! A [`RouteSession`] owns at most one live path. Paths are produced by a
//! pluggable [`RoutePlanner`]: [`StraightLinePlanner`] synthesizes one
//! locally, [`OsrmPlanner`] asks an OSRM-compatible routing service.

pub mod osrm;
pub mod planner;
pub mod session;

use async_trait::async_trait;
use traffic_watch_incident_models::Coordinate;
use traffic_watch_route_models::{Endpoint, RoutePath};
use traffic_watch_spatial::Gazetteer;

pub use osrm::OsrmPlanner;
pub use planner::StraightLinePlanner;
pub use session::{RouteRequest, RouteResolution, RouteSession};

/// Why a pair of endpoints cannot be routed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidEndpoints {
    /// No start was selected.
    #[error("Please select a starting location")]
    MissingStart,
    /// No destination was selected.
    #[error("Please select a destination")]
    MissingEnd,
    /// Start and destination are the same place.
    #[error("Start and destination must be different locations")]
    SameLocation,
    /// A name did not match any known location.
    #[error("Please select valid locations from the list. Unknown location '{0}'")]
    UnknownLocation(String),
    /// An endpoint's coordinates are not a valid position.
    #[error("Location {0} is not a valid position")]
    InvalidPosition(String),
}

/// Errors from route requests and planners.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The endpoints were rejected before any computation.
    #[error(transparent)]
    InvalidEndpoints(#[from] InvalidEndpoints),

    /// The routing service could not be reached.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The routing service answered but produced no usable path.
    #[error("Routing backend error: {message}")]
    Backend {
        /// Description of what went wrong.
        message: String,
    },
}

/// Anything that can compute a path between two positions.
#[async_trait]
pub trait RoutePlanner: Send + Sync {
    /// Human-readable name for log messages.
    fn name(&self) -> &str;

    /// Computes a path from `start` to `end`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if no path could be produced.
    async fn plan(&self, start: Coordinate, end: Coordinate) -> Result<RoutePath, RouteError>;
}

/// Checks that both endpoints are present, valid, and distinct.
///
/// # Errors
///
/// Returns the first [`InvalidEndpoints`] condition found.
pub fn validate_endpoints<'a>(
    start: Option<&'a Endpoint>,
    end: Option<&'a Endpoint>,
) -> Result<(&'a Endpoint, &'a Endpoint), InvalidEndpoints> {
    let start = start.ok_or(InvalidEndpoints::MissingStart)?;
    let end = end.ok_or(InvalidEndpoints::MissingEnd)?;
    for endpoint in [start, end] {
        if !endpoint.position.is_valid() {
            return Err(InvalidEndpoints::InvalidPosition(endpoint.to_string()));
        }
    }
    if start.same_place(end) {
        return Err(InvalidEndpoints::SameLocation);
    }
    Ok((start, end))
}

/// Resolves a location name to a labelled endpoint.
///
/// # Errors
///
/// Returns [`InvalidEndpoints::UnknownLocation`] for names the gazetteer
/// does not know.
pub fn resolve_endpoint(gazetteer: &Gazetteer, name: &str) -> Result<Endpoint, InvalidEndpoints> {
    gazetteer
        .resolve(name)
        .map(|location| Endpoint::named(location.name.clone(), location.coordinate()))
        .ok_or_else(|| InvalidEndpoints::UnknownLocation(name.trim().to_string()))
}
