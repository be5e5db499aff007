//! Local planner that needs no routing service.

use async_trait::async_trait;
use traffic_watch_incident_models::Coordinate;
use traffic_watch_route_models::RoutePath;
use traffic_watch_spatial::distance::path_length_meters;

use crate::{RoutePlanner, RouteError};

/// Draws a straight segment between the endpoints.
///
/// `interpolation_points` extra points are spaced evenly along the
/// segment so the path renders smoothly at any zoom.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StraightLinePlanner {
    /// Points inserted between start and end.
    pub interpolation_points: usize,
}

impl StraightLinePlanner {
    /// A planner that inserts `interpolation_points` intermediate points.
    #[must_use]
    pub const fn new(interpolation_points: usize) -> Self {
        Self {
            interpolation_points,
        }
    }

    /// Builds the path synchronously.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn path(&self, start: Coordinate, end: Coordinate) -> RoutePath {
        let steps = self.interpolation_points + 1;
        let mut points = Vec::with_capacity(steps + 1);
        points.push(start);
        points.extend((1..steps).map(|i| {
            let t = i as f64 / steps as f64;
            Coordinate::new(
                (end.latitude - start.latitude).mul_add(t, start.latitude),
                (end.longitude - start.longitude).mul_add(t, start.longitude),
            )
        }));
        points.push(end);

        RoutePath {
            distance_m: path_length_meters(&points),
            points,
            duration_s: None,
        }
    }
}

#[async_trait]
impl RoutePlanner for StraightLinePlanner {
    fn name(&self) -> &'static str {
        "straight-line"
    }

    async fn plan(&self, start: Coordinate, end: Coordinate) -> Result<RoutePath, RouteError> {
        Ok(self.path(start, end))
    }
}
