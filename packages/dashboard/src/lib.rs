#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! One traffic dashboard session.
//!
//! A [`DashboardSession`] owns exactly one incident store, one poller
//! feeding it, and one route session, all reporting to a shared
//! [`Diagnostics`] channel. Views receive `Arc` handles to these rather
//! than building their own, so the incident service is polled once no
//! matter how many views are open.

pub mod config;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use traffic_watch_analytics::{AggregateError, HOUR};
use traffic_watch_analytics_models::{DashboardSummary, HistogramBucket, TimeWindow, ZoneRank};
use traffic_watch_bus::Diagnostics;
use traffic_watch_poller::{Poller, PollerStatus};
use traffic_watch_route::{RouteError, RoutePlanner, RouteSession};
use traffic_watch_source::http::HttpIncidentFetcher;
use traffic_watch_source::{FetchError, IncidentFetcher};
use traffic_watch_spatial::{Gazetteer, ZoneIndex};
use traffic_watch_store::IncidentStore;

pub use config::{BackoffConfig, ConfigError, DashboardConfig, RoutingConfig};

/// Errors building a [`DashboardSession`].
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The incident fetcher could not be built.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The route planner could not be built.
    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Everything the dashboard's overview shows, computed from one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardReport {
    /// Headline counters.
    pub summary: DashboardSummary,
    /// Hotspot zones, busiest first.
    pub zones: Vec<ZoneRank>,
    /// Hourly counts over the trend window.
    pub trend: Vec<HistogramBucket>,
    /// Busiest hour of the trend window, if any incident fell in it.
    pub peak: Option<HistogramBucket>,
}

/// Shared state of one dashboard.
pub struct DashboardSession {
    config: DashboardConfig,
    diagnostics: Diagnostics,
    store: Arc<IncidentStore>,
    poller: Arc<Poller>,
    route: Arc<RouteSession>,
    zones: Arc<ZoneIndex>,
    gazetteer: Arc<Gazetteer>,
}

impl std::fmt::Debug for DashboardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardSession")
            .field("api_url", &self.config.api_url)
            .field("revision", &self.store.revision())
            .field("poller", &self.poller.status())
            .finish_non_exhaustive()
    }
}

impl DashboardSession {
    /// Builds a session talking to the configured incident service and
    /// route planner.
    ///
    /// # Errors
    ///
    /// Returns [`DashboardError`] if an HTTP client, the zone index, or
    /// the gazetteer cannot be built.
    pub fn new(config: DashboardConfig) -> Result<Self, DashboardError> {
        let mut fetcher = HttpIncidentFetcher::new(&config.api_url)?;
        if let Some(token) = &config.access_token {
            fetcher = fetcher.with_access_token(token.clone());
        }
        let planner = config.route_planner()?;
        Self::with_components(config, Arc::new(fetcher), planner)
    }

    /// Builds a session around the given fetcher and planner.
    ///
    /// # Errors
    ///
    /// Returns [`DashboardError::Config`] if the zone index or gazetteer
    /// cannot be built.
    pub fn with_components(
        config: DashboardConfig,
        fetcher: Arc<dyn IncidentFetcher>,
        planner: Arc<dyn RoutePlanner>,
    ) -> Result<Self, DashboardError> {
        let zones = Arc::new(config.zone_index()?);
        let gazetteer = Arc::new(config.gazetteer()?);

        let diagnostics = Diagnostics::new();
        let store = Arc::new(IncidentStore::new(diagnostics.clone()));
        let poller = Arc::new(
            Poller::new(Arc::clone(&store), fetcher, diagnostics.clone())
                .with_backoff(config.backoff_policy()),
        );
        let route = Arc::new(RouteSession::new(planner, diagnostics.clone()));

        log::debug!(
            "Dashboard session for {} with {} zones and {} named locations",
            config.api_url,
            zones.len(),
            gazetteer.len()
        );

        Ok(Self {
            config,
            diagnostics,
            store,
            poller,
            route,
            zones,
            gazetteer,
        })
    }

    /// Starts polling at the configured interval.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `tokio` runtime.
    pub fn start(&self) {
        self.poller.start(self.config.poll_interval());
    }

    /// Stops polling. The store keeps its last snapshot.
    pub fn stop(&self) {
        self.poller.stop();
    }

    /// Stops polling, resets the route session, and drops every listener.
    pub fn dispose(&self) {
        self.poller.stop();
        self.route.dispose();
        self.store.dispose();
        log::info!("Dashboard session disposed");
    }

    /// The configuration this session was built from.
    #[must_use]
    pub const fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// The session-wide diagnostics channel.
    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Shared incident store.
    #[must_use]
    pub fn store(&self) -> Arc<IncidentStore> {
        Arc::clone(&self.store)
    }

    /// Shared poller.
    #[must_use]
    pub fn poller(&self) -> Arc<Poller> {
        Arc::clone(&self.poller)
    }

    /// Shared route session.
    #[must_use]
    pub fn route(&self) -> Arc<RouteSession> {
        Arc::clone(&self.route)
    }

    /// Hotspot zones.
    #[must_use]
    pub fn zones(&self) -> Arc<ZoneIndex> {
        Arc::clone(&self.zones)
    }

    /// Named locations offered as route endpoints.
    #[must_use]
    pub fn gazetteer(&self) -> Arc<Gazetteer> {
        Arc::clone(&self.gazetteer)
    }

    /// Poller health.
    #[must_use]
    pub fn poller_status(&self) -> PollerStatus {
        self.poller.status()
    }

    /// Headline counters for the current snapshot.
    #[must_use]
    pub fn summary(&self) -> DashboardSummary {
        traffic_watch_analytics::summarize(&self.store.get())
    }

    /// Hotspot ranking for the current snapshot.
    #[must_use]
    pub fn zone_ranking(&self) -> Vec<ZoneRank> {
        traffic_watch_analytics::rank_zones(&self.store.get(), self.zones.as_ref())
    }

    /// Builds the overview from one snapshot, with an hourly trend over
    /// the `trend_hours` hours ending at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError`] if `trend_hours` is zero, exceeds the
    /// bucket limit, or reaches past the representable date range.
    pub fn report(
        &self,
        now: DateTime<Utc>,
        trend_hours: u32,
    ) -> Result<DashboardReport, AggregateError> {
        let window = TimeWindow::trailing_hours(now, trend_hours)
            .ok_or(AggregateError::WindowOutOfRange { hours: trend_hours })?;
        let snapshot = self.store.get();
        let trend = traffic_watch_analytics::hourly_histogram(&snapshot, window, HOUR)?;
        let peak = traffic_watch_analytics::peak_bucket(&trend).copied();

        Ok(DashboardReport {
            summary: traffic_watch_analytics::summarize(&snapshot),
            zones: traffic_watch_analytics::rank_zones(&snapshot, self.zones.as_ref()),
            trend,
            peak,
        })
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        self.poller.stop();
    }
}
