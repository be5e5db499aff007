//! Dashboard configuration.
//!
//! Loaded from TOML; every field has a default, so an empty document is a
//! valid configuration. A few settings can be overridden from the
//! environment:
//!
//! * `TRAFFIC_WATCH_API_URL`
//! * `TRAFFIC_WATCH_POLL_INTERVAL_MS`
//! * `TRAFFIC_WATCH_ACCESS_TOKEN`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use traffic_watch_poller::{BackoffPolicy, ExponentialBackoff, FixedInterval};
use traffic_watch_route::{OsrmPlanner, RouteError, RoutePlanner, StraightLinePlanner};
use traffic_watch_spatial::{Gazetteer, SpatialError, ZoneIndex};

/// Environment variable overriding [`DashboardConfig::api_url`].
pub const ENV_API_URL: &str = "TRAFFIC_WATCH_API_URL";
/// Environment variable overriding [`DashboardConfig::poll_interval_ms`].
pub const ENV_POLL_INTERVAL_MS: &str = "TRAFFIC_WATCH_POLL_INTERVAL_MS";
/// Environment variable overriding [`DashboardConfig::access_token`].
pub const ENV_ACCESS_TOKEN: &str = "TRAFFIC_WATCH_ACCESS_TOKEN";

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The document is not valid configuration TOML.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A zone or location file is invalid.
    #[error(transparent)]
    Spatial(#[from] SpatialError),

    /// An environment override could not be parsed.
    #[error("Invalid value '{value}' for {name}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },
}

/// Top-level dashboard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DashboardConfig {
    /// Base URL of the incident service.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Milliseconds between poll cycles.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bearer token sent with incident fetches, if any.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Delay policy after failed polls.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// How route paths are computed.
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Zone file replacing the bundled Kigali zones.
    #[serde(default)]
    pub zones_file: Option<PathBuf>,
    /// Location file replacing the bundled Kigali locations.
    #[serde(default)]
    pub locations_file: Option<PathBuf>,
}

/// Delay policy, tagged by `type` in TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Always wait the poll interval.
    #[default]
    Fixed,
    /// Double the wait after each consecutive failure.
    Exponential {
        /// Upper bound on the wait in milliseconds.
        #[serde(default = "default_backoff_max_ms")]
        max_ms: u64,
    },
}

/// Route planner, tagged by `type` in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingConfig {
    /// Local straight segment between the endpoints.
    StraightLine {
        /// Points inserted between start and end.
        #[serde(default)]
        interpolation_points: usize,
    },
    /// OSRM-compatible routing service.
    Osrm {
        /// Service base URL.
        #[serde(default = "default_osrm_url")]
        base_url: String,
        /// Routing profile.
        #[serde(default = "default_osrm_profile")]
        profile: String,
    },
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self::StraightLine {
            interpolation_points: 0,
        }
    }
}

fn default_api_url() -> String {
    traffic_watch_source::http::DEFAULT_API_URL.to_string()
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

const fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_osrm_url() -> String {
    traffic_watch_route::osrm::DEFAULT_OSRM_URL.to_string()
}

fn default_osrm_profile() -> String {
    "driving".to_string()
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            poll_interval_ms: default_poll_interval_ms(),
            access_token: None,
            backoff: BackoffConfig::default(),
            routing: RoutingConfig::default(),
            zones_file: None,
            locations_file: None,
        }
    }
}

impl DashboardConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] for malformed documents or unknown
    /// keys.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::de::from_str(toml_str)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&read(path)?)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparseable values.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup`. Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparseable values.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(url) = get(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(value) = get(ENV_POLL_INTERVAL_MS) {
            let parsed = value.trim().parse::<u64>().ok().filter(|&ms| ms > 0);
            self.poll_interval_ms = parsed.ok_or(ConfigError::InvalidEnv {
                name: ENV_POLL_INTERVAL_MS,
                value,
            })?;
        }
        if let Some(token) = get(ENV_ACCESS_TOKEN) {
            self.access_token = Some(token);
        }
        Ok(self)
    }

    /// The poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Builds the configured delay policy.
    #[must_use]
    pub fn backoff_policy(&self) -> Arc<dyn BackoffPolicy> {
        match self.backoff {
            BackoffConfig::Fixed => Arc::new(FixedInterval),
            BackoffConfig::Exponential { max_ms } => {
                Arc::new(ExponentialBackoff::new(Duration::from_millis(max_ms)))
            }
        }
    }

    /// Builds the configured route planner.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if the HTTP client cannot be built.
    pub fn route_planner(&self) -> Result<Arc<dyn RoutePlanner>, RouteError> {
        Ok(match &self.routing {
            RoutingConfig::StraightLine {
                interpolation_points,
            } => Arc::new(StraightLinePlanner::new(*interpolation_points)),
            RoutingConfig::Osrm { base_url, profile } => {
                Arc::new(OsrmPlanner::new(base_url)?.with_profile(profile.clone()))
            }
        })
    }

    /// Builds the zone index, from [`DashboardConfig::zones_file`] if set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn zone_index(&self) -> Result<ZoneIndex, ConfigError> {
        Ok(match &self.zones_file {
            Some(path) => ZoneIndex::from_toml(&read(path)?)?,
            None => ZoneIndex::kigali()?,
        })
    }

    /// Builds the gazetteer, from [`DashboardConfig::locations_file`] if set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn gazetteer(&self) -> Result<Gazetteer, ConfigError> {
        Ok(match &self.locations_file {
            Some(path) => Gazetteer::from_toml(&read(path)?)?,
            None => Gazetteer::kigali()?,
        })
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = DashboardConfig::from_toml("").unwrap();
        assert_eq!(config, DashboardConfig::default());
        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.backoff, BackoffConfig::Fixed);
        assert!(matches!(config.routing, RoutingConfig::StraightLine { .. }));
    }

    #[test]
    fn parses_tagged_sections() {
        let config = DashboardConfig::from_toml(
            r#"
            api_url = "https://incidents.example.rw"
            poll_interval_ms = 10000

            [backoff]
            type = "exponential"
            max_ms = 120000

            [routing]
            type = "osrm"
            base_url = "http://osrm:5000"
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.backoff, BackoffConfig::Exponential { max_ms: 120_000 });
        assert_eq!(
            config.routing,
            RoutingConfig::Osrm {
                base_url: "http://osrm:5000".to_string(),
                profile: "driving".to_string(),
            }
        );
    }

    #[test]
    fn exponential_backoff_max_defaults() {
        let config = DashboardConfig::from_toml("[backoff]\ntype = \"exponential\"").unwrap();
        assert_eq!(config.backoff, BackoffConfig::Exponential { max_ms: 60_000 });
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(DashboardConfig::from_toml("poll_interval = 5").is_err());
    }

    #[test]
    fn env_overrides_take_precedence() {
        let config = DashboardConfig::default()
            .with_overrides(env(&[
                (ENV_API_URL, "http://10.0.0.5:8000"),
                (ENV_POLL_INTERVAL_MS, "2500"),
                (ENV_ACCESS_TOKEN, "secret"),
            ]))
            .unwrap();
        assert_eq!(config.api_url, "http://10.0.0.5:8000");
        assert_eq!(config.poll_interval(), Duration::from_millis(2500));
        assert_eq!(config.access_token.as_deref(), Some("secret"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let config = DashboardConfig::default()
            .with_overrides(env(&[(ENV_API_URL, "  ")]))
            .unwrap();
        assert_eq!(config.api_url, "http://localhost:8000");
    }

    #[test]
    fn rejects_bad_interval_override() {
        for bad in ["soon", "0", "-5"] {
            let err = DashboardConfig::default()
                .with_overrides(env(&[(ENV_POLL_INTERVAL_MS, bad)]))
                .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidEnv { name, .. } if name == ENV_POLL_INTERVAL_MS));
        }
    }

    #[test]
    fn builds_components_from_defaults() {
        let config = DashboardConfig::default();
        assert_eq!(config.route_planner().unwrap().name(), "straight-line");
        assert_eq!(config.zone_index().unwrap().len(), 7);
        assert_eq!(config.gazetteer().unwrap().len(), 6);
    }

    #[test]
    fn missing_zone_file_is_an_io_error() {
        let config = DashboardConfig {
            zones_file: Some(PathBuf::from("/nonexistent/zones.toml")),
            ..DashboardConfig::default()
        };
        assert!(matches!(config.zone_index(), Err(ConfigError::Io { .. })));
    }
}
