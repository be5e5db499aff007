#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Result types for the dashboard's aggregations.
//!
//! These are plain serializable values; the functions that compute them
//! live in `traffic_watch_analytics`.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use traffic_watch_incident_models::TypeCategory;

/// Incident count per type category.
pub type TypeCounts = BTreeMap<TypeCategory, u64>;

/// Incident count per status, keyed by the status' wire string.
pub type StatusCounts = BTreeMap<String, u64>;

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window. No validation happens here; aggregations reject
    /// empty windows when they are used.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `hours` hours ending at `end`, or `None` if the start would
    /// fall outside the representable date range.
    #[must_use]
    pub fn trailing_hours(end: DateTime<Utc>, hours: u32) -> Option<Self> {
        let span = TimeDelta::try_hours(i64::from(hours))?;
        Some(Self {
            start: end.checked_sub_signed(span)?,
            end,
        })
    }

    /// Whether `instant` falls inside the window.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Length of the window. Negative if `end` precedes `start`.
    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Whether the window contains no instants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// One histogram bin covering `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBucket {
    /// Inclusive start of the bin.
    pub start: DateTime<Utc>,
    /// Exclusive end of the bin. The last bin may be shorter than the
    /// others.
    pub end: DateTime<Utc>,
    /// Incidents whose timestamp falls in the bin.
    pub count: u64,
}

/// A zone's position in the hotspot ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneRank {
    /// Zone name.
    pub zone: String,
    /// Incidents located in the zone.
    pub count: u64,
    /// The same incidents broken down by type category.
    pub by_type: TypeCounts,
}

/// Headline figures for the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    /// Snapshot revision the summary was computed from.
    pub revision: u64,
    /// All incidents in the snapshot.
    pub total: u64,
    /// Incidents counted as high priority.
    pub high_priority: u64,
    /// Incidents with a valid map position.
    pub mappable: u64,
    /// Counts per type category.
    pub by_type: TypeCounts,
    /// Counts per status.
    pub by_status: StatusCounts,
    /// Timestamp of the most recent incident.
    pub newest: Option<DateTime<Utc>>,
}
