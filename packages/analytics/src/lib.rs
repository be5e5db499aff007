#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Aggregations behind the dashboard's charts and counters.
//!
//! Every function here is pure: it reads a [`Snapshot`] and returns a
//! fresh value. Nothing consults the wall clock, so the same snapshot and
//! arguments always produce the same result.

use std::collections::BTreeMap;

use chrono::TimeDelta;
use thiserror::Error;
use traffic_watch_analytics_models::{
    DashboardSummary, HistogramBucket, StatusCounts, TimeWindow, TypeCounts, ZoneRank,
};
use traffic_watch_incident_models::{Coordinate, IncidentStatus, TypeCategory};
use traffic_watch_store::Snapshot;

/// One hour, the bucket size used by the dashboard's trend chart.
pub const HOUR: TimeDelta = TimeDelta::hours(1);

/// Upper bound on the number of bins a histogram may have.
pub const MAX_BUCKETS: i64 = 10_000;

/// Errors from aggregations with caller-supplied parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    /// Bucket size was zero, negative, or below one millisecond.
    #[error("Bucket size must be at least one millisecond, got {0}")]
    InvalidBucketSize(TimeDelta),

    /// The window's end is not after its start.
    #[error("Empty time window: {window:?}")]
    EmptyWindow {
        /// The rejected window.
        window: TimeWindow,
    },

    /// A trailing window reaching before the earliest representable time.
    #[error("A {hours}-hour window ending now is out of range")]
    WindowOutOfRange {
        /// Requested window length.
        hours: u32,
    },

    /// The window would be split into more than [`MAX_BUCKETS`] bins.
    #[error("Window needs {buckets} buckets; at most {max} are allowed", max = MAX_BUCKETS)]
    TooManyBuckets {
        /// Bins the request would have produced.
        buckets: i64,
    },
}

/// Maps a map position to the name of the zone containing it.
pub trait ZoneLookup {
    /// Returns the zone containing `position`, if any.
    fn zone_of(&self, position: Coordinate) -> Option<String>;
}

impl<F> ZoneLookup for F
where
    F: Fn(Coordinate) -> Option<String>,
{
    fn zone_of(&self, position: Coordinate) -> Option<String> {
        self(position)
    }
}

/// Counts incidents per type category.
///
/// Every known category is present, at zero if necessary.
/// [`TypeCategory::Other`] is present only when at least one incident has
/// an unrecognized type. The values always sum to the snapshot size.
#[must_use]
pub fn counts_by_type(snapshot: &Snapshot) -> TypeCounts {
    let mut counts: TypeCounts = TypeCategory::known()
        .iter()
        .map(|&category| (category, 0))
        .collect();
    for incident in snapshot {
        *counts.entry(incident.incident_type.category()).or_insert(0) += 1;
    }
    counts
}

/// Counts incidents per status.
///
/// Known statuses are always present; unrecognized statuses appear under
/// their verbatim string.
#[must_use]
pub fn counts_by_status(snapshot: &Snapshot) -> StatusCounts {
    let mut counts: StatusCounts = IncidentStatus::known()
        .iter()
        .map(|status| (status.as_str().to_string(), 0))
        .collect();
    for incident in snapshot {
        *counts.entry(incident.status.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Bins incident timestamps into fixed-width buckets across `window`.
///
/// Bins start at `window.start` and are `bucket_size` wide; the final bin
/// is cut short at `window.end` when the window is not an exact multiple
/// of the bucket size. Incidents outside the window are excluded.
///
/// # Errors
///
/// * [`AggregateError::InvalidBucketSize`] if `bucket_size` is under one
///   millisecond
/// * [`AggregateError::EmptyWindow`] if the window has no duration
/// * [`AggregateError::TooManyBuckets`] if more than [`MAX_BUCKETS`] bins
///   would be produced
pub fn hourly_histogram(
    snapshot: &Snapshot,
    window: TimeWindow,
    bucket_size: TimeDelta,
) -> Result<Vec<HistogramBucket>, AggregateError> {
    let bucket_ms = bucket_size.num_milliseconds();
    if bucket_ms <= 0 {
        return Err(AggregateError::InvalidBucketSize(bucket_size));
    }
    if window.is_empty() {
        return Err(AggregateError::EmptyWindow { window });
    }

    let window_ms = window.duration().num_milliseconds();
    let bucket_count = window_ms.div_euclid(bucket_ms) + i64::from(window_ms % bucket_ms != 0);
    if bucket_count > MAX_BUCKETS {
        return Err(AggregateError::TooManyBuckets {
            buckets: bucket_count,
        });
    }

    let mut buckets: Vec<HistogramBucket> = (0..bucket_count)
        .map(|i| {
            let start = window.start + TimeDelta::milliseconds(i * bucket_ms);
            let end = (start + TimeDelta::milliseconds(bucket_ms)).min(window.end);
            HistogramBucket {
                start,
                end,
                count: 0,
            }
        })
        .collect();

    for incident in snapshot {
        if !window.contains(incident.timestamp) {
            continue;
        }
        let offset = (incident.timestamp - window.start).num_milliseconds();
        let index = usize::try_from(offset / bucket_ms).unwrap_or(usize::MAX);
        if let Some(bucket) = buckets.get_mut(index) {
            bucket.count += 1;
        }
    }

    Ok(buckets)
}

/// Returns the bin with the highest count, the earliest one on ties.
///
/// Returns `None` if there are no bins or every bin is empty.
#[must_use]
pub fn peak_bucket(buckets: &[HistogramBucket]) -> Option<&HistogramBucket> {
    buckets
        .iter()
        .filter(|bucket| bucket.count > 0)
        .fold(None, |best: Option<&HistogramBucket>, bucket| match best {
            Some(current) if current.count >= bucket.count => Some(current),
            _ => Some(bucket),
        })
}

/// Ranks zones by the number of incidents located in them.
///
/// Zones are ordered by descending count, ties broken by zone name
/// ascending. Incidents without a valid map position, or outside every
/// zone, are not counted. Zones with no incidents are omitted.
#[must_use]
pub fn rank_zones(snapshot: &Snapshot, zones: &impl ZoneLookup) -> Vec<ZoneRank> {
    let mut by_zone: BTreeMap<String, ZoneRank> = BTreeMap::new();
    let mut unzoned = 0_usize;

    for (incident, position) in snapshot.mappable() {
        let Some(zone) = zones.zone_of(position) else {
            unzoned += 1;
            continue;
        };
        let rank = by_zone.entry(zone).or_insert_with_key(|zone| ZoneRank {
            zone: zone.clone(),
            count: 0,
            by_type: TypeCounts::new(),
        });
        rank.count += 1;
        *rank
            .by_type
            .entry(incident.incident_type.category())
            .or_insert(0) += 1;
    }

    if unzoned > 0 {
        log::trace!("{unzoned} incident(s) outside every zone");
    }

    let mut ranking: Vec<ZoneRank> = by_zone.into_values().collect();
    ranking.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.zone.cmp(&b.zone)));
    ranking
}

/// Computes the dashboard headline for a snapshot.
#[must_use]
pub fn summarize(snapshot: &Snapshot) -> DashboardSummary {
    DashboardSummary {
        revision: snapshot.revision(),
        total: snapshot.len() as u64,
        high_priority: snapshot
            .iter()
            .filter(|incident| incident.is_high_priority())
            .count() as u64,
        mappable: snapshot.mappable().count() as u64,
        by_type: counts_by_type(snapshot),
        by_status: counts_by_status(snapshot),
        newest: snapshot.iter().map(|incident| incident.timestamp).max(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone as _, Utc};
    use traffic_watch_incident_models::{Incident, RawIncident};

    use super::*;

    fn incident(id: u64, kind: &str, status: &str, hour: u32, lat: f64, lng: f64) -> Incident {
        Incident::try_from(RawIncident::from_value(serde_json::json!({
            "id": id,
            "type": kind,
            "status": status,
            "latitude": lat,
            "longitude": lng,
            "timestamp": format!("2025-03-01T{hour:02}:15:00Z"),
        })))
        .unwrap()
    }

    fn snapshot(incidents: Vec<Incident>) -> Snapshot {
        Snapshot::from_incidents(1, incidents)
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
    }

    fn sample() -> Snapshot {
        snapshot(vec![
            incident(1, "accident", "verified", 8, -1.95, 30.06),
            incident(2, "accident", "unverified", 8, -1.935, 30.085),
            incident(3, "congestion", "verified", 9, -1.935, 30.085),
            incident(4, "road_blockage", "verified", 11, 95.0, 30.0),
            incident(5, "pothole", "under_review", 11, -1.95, 30.06),
        ])
    }

    #[test]
    fn counts_by_type_sum_to_snapshot_size() {
        let snapshot = sample();
        let counts = counts_by_type(&snapshot);
        assert_eq!(counts[&TypeCategory::Accident], 2);
        assert_eq!(counts[&TypeCategory::Congestion], 1);
        assert_eq!(counts[&TypeCategory::RoadBlockage], 1);
        assert_eq!(counts[&TypeCategory::Other], 1);
        assert_eq!(counts.values().sum::<u64>(), snapshot.len() as u64);
    }

    #[test]
    fn counts_by_type_includes_zero_known_types_and_omits_zero_other() {
        let counts = counts_by_type(&snapshot(vec![incident(
            1, "accident", "verified", 8, -1.95, 30.06,
        )]));
        let expected: TypeCounts = [
            (TypeCategory::Accident, 1),
            (TypeCategory::Congestion, 0),
            (TypeCategory::RoadBlockage, 0),
        ]
        .into_iter()
        .collect();
        assert_eq!(counts, expected);
    }

    #[test]
    fn counts_on_empty_snapshot_are_all_zero() {
        let empty = snapshot(Vec::new());
        assert!(counts_by_type(&empty).values().all(|&n| n == 0));
        assert_eq!(counts_by_status(&empty).len(), 3);
    }

    #[test]
    fn counts_by_type_is_deterministic() {
        let snapshot = sample();
        assert_eq!(counts_by_type(&snapshot), counts_by_type(&snapshot));
    }

    #[test]
    fn counts_by_status_keeps_unknown_statuses_verbatim() {
        let counts = counts_by_status(&sample());
        assert_eq!(counts["verified"], 3);
        assert_eq!(counts["unverified"], 1);
        assert_eq!(counts["false_positive"], 0);
        assert_eq!(counts["under_review"], 1);
    }

    #[test]
    fn histogram_bins_half_open_window() {
        let histogram = hourly_histogram(&sample(), TimeWindow::new(at(8), at(11)), HOUR).unwrap();
        let counts: Vec<u64> = histogram.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 0], "11:15 incidents fall outside [8, 11)");
        assert_eq!(histogram[0].start, at(8));
        assert_eq!(histogram[2].end, at(11));
    }

    #[test]
    fn histogram_truncates_final_bin() {
        let window = TimeWindow::new(at(8), at(8) + TimeDelta::minutes(150));
        let histogram = hourly_histogram(&sample(), window, HOUR).unwrap();
        assert_eq!(histogram.len(), 3);
        assert_eq!(histogram[2].start, at(10));
        assert_eq!(histogram[2].end, at(10) + TimeDelta::minutes(30));
    }

    #[test]
    fn histogram_excludes_rather_than_clamps() {
        let histogram = hourly_histogram(&sample(), TimeWindow::new(at(12), at(14)), HOUR).unwrap();
        assert!(histogram.iter().all(|b| b.count == 0));
    }

    #[test]
    fn histogram_rejects_invalid_parameters() {
        let snapshot = sample();
        assert_eq!(
            hourly_histogram(&snapshot, TimeWindow::new(at(8), at(9)), TimeDelta::zero()),
            Err(AggregateError::InvalidBucketSize(TimeDelta::zero()))
        );
        assert!(matches!(
            hourly_histogram(&snapshot, TimeWindow::new(at(9), at(9)), HOUR),
            Err(AggregateError::EmptyWindow { .. })
        ));
        assert!(matches!(
            hourly_histogram(&snapshot, TimeWindow::new(at(9), at(8)), HOUR),
            Err(AggregateError::EmptyWindow { .. })
        ));
        assert!(matches!(
            hourly_histogram(
                &snapshot,
                TimeWindow::new(at(0), at(12)),
                TimeDelta::seconds(1)
            ),
            Err(AggregateError::TooManyBuckets { buckets: 43_200 })
        ));
    }

    #[test]
    fn peak_bucket_prefers_earliest_on_ties() {
        let snapshot = snapshot(vec![
            incident(1, "accident", "verified", 8, -1.95, 30.06),
            incident(2, "accident", "verified", 10, -1.95, 30.06),
        ]);
        let histogram = hourly_histogram(&snapshot, TimeWindow::new(at(8), at(12)), HOUR).unwrap();
        assert_eq!(peak_bucket(&histogram).unwrap().start, at(8));
    }

    #[test]
    fn peak_bucket_of_empty_histogram_is_none() {
        let histogram =
            hourly_histogram(&snapshot(Vec::new()), TimeWindow::new(at(8), at(12)), HOUR).unwrap();
        assert!(peak_bucket(&histogram).is_none());
        assert!(peak_bucket(&[]).is_none());
    }

    #[test]
    fn rank_zones_breaks_ties_by_name() {
        // Zone is encoded in the longitude: A, B, C.
        let snapshot = snapshot(vec![
            incident(1, "accident", "verified", 8, -1.9, 30.3),
            incident(2, "accident", "verified", 8, -1.9, 30.2),
            incident(3, "congestion", "verified", 8, -1.9, 30.1),
            incident(4, "accident", "verified", 8, -1.9, 30.2),
            incident(5, "accident", "verified", 8, -1.9, 30.1),
            incident(6, "congestion", "verified", 8, -1.9, 30.2),
            incident(7, "accident", "verified", 8, -1.9, 30.1),
        ]);
        let lookup = |position: Coordinate| {
            let name = if position.longitude > 30.25 {
                "C"
            } else if position.longitude > 30.15 {
                "B"
            } else {
                "A"
            };
            Some(name.to_string())
        };

        let ranking = rank_zones(&snapshot, &lookup);
        let order: Vec<(&str, u64)> = ranking.iter().map(|r| (r.zone.as_str(), r.count)).collect();
        assert_eq!(order, vec![("A", 3), ("B", 3), ("C", 1)]);
        assert_eq!(ranking[0].by_type[&TypeCategory::Accident], 2);
        assert_eq!(ranking[0].by_type[&TypeCategory::Congestion], 1);
    }

    #[test]
    fn rank_zones_skips_unmappable_and_unzoned_incidents() {
        let lookup = |position: Coordinate| {
            (position.longitude > 30.07).then(|| "Kimironko".to_string())
        };
        let ranking = rank_zones(&sample(), &lookup);
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking[0].zone, "Kimironko");
        assert_eq!(ranking[0].count, 2);
    }

    #[test]
    fn summarize_reports_headline() {
        let summary = summarize(&sample());
        assert_eq!(summary.total, 5);
        assert_eq!(summary.high_priority, 2);
        assert_eq!(summary.mappable, 4);
        assert_eq!(summary.revision, 1);
        assert_eq!(summary.newest, Some(at(11) + TimeDelta::minutes(15)));
        assert_eq!(summary.by_type[&TypeCategory::Accident], 2);
    }

    #[test]
    fn summarize_empty_snapshot() {
        let summary = summarize(&snapshot(Vec::new()));
        assert_eq!(summary.total, 0);
        assert!(summary.newest.is_none());
    }
}
