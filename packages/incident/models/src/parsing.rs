//! Shared parsing helpers for incident records.
//!
//! The incident service emits timezone-aware RFC 3339 timestamps for most
//! rows, but rows seeded with naive datetimes come back without an offset.
//! Naive values are interpreted as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parses an incident timestamp. Returns `None` if no known format matches.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Returns `true` if the pair is finite and within WGS84 bounds.
#[must_use]
pub fn is_valid_lat_lng(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let dt = parse_timestamp("2025-03-01T10:15:00+02:00").unwrap();
        assert_eq!(dt.to_string(), "2025-03-01 08:15:00 UTC");
    }

    #[test]
    fn parses_naive_with_fractional() {
        let dt = parse_timestamp("2025-03-01T08:15:00.123456").unwrap();
        assert_eq!(dt.timestamp(), 1_740_816_900);
    }

    #[test]
    fn parses_space_separated() {
        let dt = parse_timestamp("2025-03-01 08:15:00").unwrap();
        assert_eq!(dt.to_string(), "2025-03-01 08:15:00 UTC");
    }

    #[test]
    fn rejects_invalid_timestamp() {
        assert!(parse_timestamp("not-a-date").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn validates_coordinate_ranges() {
        assert!(is_valid_lat_lng(-1.9441, 30.0619));
        assert!(is_valid_lat_lng(90.0, -180.0));
        assert!(!is_valid_lat_lng(90.5, 0.0));
        assert!(!is_valid_lat_lng(0.0, 181.0));
        assert!(!is_valid_lat_lng(f64::NAN, 0.0));
        assert!(!is_valid_lat_lng(0.0, f64::INFINITY));
    }
}
