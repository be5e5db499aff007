#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Traffic incident taxonomy and the canonical [`Incident`] record.
//!
//! The incident service returns loosely-typed JSON. Every record is first
//! decoded into a lenient [`RawIncident`] and then validated into an
//! [`Incident`]; records that fail validation surface as a
//! [`MalformedRecord`] which callers count and drop instead of failing the
//! whole batch.

pub mod parsing;
pub mod raw;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use raw::RawIncident;

/// Text shown in place of an empty incident description.
pub const DESCRIPTION_PLACEHOLDER: &str = "No description provided";

/// Opaque incident identifier used as the dedup/merge key.
///
/// The service emits integer ids today, but nothing downstream relies on
/// that: numbers and strings both normalize to the same string key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    /// Creates an id from anything string-like.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IncidentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for IncidentId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// Statistical grouping of incident types.
///
/// Every [`IncidentType`] maps to exactly one category; unrecognized types
/// all fold into [`TypeCategory::Other`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TypeCategory {
    /// Vehicle collision.
    Accident,
    /// Slow or stopped traffic.
    Congestion,
    /// Road closed or obstructed.
    RoadBlockage,
    /// Any type the dashboard does not recognize.
    Other,
}

impl TypeCategory {
    /// Categories that always appear in type counts, even at zero.
    #[must_use]
    pub const fn known() -> &'static [Self] {
        &[Self::Accident, Self::Congestion, Self::RoadBlockage]
    }
}

/// Incident type as reported by the service.
///
/// Unrecognized values are preserved verbatim in [`IncidentType::Other`]
/// rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IncidentType {
    /// `accident`
    Accident,
    /// `congestion`
    Congestion,
    /// `road_blockage`
    RoadBlockage,
    /// Any other value, kept as received.
    Other(String),
}

impl IncidentType {
    /// Returns the statistical category for this type.
    #[must_use]
    pub const fn category(&self) -> TypeCategory {
        match self {
            Self::Accident => TypeCategory::Accident,
            Self::Congestion => TypeCategory::Congestion,
            Self::RoadBlockage => TypeCategory::RoadBlockage,
            Self::Other(_) => TypeCategory::Other,
        }
    }

    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Accident => "accident",
            Self::Congestion => "congestion",
            Self::RoadBlockage => "road_blockage",
            Self::Other(value) => value,
        }
    }

    /// Returns the severity used for priority counters.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Accident => Severity::High,
            Self::Congestion | Self::RoadBlockage => Severity::Moderate,
            Self::Other(_) => Severity::Low,
        }
    }
}

impl From<String> for IncidentType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "accident" => Self::Accident,
            "congestion" => Self::Congestion,
            "road_blockage" => Self::RoadBlockage,
            _ => Self::Other(value),
        }
    }
}

impl From<IncidentType> for String {
    fn from(value: IncidentType) -> Self {
        match value {
            IncidentType::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for IncidentType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verification status of an incident.
///
/// Unrecognized statuses are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IncidentStatus {
    /// Detected but not yet confirmed by an operator.
    Unverified,
    /// Confirmed by an operator.
    Verified,
    /// Rejected by an operator.
    FalsePositive,
    /// Any other value, kept as received.
    Other(String),
}

impl IncidentStatus {
    /// Statuses that always appear in status counts, even at zero.
    #[must_use]
    pub const fn known() -> [Self; 3] {
        [Self::Unverified, Self::Verified, Self::FalsePositive]
    }

    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
            Self::FalsePositive => "false_positive",
            Self::Other(value) => value,
        }
    }
}

impl From<String> for IncidentStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "unverified" => Self::Unverified,
            "verified" => Self::Verified,
            "false_positive" => Self::FalsePositive,
            _ => Self::Other(value),
        }
    }
}

impl From<IncidentStatus> for String {
    fn from(value: IncidentStatus) -> Self {
        match value {
            IncidentStatus::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display priority derived from the incident type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Low,
    /// Expect some delay.
    Moderate,
    /// Delays expected; shown in the high-priority counters.
    High,
}

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate from latitude and longitude.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` if both components are finite and inside the WGS84
    /// range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        parsing::is_valid_lat_lng(self.latitude, self.longitude)
    }
}

/// A validated traffic incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Merge key, stable across polls.
    pub id: IncidentId,
    /// Reported incident type.
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    /// Verification status.
    pub status: IncidentStatus,
    /// Latitude (WGS84). May be out of range; see [`Incident::map_position`].
    pub latitude: f64,
    /// Longitude (WGS84). May be out of range; see [`Incident::map_position`].
    pub longitude: f64,
    /// When the incident occurred, per the server clock.
    pub timestamp: DateTime<Utc>,
    /// Free-text description. Empty when the service sent none.
    pub description: String,
    /// Link to camera footage, if any.
    pub video_url: Option<String>,
}

impl Incident {
    /// Returns the position to render on a map, or `None` when the
    /// coordinates are not a valid WGS84 position.
    ///
    /// Incidents without a map position are still listed in feeds.
    #[must_use]
    pub fn map_position(&self) -> Option<Coordinate> {
        let coordinate = Coordinate::new(self.latitude, self.longitude);
        coordinate.is_valid().then_some(coordinate)
    }

    /// Returns the description, or [`DESCRIPTION_PLACEHOLDER`] when empty.
    #[must_use]
    pub fn display_description(&self) -> &str {
        if self.description.trim().is_empty() {
            DESCRIPTION_PLACEHOLDER
        } else {
            &self.description
        }
    }

    /// Whether a "view footage" link should be offered.
    #[must_use]
    pub fn has_footage(&self) -> bool {
        self.video_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    /// Returns the severity derived from the incident type.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.incident_type.severity()
    }

    /// Whether this incident counts toward the high-priority counters.
    #[must_use]
    pub fn is_high_priority(&self) -> bool {
        self.severity() == Severity::High
    }
}

/// Why an incoming record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedRecord {
    /// A required field was missing or had the wrong JSON type.
    #[error("record {id:?} is missing required field `{field}`")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
        /// Record id, when the id itself was present.
        id: Option<IncidentId>,
    },

    /// The timestamp could not be parsed.
    #[error("record {id} has unparseable timestamp {value:?}")]
    InvalidTimestamp {
        /// Record id.
        id: IncidentId,
        /// The raw timestamp value.
        value: String,
    },
}

impl TryFrom<RawIncident> for Incident {
    type Error = MalformedRecord;

    fn try_from(raw: RawIncident) -> Result<Self, Self::Error> {
        let id = raw.id.ok_or(MalformedRecord::MissingField {
            field: "id",
            id: None,
        })?;
        let missing = |field| MalformedRecord::MissingField {
            field,
            id: Some(id.clone()),
        };

        let incident_type = raw.incident_type.ok_or_else(|| missing("type"))?;
        let status = raw.status.ok_or_else(|| missing("status"))?;
        let latitude = raw.latitude.ok_or_else(|| missing("latitude"))?;
        let longitude = raw.longitude.ok_or_else(|| missing("longitude"))?;
        let timestamp_raw = raw.timestamp.ok_or_else(|| missing("timestamp"))?;

        let Some(timestamp) = parsing::parse_timestamp(&timestamp_raw) else {
            return Err(MalformedRecord::InvalidTimestamp {
                id,
                value: timestamp_raw,
            });
        };

        Ok(Self {
            id,
            incident_type: IncidentType::from(incident_type),
            status: IncidentStatus::from(status),
            latitude,
            longitude,
            timestamp,
            description: raw.description.unwrap_or_default(),
            video_url: raw.video_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: u64) -> RawIncident {
        RawIncident {
            id: Some(IncidentId::from(id)),
            incident_type: Some("accident".to_string()),
            status: Some("verified".to_string()),
            latitude: Some(-1.95),
            longitude: Some(30.06),
            timestamp: Some("2025-03-01T08:15:00Z".to_string()),
            description: Some("Minor accident at Remera junction.".to_string()),
            video_url: None,
        }
    }

    #[test]
    fn unknown_type_is_preserved_as_other() {
        let ty = IncidentType::from("pothole".to_string());
        assert_eq!(ty, IncidentType::Other("pothole".to_string()));
        assert_eq!(ty.category(), TypeCategory::Other);
        assert_eq!(ty.to_string(), "pothole");
    }

    #[test]
    fn known_type_round_trips_through_wire_string() {
        for ty in [
            IncidentType::Accident,
            IncidentType::Congestion,
            IncidentType::RoadBlockage,
        ] {
            assert_eq!(IncidentType::from(String::from(ty.clone())), ty);
        }
    }

    #[test]
    fn unknown_status_is_preserved() {
        let status = IncidentStatus::from("escalated".to_string());
        assert_eq!(status.as_str(), "escalated");
    }

    #[test]
    fn type_category_uses_snake_case_names() {
        assert_eq!(TypeCategory::RoadBlockage.to_string(), "road_blockage");
        assert_eq!(
            "road_blockage".parse::<TypeCategory>().unwrap(),
            TypeCategory::RoadBlockage
        );
    }

    #[test]
    fn validates_complete_record() {
        let incident = Incident::try_from(raw(1)).unwrap();
        assert_eq!(incident.id.as_str(), "1");
        assert_eq!(incident.incident_type, IncidentType::Accident);
        assert_eq!(incident.status, IncidentStatus::Verified);
        assert!(incident.is_high_priority());
        assert!(incident.map_position().is_some());
    }

    #[test]
    fn rejects_record_without_id() {
        let mut record = raw(1);
        record.id = None;
        assert_eq!(
            Incident::try_from(record).unwrap_err(),
            MalformedRecord::MissingField {
                field: "id",
                id: None
            }
        );
    }

    #[test]
    fn rejects_record_without_coordinates() {
        let mut record = raw(7);
        record.longitude = None;
        let err = Incident::try_from(record).unwrap_err();
        assert_eq!(
            err,
            MalformedRecord::MissingField {
                field: "longitude",
                id: Some(IncidentId::from(7)),
            }
        );
    }

    #[test]
    fn rejects_unparseable_timestamp() {
        let mut record = raw(3);
        record.timestamp = Some("yesterday".to_string());
        assert!(matches!(
            Incident::try_from(record),
            Err(MalformedRecord::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn out_of_range_coordinates_are_kept_but_not_mappable() {
        let mut record = raw(4);
        record.latitude = Some(123.0);
        let incident = Incident::try_from(record).unwrap();
        assert!(incident.map_position().is_none());
    }

    #[test]
    fn missing_description_renders_placeholder() {
        let mut record = raw(5);
        record.description = None;
        let incident = Incident::try_from(record).unwrap();
        assert_eq!(incident.description, "");
        assert_eq!(incident.display_description(), DESCRIPTION_PLACEHOLDER);
    }

    #[test]
    fn footage_requires_non_empty_url() {
        let mut record = raw(6);
        record.video_url = Some(String::new());
        assert!(!Incident::try_from(record.clone()).unwrap().has_footage());
        record.video_url = Some("https://cams.example/6.mp4".to_string());
        assert!(Incident::try_from(record).unwrap().has_footage());
    }
}
