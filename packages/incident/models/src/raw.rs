//! Lenient wire form of an incident record.
//!
//! A single bad field must not make the whole poll response undecodable,
//! so every field of [`RawIncident`] decodes to `None` when it has an
//! unexpected JSON type. Whether the record is usable is decided later by
//! `Incident::try_from`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::IncidentId;

/// An incident record exactly as received, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawIncident {
    /// Record id (integer or string on the wire).
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<IncidentId>,
    /// Incident type string.
    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub incident_type: Option<String>,
    /// Status string.
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    /// Latitude (number or numeric string on the wire).
    #[serde(default, deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    /// Longitude (number or numeric string on the wire).
    #[serde(default, deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,
    /// Timestamp string, parsed during validation.
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: Option<String>,
    /// Free-text description.
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    /// Footage link.
    #[serde(default, deserialize_with = "lenient_string")]
    pub video_url: Option<String>,
}

impl RawIncident {
    /// Decodes one element of the incident array.
    ///
    /// Elements that are not JSON objects decode to an empty record, which
    /// then fails validation on the missing id.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        if value.is_object() {
            serde_json::from_value(value).unwrap_or_default()
        } else {
            Self::default()
        }
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<IncidentId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Some(IncidentId::new(s)),
        Value::Number(n) => Some(IncidentId::new(n.to_string())),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_service_record() {
        let raw = RawIncident::from_value(serde_json::json!({
            "id": 12,
            "type": "congestion",
            "status": "unverified",
            "latitude": -1.9441,
            "longitude": 30.0619,
            "timestamp": "2025-03-01T08:15:00",
            "description": "Heavy traffic near Kigali Heights.",
            "video_url": null
        }));
        assert_eq!(raw.id, Some(IncidentId::from(12)));
        assert_eq!(raw.incident_type.as_deref(), Some("congestion"));
        assert!(raw.video_url.is_none());
        assert!((raw.latitude.unwrap() - -1.9441).abs() < f64::EPSILON);
    }

    #[test]
    fn wrong_field_types_decode_to_none() {
        let raw = RawIncident::from_value(serde_json::json!({
            "id": "a-7",
            "type": ["accident"],
            "latitude": "not a number",
            "longitude": "30.1"
        }));
        assert_eq!(raw.id, Some(IncidentId::new("a-7")));
        assert!(raw.incident_type.is_none());
        assert!(raw.latitude.is_none());
        assert_eq!(raw.longitude, Some(30.1));
    }

    #[test]
    fn non_object_decodes_to_empty_record() {
        assert_eq!(RawIncident::from_value(serde_json::json!(42)), RawIncident::default());
        assert_eq!(
            RawIncident::from_value(serde_json::Value::Null),
            RawIncident::default()
        );
    }
}
