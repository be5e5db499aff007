//! Named places that can be picked as route endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use traffic_watch_incident_models::Coordinate;

use crate::SpatialError;

const KIGALI_LOCATIONS: &str = include_str!("../data/locations.toml");

/// A place with a fixed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedLocation {
    /// Display name.
    pub name: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl NamedLocation {
    /// The location's position.
    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Deserialize)]
struct LocationFile {
    locations: Vec<NamedLocation>,
}

/// Case-insensitive lookup of named locations.
#[derive(Debug, Clone, Default)]
pub struct Gazetteer {
    /// Keyed by [`normalize`]d name.
    locations: BTreeMap<String, NamedLocation>,
}

impl Gazetteer {
    /// The bundled Kigali locations.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the bundled file is invalid.
    pub fn kigali() -> Result<Self, SpatialError> {
        Self::from_toml(KIGALI_LOCATIONS)
    }

    /// Parses a TOML document with a `[[locations]]` array.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the document does not parse or two
    /// names collide after normalization.
    pub fn from_toml(toml_str: &str) -> Result<Self, SpatialError> {
        let file: LocationFile = toml::de::from_str(toml_str)?;
        Self::from_locations(file.locations)
    }

    /// Builds a gazetteer from locations.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::DuplicateName`] if two names collide after
    /// normalization.
    pub fn from_locations(
        locations: impl IntoIterator<Item = NamedLocation>,
    ) -> Result<Self, SpatialError> {
        let mut map = BTreeMap::new();
        for location in locations {
            let key = normalize(&location.name);
            if map.contains_key(&key) {
                return Err(SpatialError::DuplicateName {
                    name: location.name,
                });
            }
            map.insert(key, location);
        }
        Ok(Self { locations: map })
    }

    /// Looks up a location by name, ignoring case and surrounding
    /// whitespace.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&NamedLocation> {
        self.locations.get(&normalize(name))
    }

    /// All locations, ordered by normalized name.
    pub fn iter(&self) -> impl Iterator<Item = &NamedLocation> {
        self.locations.values()
    }

    /// Number of locations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Whether there are no locations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_locations_load() {
        let gazetteer = Gazetteer::kigali().unwrap();
        assert_eq!(gazetteer.len(), 6);
    }

    #[test]
    fn resolves_ignoring_case_and_spacing() {
        let gazetteer = Gazetteer::kigali().unwrap();
        let heights = gazetteer.resolve("  kigali   HEIGHTS ").unwrap();
        assert_eq!(heights.name, "Kigali Heights");
        assert_eq!(heights.coordinate(), Coordinate::new(-1.9441, 30.0619));
    }

    #[test]
    fn unknown_name_is_none() {
        let gazetteer = Gazetteer::kigali().unwrap();
        assert!(gazetteer.resolve("Gisenyi").is_none());
        assert!(gazetteer.resolve("").is_none());
    }

    #[test]
    fn rejects_names_that_collide() {
        let location = |name: &str| NamedLocation {
            name: name.to_string(),
            latitude: 0.0,
            longitude: 0.0,
        };
        let err = Gazetteer::from_locations([location("Remera"), location("remera")]).unwrap_err();
        assert!(matches!(err, SpatialError::DuplicateName { .. }));
    }
}
