#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial helpers for the traffic dashboard.
//!
//! [`ZoneIndex`] builds an R-tree over named zone polygons and answers
//! point-in-polygon lookups for the hotspot ranking. [`gazetteer`] maps
//! place names to coordinates for route endpoints, and [`distance`]
//! measures paths.

pub mod distance;
pub mod gazetteer;

use std::collections::BTreeSet;

use geo::{Area as _, Contains, MultiPolygon};
use geojson::GeoJson;
use rstar::{AABB, RTree, RTreeObject};
use serde::Deserialize;
use traffic_watch_analytics::ZoneLookup;
use traffic_watch_incident_models::Coordinate;

pub use gazetteer::{Gazetteer, NamedLocation};

const KIGALI_ZONES: &str = include_str!("../data/zones.toml");

/// Errors raised while building a [`ZoneIndex`] or [`Gazetteer`].
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// The TOML document could not be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A zone's geometry is not a GeoJSON `Polygon` or `MultiPolygon`.
    #[error("Zone '{zone}' has no usable polygon geometry")]
    InvalidGeometry {
        /// Name of the offending zone.
        zone: String,
    },

    /// Two entries share a name.
    #[error("Duplicate name '{name}'")]
    DuplicateName {
        /// The repeated name.
        name: String,
    },
}

/// One zone as written in a zone file.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneDefinition {
    /// Display name, unique within the file.
    pub name: String,
    /// GeoJSON `Polygon` or `MultiPolygon` geometry, `[lng, lat]` order.
    pub geometry: String,
}

#[derive(Debug, Deserialize)]
struct ZoneFile {
    zones: Vec<ZoneDefinition>,
}

/// A zone polygon stored in the R-tree.
struct ZoneEntry {
    name: String,
    area: f64,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for ZoneEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree of named zones.
///
/// Zones may overlap; a point inside several zones belongs to the one
/// with the smallest area.
pub struct ZoneIndex {
    zones: RTree<ZoneEntry>,
}

impl std::fmt::Debug for ZoneIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneIndex")
            .field("zones", &self.names())
            .finish()
    }
}

impl ZoneIndex {
    /// Builds the index of the bundled Kigali hotspot zones.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the bundled zone file is invalid.
    pub fn kigali() -> Result<Self, SpatialError> {
        Self::from_toml(KIGALI_ZONES)
    }

    /// Builds an index from a TOML document with a `[[zones]]` array.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the document does not parse, a geometry
    /// is unusable, or a name repeats.
    pub fn from_toml(toml_str: &str) -> Result<Self, SpatialError> {
        let file: ZoneFile = toml::de::from_str(toml_str)?;
        Self::from_definitions(file.zones)
    }

    /// Builds an index from zone definitions.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if a geometry is unusable or a name repeats.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = ZoneDefinition>,
    ) -> Result<Self, SpatialError> {
        let mut names = BTreeSet::new();
        let mut entries = Vec::new();

        for definition in definitions {
            if !names.insert(definition.name.clone()) {
                return Err(SpatialError::DuplicateName {
                    name: definition.name,
                });
            }
            let Some(polygon) = parse_geojson_to_multipolygon(&definition.geometry) else {
                return Err(SpatialError::InvalidGeometry {
                    zone: definition.name,
                });
            };

            entries.push(ZoneEntry {
                area: polygon.unsigned_area(),
                envelope: compute_envelope(&polygon),
                name: definition.name,
                polygon,
            });
        }

        log::debug!("Loaded {} zones into spatial index", entries.len());
        Ok(Self {
            zones: RTree::bulk_load(entries),
        })
    }

    /// Returns the name of the zone containing `position`.
    ///
    /// Points on a zone's boundary are outside it.
    #[must_use]
    pub fn lookup(&self, position: Coordinate) -> Option<&str> {
        let point = geo::Point::new(position.longitude, position.latitude);
        let query_env = AABB::from_point([position.longitude, position.latitude]);

        let mut best: Option<&ZoneEntry> = None;

        for entry in self.zones.locate_in_envelope_intersecting(&query_env) {
            if entry.polygon.contains(&point) {
                match best {
                    None => best = Some(entry),
                    Some(current) if entry.area < current.area => {
                        best = Some(entry);
                    }
                    _ => {}
                }
            }
        }

        best.map(|e| e.name.as_str())
    }

    /// Zone names in ascending order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.zones.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Number of zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.size()
    }

    /// Whether the index has no zones.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.size() == 0
    }
}

impl ZoneLookup for ZoneIndex {
    fn zone_of(&self, position: Coordinate) -> Option<String> {
        self.lookup(position).map(str::to_string)
    }
}

/// Parse a `GeoJSON` string into a [`MultiPolygon`].
/// Handles both `Polygon` and `MultiPolygon` geometry types.
fn parse_geojson_to_multipolygon(geojson_str: &str) -> Option<MultiPolygon<f64>> {
    let geojson: GeoJson = geojson_str.parse().ok()?;
    if let GeoJson::Geometry(geom) = geojson {
        let geo_geom: geo::Geometry<f64> = geom.try_into().ok()?;
        match geo_geom {
            geo::Geometry::MultiPolygon(mp) => Some(mp),
            geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
            _ => None,
        }
    } else {
        None
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    use geo::BoundingRect;

    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(name: &str, min: (f64, f64), max: (f64, f64)) -> ZoneDefinition {
        let ((x0, y0), (x1, y1)) = (min, max);
        ZoneDefinition {
            name: name.to_string(),
            geometry: format!(
                r#"{{"type": "Polygon", "coordinates": [[[{x0}, {y0}], [{x1}, {y0}], [{x1}, {y1}], [{x0}, {y1}], [{x0}, {y0}]]]}}"#
            ),
        }
    }

    #[test]
    fn bundled_zones_load() {
        let index = ZoneIndex::kigali().unwrap();
        assert_eq!(index.len(), 7);
        assert!(index.names().contains(&"City Center"));
    }

    #[test]
    fn bundled_gazetteer_points_fall_in_expected_zones() {
        let index = ZoneIndex::kigali().unwrap();
        let lookup = |lat, lng| index.lookup(Coordinate::new(lat, lng));
        assert_eq!(lookup(-1.9441, 30.0619), Some("City Center"));
        assert_eq!(lookup(-1.9500, 30.0580), Some("Remera"));
        assert_eq!(lookup(-1.9350, 30.0800), Some("Kimironko"));
        assert_eq!(lookup(-1.9700, 30.1000), Some("Kanombe"));
        assert_eq!(lookup(-1.9550, 30.1050), Some("Kabeza"));
        assert_eq!(lookup(-1.9800, 30.0500), Some("Nyamirambo"));
    }

    #[test]
    fn point_outside_every_zone_is_none() {
        let index = ZoneIndex::kigali().unwrap();
        assert_eq!(index.lookup(Coordinate::new(-2.5, 29.7)), None);
    }

    #[test]
    fn smallest_overlapping_zone_wins() {
        let index = ZoneIndex::from_definitions([
            square("District", (30.0, -2.0), (30.2, -1.8)),
            square("Market", (30.05, -1.95), (30.07, -1.93)),
        ])
        .unwrap();
        assert_eq!(
            index.lookup(Coordinate::new(-1.94, 30.06)),
            Some("Market")
        );
        assert_eq!(
            index.lookup(Coordinate::new(-1.85, 30.15)),
            Some("District")
        );
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = ZoneIndex::from_definitions([
            square("A", (0.0, 0.0), (1.0, 1.0)),
            square("A", (2.0, 2.0), (3.0, 3.0)),
        ])
        .unwrap_err();
        assert!(matches!(err, SpatialError::DuplicateName { name } if name == "A"));
    }

    #[test]
    fn rejects_non_polygon_geometry() {
        let err = ZoneIndex::from_definitions([ZoneDefinition {
            name: "Point".to_string(),
            geometry: r#"{"type": "Point", "coordinates": [30.0, -1.9]}"#.to_string(),
        }])
        .unwrap_err();
        assert!(matches!(err, SpatialError::InvalidGeometry { .. }));
    }

    #[test]
    fn serves_as_zone_lookup() {
        let index = ZoneIndex::kigali().unwrap();
        assert_eq!(
            index.zone_of(Coordinate::new(-1.9350, 30.0800)).as_deref(),
            Some("Kimironko")
        );
    }
}
