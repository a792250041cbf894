//! Region polygons and the per-country detail level filter.

use geo::{BoundingRect, Contains};
use geo_types::{Coord, Geometry, MultiPolygon, Point, Rect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{IndexError, Result};

/// A named administrative area.
#[derive(Debug, Clone)]
pub struct RegionPolygon {
    id: String,
    country: String,
    level: u8,
    geometry: MultiPolygon<f64>,
    bounds: Rect<f64>,
}

impl RegionPolygon {
    pub fn new(
        id: impl Into<String>,
        country: impl Into<String>,
        level: u8,
        geometry: MultiPolygon<f64>,
    ) -> Result<Self> {
        let id = id.into();
        let bounds = geometry
            .bounding_rect()
            .ok_or_else(|| IndexError::InvalidPolygon {
                id: id.clone(),
                message: "geometry is empty".to_string(),
            })?;

        Ok(Self {
            id,
            country: country.into(),
            level,
            geometry,
            bounds,
        })
    }

    /// Parse a `POLYGON` or `MULTIPOLYGON` WKT string.
    pub fn from_wkt(
        id: impl Into<String>,
        country: impl Into<String>,
        level: u8,
        wkt_text: &str,
    ) -> Result<Self> {
        let id = id.into();
        let invalid = |message: String| IndexError::InvalidPolygon {
            id: id.clone(),
            message,
        };

        let parsed = wkt::Wkt::<f64>::from_str(wkt_text).map_err(|e| invalid(format!("{:?}", e)))?;
        let geometry = Geometry::try_from(parsed).map_err(|e| invalid(format!("{:?}", e)))?;

        let multi = match geometry {
            Geometry::Polygon(p) => MultiPolygon(vec![p]),
            Geometry::MultiPolygon(mp) => mp,
            Geometry::Rect(r) => MultiPolygon(vec![r.to_polygon()]),
            other => {
                return Err(invalid(format!(
                    "expected an areal geometry, got {}",
                    geometry_kind(&other)
                )))
            }
        };

        Self::new(id, country, level, multi)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Whether the polygon interior contains the coordinate.
    ///
    /// Points on the boundary are not contained.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        if !self.bounds_contain(lat, lon) {
            return false;
        }
        self.geometry.contains(&Point::new(lon, lat))
    }

    fn bounds_contain(&self, lat: f64, lon: f64) -> bool {
        let Coord { x: min_x, y: min_y } = self.bounds.min();
        let Coord { x: max_x, y: max_y } = self.bounds.max();
        lon >= min_x && lon <= max_x && lat >= min_y && lat <= max_y
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "POINT",
        Geometry::Line(_) => "LINE",
        Geometry::LineString(_) => "LINESTRING",
        Geometry::MultiPoint(_) => "MULTIPOINT",
        Geometry::MultiLineString(_) => "MULTILINESTRING",
        Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        Geometry::Triangle(_) => "TRIANGLE",
        _ => "areal",
    }
}

/// Which detail level each country contributes.
///
/// Some countries are mapped at fine sub-regions, the rest only as a national
/// outline, so the candidate set is a filtered union rather than one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailLevels {
    /// Level used for countries not listed in `countries`; `None` drops them.
    #[serde(default = "default_level")]
    pub default_level: Option<u8>,
    #[serde(default = "default_countries")]
    pub countries: BTreeMap<String, u8>,
}

fn default_level() -> Option<u8> {
    Some(0)
}

fn default_countries() -> BTreeMap<String, u8> {
    BTreeMap::from([("DE".to_string(), 3)])
}

impl Default for DetailLevels {
    fn default() -> Self {
        Self {
            default_level: default_level(),
            countries: default_countries(),
        }
    }
}

impl DetailLevels {
    pub fn level_for(&self, country: &str) -> Option<u8> {
        self.countries.get(country).copied().or(self.default_level)
    }

    pub fn accepts(&self, country: &str, level: u8) -> bool {
        self.level_for(country) == Some(level)
    }
}

/// One record of the polygon reference file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolygonRecord {
    pub id: String,
    pub country: String,
    pub level: u8,
    /// WKT geometry.
    pub geometry: String,
}

/// Load polygon reference data and apply the detail level filter.
///
/// File order is the iteration order used for tie-breaking overlaps.
pub fn load_polygons(path: &Path, levels: &DetailLevels) -> Result<Vec<RegionPolygon>> {
    let content = std::fs::read(path).map_err(|e| IndexError::io(path, e))?;
    let records: Vec<PolygonRecord> =
        serde_json::from_slice(&content).map_err(|e| IndexError::parse(path, e))?;
    let total = records.len();

    let mut polygons = Vec::new();
    for record in records {
        if !levels.accepts(&record.country, record.level) {
            continue;
        }
        let polygon =
            RegionPolygon::from_wkt(record.id, record.country, record.level, &record.geometry)?;
        debug!(id = %polygon.id, country = %polygon.country, "Loaded region polygon");
        polygons.push(polygon);
    }

    info!(
        path = %path.display(),
        total = total,
        selected = polygons.len(),
        "Loaded region polygons"
    );
    Ok(polygons)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = "POLYGON((0 0, 2 0, 2 2, 0 2, 0 0))";

    #[test]
    fn test_contains_interior_only() {
        let p = RegionPolygon::from_wkt("DE1", "DE", 1, SQUARE).unwrap();
        assert!(p.contains(1.0, 1.0));
        assert!(!p.contains(3.0, 1.0));
        // boundary
        assert!(!p.contains(0.0, 1.0));
    }

    #[test]
    fn test_lat_lon_order() {
        // x is longitude, y is latitude
        let p = RegionPolygon::from_wkt("X", "XX", 0, "POLYGON((10 50, 11 50, 11 51, 10 51, 10 50))")
            .unwrap();
        assert!(p.contains(50.5, 10.5));
        assert!(!p.contains(10.5, 50.5));
    }

    #[test]
    fn test_multipolygon_and_hole() {
        let wkt = "MULTIPOLYGON(((0 0, 4 0, 4 4, 0 4, 0 0), (1 1, 3 1, 3 3, 1 3, 1 1)), ((10 10, 11 10, 11 11, 10 11, 10 10)))";
        let p = RegionPolygon::from_wkt("FR", "FR", 0, wkt).unwrap();
        assert!(p.contains(0.5, 0.5));
        assert!(!p.contains(2.0, 2.0));
        assert!(p.contains(10.5, 10.5));
    }

    #[test]
    fn test_rejects_non_areal() {
        let err = RegionPolygon::from_wkt("P", "PP", 0, "POINT(1 1)").unwrap_err();
        assert!(matches!(err, IndexError::InvalidPolygon { .. }));

        let err = RegionPolygon::from_wkt("P", "PP", 0, "POLYGON((").unwrap_err();
        assert!(matches!(err, IndexError::InvalidPolygon { .. }));
    }

    #[test]
    fn test_detail_levels() {
        let levels = DetailLevels::default();
        assert!(levels.accepts("DE", 3));
        assert!(!levels.accepts("DE", 0));
        assert!(levels.accepts("FR", 0));
        assert!(!levels.accepts("FR", 3));

        let strict = DetailLevels {
            default_level: None,
            countries: BTreeMap::from([("NL".to_string(), 2)]),
        };
        assert!(!strict.accepts("FR", 0));
        assert!(strict.accepts("NL", 2));
    }

    #[test]
    fn test_load_filters_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polygons.json");
        let records = vec![
            PolygonRecord {
                id: "DE".into(),
                country: "DE".into(),
                level: 0,
                geometry: SQUARE.into(),
            },
            PolygonRecord {
                id: "DEA23".into(),
                country: "DE".into(),
                level: 3,
                geometry: SQUARE.into(),
            },
            PolygonRecord {
                id: "FR".into(),
                country: "FR".into(),
                level: 0,
                geometry: SQUARE.into(),
            },
            PolygonRecord {
                id: "DE111".into(),
                country: "DE".into(),
                level: 3,
                geometry: SQUARE.into(),
            },
        ];
        std::fs::write(&path, serde_json::to_vec(&records).unwrap()).unwrap();

        let polygons = load_polygons(&path, &DetailLevels::default()).unwrap();
        let ids: Vec<&str> = polygons.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["DEA23", "FR", "DE111"]);
    }
}
