//! # Zone Resolution
//!
//! Builds the [`ZoneMap`] (`ZoneId -> GeoPoint`) from a polygon dataset.
//!
//! ## Algorithm
//! 1. Parse the GeoJSON `FeatureCollection`
//! 2. Resolve the source CRS (explicit override, legacy `crs` member, else WGS84)
//! 3. Reproject every polygon vertex to WGS84
//! 4. Take the planar area-weighted centroid in lon/lat
//! 5. Insert `(LocationID, centroid)`; later duplicates replace earlier ones
//!
//! Features without a usable id or geometry are skipped and counted in
//! [`BuildStats`]. Anything wrong with the dataset as a whole is a
//! [`TripflowError::DataSource`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use geo::{Centroid, Geometry, MapCoords};
use geojson::{Feature, GeoJson, JsonObject, JsonValue};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TripflowError};
use crate::geo_utils::{compute_bounds, DegreeBox};
use crate::projection::{Reprojection, SourceCrs};
use crate::{GeoPoint, ZoneId};

/// Default name of the zone id property in the TLC taxi zone layer.
pub const DEFAULT_ID_FIELD: &str = "LocationID";

/// Read-only mapping from zone id to zone centroid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneMap {
    centroids: BTreeMap<ZoneId, GeoPoint>,
}

impl ZoneMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a polygon dataset and compute one centroid per zone.
    pub fn build(source: &ZoneSource) -> Result<Self> {
        source.load().map(|(zones, _)| zones)
    }

    /// Insert a centroid, replacing any previous one for the same id.
    pub fn insert(&mut self, id: ZoneId, centroid: GeoPoint) -> Option<GeoPoint> {
        self.centroids.insert(id, centroid)
    }

    #[inline]
    pub fn get(&self, id: ZoneId) -> Option<GeoPoint> {
        self.centroids.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    /// Zones in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (ZoneId, GeoPoint)> + '_ {
        self.centroids.iter().map(|(id, p)| (*id, *p))
    }

    /// Bounding box of all centroids.
    pub fn bounds(&self) -> Option<DegreeBox> {
        compute_bounds(self.centroids.values())
    }
}

impl FromIterator<(ZoneId, GeoPoint)> for ZoneMap {
    fn from_iter<I: IntoIterator<Item = (ZoneId, GeoPoint)>>(iter: I) -> Self {
        Self {
            centroids: iter.into_iter().collect(),
        }
    }
}

/// Counters collected while building a [`ZoneMap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub features_read: usize,
    pub zones_built: usize,
    pub skipped_missing_id: usize,
    pub skipped_missing_geometry: usize,
    pub duplicate_ids: usize,
}

/// A polygon dataset on disk plus how to read it.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSource {
    pub path: PathBuf,
    /// Feature property holding the zone id
    pub id_field: String,
    /// Overrides whatever CRS the file declares
    pub crs: Option<String>,
}

impl ZoneSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            crs: None,
        }
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    fn source_name(&self) -> String {
        self.path.display().to_string()
    }

    /// Read the file and build the zone map.
    pub fn load(&self) -> Result<(ZoneMap, BuildStats)> {
        let text = read_source(&self.path)?;
        self.parse_str(&text)
    }

    /// Build the zone map from GeoJSON text (the path is only used in errors).
    pub fn parse_str(&self, text: &str) -> Result<(ZoneMap, BuildStats)> {
        let name = self.source_name();
        let geojson: GeoJson = text
            .parse()
            .map_err(|e| TripflowError::data_source(&name, format!("invalid GeoJSON: {e}")))?;

        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => {
                return Err(TripflowError::data_source(
                    &name,
                    "expected a GeoJSON FeatureCollection",
                ))
            }
        };

        let crs_name = self
            .crs
            .clone()
            .or_else(|| declared_crs(collection.foreign_members.as_ref()));
        let crs = match crs_name.as_deref() {
            Some(crs_name) => SourceCrs::parse(crs_name)?,
            None => SourceCrs::Wgs84,
        };
        let reprojection = crs.reprojection()?;
        debug!("[Zones] {} uses {}", name, reprojection.name());

        let mut zones = ZoneMap::new();
        let mut stats = BuildStats::default();

        for feature in &collection.features {
            stats.features_read += 1;

            let Some(id) = feature_zone_id(feature, &self.id_field) else {
                stats.skipped_missing_id += 1;
                continue;
            };

            let Some(centroid) = feature_centroid(feature, reprojection.as_ref(), &name)? else {
                stats.skipped_missing_geometry += 1;
                continue;
            };

            if zones.insert(id, centroid).is_some() {
                stats.duplicate_ids += 1;
            }
        }
        stats.zones_built = zones.len();

        if stats.skipped_missing_id + stats.skipped_missing_geometry > 0 {
            warn!(
                "[Zones] Skipped {} features without '{}' and {} without geometry",
                stats.skipped_missing_id, self.id_field, stats.skipped_missing_geometry
            );
        }
        info!(
            "[Zones] Built {} zone centroids from {} features in {}",
            stats.zones_built, stats.features_read, name
        );

        Ok((zones, stats))
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| TripflowError::data_source(path.display().to_string(), e.to_string()))
}

/// Legacy GeoJSON 2008 `"crs": {"type": "name", "properties": {"name": ...}}`.
fn declared_crs(foreign: Option<&JsonObject>) -> Option<String> {
    foreign?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

/// Zone id property, accepting `132`, `132.0` and `"132"`.
fn feature_zone_id(feature: &Feature, field: &str) -> Option<ZoneId> {
    let raw = match feature.property(field)? {
        JsonValue::Number(n) => match n.as_i64() {
            Some(v) => v,
            None => {
                let f = n.as_f64()?;
                if f.fract() != 0.0 || !f.is_finite() {
                    return None;
                }
                f as i64
            }
        },
        JsonValue::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    ZoneId::from_raw(raw)
}

/// Centroid of a feature's polygon(s) after reprojection.
///
/// `Ok(None)` when the feature has no areal geometry; `Err` when the
/// geometry is malformed or a vertex cannot be reprojected.
fn feature_centroid(
    feature: &Feature,
    reprojection: &dyn Reprojection,
    source_name: &str,
) -> Result<Option<GeoPoint>> {
    let Some(geometry) = feature.geometry.as_ref() else {
        return Ok(None);
    };

    let geometry: Geometry<f64> = geometry.value.clone().try_into().map_err(|e| {
        TripflowError::data_source(source_name, format!("malformed geometry: {e}"))
    })?;

    match geometry {
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) => {}
        _ => return Ok(None),
    }

    let projected = geometry.try_map_coords(|c| {
        reprojection
            .to_lon_lat(c.x, c.y)
            .map(|(x, y)| geo::coord! { x: x, y: y })
    })?;

    Ok(projected
        .centroid()
        .map(GeoPoint::from)
        .filter(GeoPoint::is_valid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{ConvexHull, Intersects, MultiPoint, Point};

    fn collection(features: &[String], crs: Option<&str>) -> String {
        let crs = crs
            .map(|name| {
                format!(r#""crs":{{"type":"name","properties":{{"name":"{name}"}}}},"#)
            })
            .unwrap_or_default();
        format!(
            r#"{{"type":"FeatureCollection",{crs}"features":[{}]}}"#,
            features.join(",")
        )
    }

    fn polygon_feature(id: &str, ring: &[(f64, f64)]) -> String {
        let coords: Vec<String> = ring.iter().map(|(x, y)| format!("[{x},{y}]")).collect();
        format!(
            r#"{{"type":"Feature","properties":{{"LocationID":{id}}},"geometry":{{"type":"Polygon","coordinates":[[{}]]}}}}"#,
            coords.join(",")
        )
    }

    fn square(lon: f64, lat: f64, size: f64) -> Vec<(f64, f64)> {
        vec![
            (lon, lat),
            (lon + size, lat),
            (lon + size, lat + size),
            (lon, lat + size),
            (lon, lat),
        ]
    }

    fn source() -> ZoneSource {
        ZoneSource::new("zones.geojson")
    }

    #[test]
    fn test_square_centroid() {
        let text = collection(&[polygon_feature("1", &square(-74.0, 40.7, 0.02))], None);
        let (zones, stats) = source().parse_str(&text).unwrap();

        let c = zones.get(ZoneId(1)).unwrap();
        assert!((c.longitude - (-73.99)).abs() < 1e-9);
        assert!((c.latitude - 40.71).abs() < 1e-9);
        assert_eq!(stats.zones_built, 1);
    }

    #[test]
    fn test_centroid_within_convex_hull() {
        // L-shaped zone: centroid of a concave polygon may leave the polygon
        // but never its convex hull
        let ring = vec![
            (-74.00, 40.70),
            (-73.96, 40.70),
            (-73.96, 40.71),
            (-73.99, 40.71),
            (-73.99, 40.74),
            (-74.00, 40.74),
            (-74.00, 40.70),
        ];
        let text = collection(&[polygon_feature("7", &ring)], None);
        let (zones, _) = source().parse_str(&text).unwrap();
        let c = zones.get(ZoneId(7)).unwrap();

        let hull = MultiPoint::from(ring.iter().map(|&(x, y)| Point::new(x, y)).collect::<Vec<_>>())
            .convex_hull();
        assert!(hull.intersects(&Point::new(c.longitude, c.latitude)));
    }

    #[test]
    fn test_duplicate_ids_last_wins() {
        let text = collection(
            &[
                polygon_feature("4", &square(-74.0, 40.7, 0.01)),
                polygon_feature("4", &square(-73.9, 40.8, 0.01)),
            ],
            None,
        );
        let (zones, stats) = source().parse_str(&text).unwrap();

        assert_eq!(zones.len(), 1);
        assert_eq!(stats.duplicate_ids, 1);
        let c = zones.get(ZoneId(4)).unwrap();
        assert!((c.longitude - (-73.895)).abs() < 1e-9);
    }

    #[test]
    fn test_features_without_id_or_geometry_skipped() {
        let no_geometry =
            r#"{"type":"Feature","properties":{"LocationID":9},"geometry":null}"#.to_string();
        let text = collection(
            &[
                polygon_feature("null", &square(-74.0, 40.7, 0.01)),
                polygon_feature("0", &square(-74.0, 40.7, 0.01)),
                polygon_feature("\"12\"", &square(-74.0, 40.7, 0.01)),
                polygon_feature("13.0", &square(-74.0, 40.7, 0.01)),
                no_geometry,
            ],
            None,
        );
        let (zones, stats) = source().parse_str(&text).unwrap();

        assert_eq!(stats.features_read, 5);
        assert_eq!(stats.skipped_missing_id, 2);
        assert_eq!(stats.skipped_missing_geometry, 1);
        assert!(zones.get(ZoneId(12)).is_some());
        assert!(zones.get(ZoneId(13)).is_some());
        assert_eq!(zones.len(), 2);
    }

    #[test]
    fn test_state_plane_source_is_reprojected() {
        // 2,000 ft square around Midtown in EPSG:2263
        let (x, y) = (988_000.0, 215_000.0);
        let ring = vec![
            (x - 1000.0, y - 1000.0),
            (x + 1000.0, y - 1000.0),
            (x + 1000.0, y + 1000.0),
            (x - 1000.0, y + 1000.0),
            (x - 1000.0, y - 1000.0),
        ];
        let text = collection(
            &[polygon_feature("161", &ring)],
            Some("urn:ogc:def:crs:EPSG::2263"),
        );
        let (zones, _) = source().parse_str(&text).unwrap();
        let c = zones.get(ZoneId(161)).unwrap();

        assert!((c.longitude - (-73.98)).abs() < 0.03, "lon {}", c.longitude);
        assert!((c.latitude - 40.76).abs() < 0.03, "lat {}", c.latitude);
    }

    #[test]
    fn test_crs_override_wins() {
        let text = collection(
            &[polygon_feature("1", &square(-74.0, 40.7, 0.02))],
            Some("urn:ogc:def:crs:EPSG::2263"),
        );
        let (zones, _) = source().with_crs("EPSG:4326").parse_str(&text).unwrap();
        assert!((zones.get(ZoneId(1)).unwrap().latitude - 40.71).abs() < 1e-9);
    }

    #[test]
    fn test_custom_id_field() {
        let text = collection(&[polygon_feature("1", &square(-74.0, 40.7, 0.02))], None)
            .replace("LocationID", "zone");
        let (zones, _) = source().with_id_field("zone").parse_str(&text).unwrap();
        assert_eq!(zones.len(), 1);
    }

    #[test]
    fn test_invalid_sources_fail() {
        assert!(matches!(
            source().parse_str("not json"),
            Err(TripflowError::DataSource { .. })
        ));
        assert!(matches!(
            source().parse_str(r#"{"type":"Point","coordinates":[0,0]}"#),
            Err(TripflowError::DataSource { .. })
        ));
        assert!(matches!(
            ZoneSource::new("/nonexistent/zones.geojson").load(),
            Err(TripflowError::DataSource { .. })
        ));
    }

    #[test]
    fn test_zone_map_serializes_as_object() {
        let zones: ZoneMap = [(ZoneId(2), GeoPoint::new(-73.98, 40.75))].into_iter().collect();
        assert_eq!(
            serde_json::to_string(&zones).unwrap(),
            r#"{"2":[-73.98,40.75]}"#
        );
    }
}
