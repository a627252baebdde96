//! # Geographic Utilities
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points |
//! | [`search_envelope`] | Conservative lon/lat box around a radius query |
//! | [`compute_bounds`] | Bounding box of a point set |
//!
//! ## Haversine Formula
//!
//! With longitudes/latitudes in radians:
//!
//! ```text
//! a = sin²(Δlat/2) + cos(lat1)·cos(lat2)·sin²(Δlon/2)
//! d = 2·asin(√a)·R
//! ```
//!
//! `R` is fixed at 6,371,000 m. The radius is part of the query contract, so
//! this is not delegated to `geo::Haversine` (which uses 6,371,008.8 m).

use crate::GeoPoint;

/// Earth radius used by every distance test, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude on the sphere of radius [`EARTH_RADIUS_M`].
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Great-circle distance in meters between two points.
///
/// # Example
/// ```rust
/// use tripflow::{GeoPoint, geo_utils};
///
/// let london = GeoPoint::new(-0.1278, 51.5074);
/// let paris = GeoPoint::new(2.3522, 48.8566);
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_500.0).abs() < 1_000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (p2.longitude - p1.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1 for antipodal points
    2.0 * a.clamp(0.0, 1.0).sqrt().asin() * EARTH_RADIUS_M
}

/// Axis-aligned lon/lat box: `(min_lon, min_lat, max_lon, max_lat)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DegreeBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl DegreeBox {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.longitude >= self.min_lon
            && point.longitude <= self.max_lon
            && point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
    }
}

/// Box guaranteed to contain every point within `radius_m` of `center`.
///
/// Returns `None` when no such box exists without wrapping (the circle reaches
/// a pole or crosses the antimeridian); callers then scan linearly.
pub fn search_envelope(center: &GeoPoint, radius_m: f64) -> Option<DegreeBox> {
    if !radius_m.is_finite() || radius_m < 0.0 || !center.is_valid() {
        return None;
    }

    // 1% slack absorbs floating point noise in the exact test
    let dlat = radius_m / METERS_PER_DEGREE * 1.01;
    let min_lat = center.latitude - dlat;
    let max_lat = center.latitude + dlat;
    if min_lat <= -90.0 || max_lat >= 90.0 {
        return None;
    }

    // Longitude span grows with latitude; bound it by the most poleward edge
    let widest = min_lat.abs().max(max_lat.abs()).to_radians().cos();
    let dlon = dlat / widest;
    let min_lon = center.longitude - dlon;
    let max_lon = center.longitude + dlon;
    if min_lon < -180.0 || max_lon > 180.0 || dlon >= 180.0 {
        return None;
    }

    Some(DegreeBox {
        min_lon,
        min_lat,
        max_lon,
        max_lat,
    })
}

/// Bounding box of a set of points, `None` when empty.
pub fn compute_bounds<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<DegreeBox> {
    let mut iter = points.into_iter();
    let first = iter.next()?;
    let mut bounds = DegreeBox {
        min_lon: first.longitude,
        min_lat: first.latitude,
        max_lon: first.longitude,
        max_lat: first.latitude,
    };
    for p in iter {
        bounds.min_lon = bounds.min_lon.min(p.longitude);
        bounds.min_lat = bounds.min_lat.min(p.latitude);
        bounds.max_lon = bounds.max_lon.max(p.longitude);
        bounds.max_lat = bounds.max_lat.max(p.latitude);
    }
    Some(bounds)
}
