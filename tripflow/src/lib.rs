//! # Tripflow
//!
//! Zone geocoding, daily partitioning and spatial analytics for ride-hailing
//! trip records.
//!
//! This library provides:
//! - Zone centroid resolution from polygon datasets (with reprojection)
//! - Row-at-a-time trip normalization into time-of-day trip records
//! - Per-day grouping, sampling and time sorting
//! - Buffer, origin/destination and k-means hotspot queries over one day
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel processing with rayon
//! - **`parquet`** - Read raw trips from Parquet files
//! - **`proj`** - Reproject zone polygons from any CRS through PROJ
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use tripflow::{
//!     normalize, DailyPartitioner, GeoPoint, PartitionConfig, RawTripRow, SpatialQueryEngine,
//!     ZoneId, ZoneMap,
//! };
//!
//! let mut zones = ZoneMap::new();
//! zones.insert(ZoneId(1), GeoPoint::new(-74.0, 40.7));
//! zones.insert(ZoneId(2), GeoPoint::new(-73.98, 40.75));
//!
//! let pickup = NaiveDate::from_ymd_opt(2025, 7, 1)
//!     .unwrap()
//!     .and_hms_opt(8, 15, 30)
//!     .unwrap();
//! let rows = vec![RawTripRow::new(ZoneId(1), ZoneId(2), pickup)];
//!
//! let mut days =
//!     DailyPartitioner::new(PartitionConfig::default()).partition(normalize(rows, &zones));
//! let day = days.remove(&pickup.date()).unwrap();
//! assert_eq!(day.trips()[0].time, 29730);
//!
//! let engine = SpatialQueryEngine::new(day);
//! assert_eq!(engine.buffer(GeoPoint::new(-74.0, 40.7), 100.0).len(), 1);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TripflowError};

// Geographic utilities (haversine distance, degree envelopes)
pub mod geo_utils;

// Coordinate reference system handling for zone polygons
pub mod projection;
pub use projection::{LambertConformalConic, Reprojection, SourceCrs, Wgs84};

// Zone centroid resolution
pub mod zones;
pub use zones::{BuildStats, ZoneMap, ZoneSource};

// Raw trip sources (CSV, optional Parquet)
pub mod sources;
pub use sources::{read_trip_rows, CsvTripReader, TripColumns};

// Row normalization
pub mod normalize;
pub use normalize::{normalize, normalize_row, DropReason, Normalize, NormalizeStats, RawTripRow};
#[cfg(feature = "parallel")]
pub use normalize::normalize_parallel;

// Daily grouping, sampling, time correction
pub mod partition;
pub use partition::{
    sample_all, DailyPartitioner, DailyTripSet, DatasetSink, PartitionConfig, TimeGranularity,
};

// R-tree over trip endpoints
pub mod spatial_index;

// K-means hotspot clustering
pub mod clustering;
pub use clustering::{kmeans, ClusterResult, KMeansConfig};

// Spatial queries over one day
pub mod query;
pub use query::{Endpoint, SpatialQueryEngine};

// ============================================================================
// Core Types
// ============================================================================

/// Number of seconds in one day; trip times live in `0..SECONDS_PER_DAY`.
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Identifier of a pickup/drop-off zone polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub u32);

impl ZoneId {
    /// Convert a raw integer into a zone id. Non-positive or out of range
    /// values are not valid zone ids.
    pub fn from_raw(raw: i64) -> Option<Self> {
        if raw <= 0 {
            return None;
        }
        u32::try_from(raw).ok().map(ZoneId)
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A WGS84 coordinate, serialized as `[longitude, latitude]`.
///
/// # Example
/// ```
/// use tripflow::GeoPoint;
/// let times_square = GeoPoint::new(-73.9855, 40.7580);
/// assert_eq!(serde_json::to_string(&times_square).unwrap(), "[-73.9855,40.758]");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    /// Create a new point from longitude and latitude in degrees.
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

impl From<[f64; 2]> for GeoPoint {
    fn from(pair: [f64; 2]) -> Self {
        GeoPoint::new(pair[0], pair[1])
    }
}

impl From<GeoPoint> for [f64; 2] {
    fn from(point: GeoPoint) -> Self {
        [point.longitude, point.latitude]
    }
}

impl From<geo::Point<f64>> for GeoPoint {
    fn from(point: geo::Point<f64>) -> Self {
        GeoPoint::new(point.x(), point.y())
    }
}

/// One normalized trip: origin and destination centroids plus the pickup
/// time as seconds since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub from: GeoPoint,
    pub to: GeoPoint,
    /// Seconds since midnight, always in `[0, 86399]`
    pub time: u32,
}

impl TripRecord {
    pub fn new(from: GeoPoint, to: GeoPoint, time: u32) -> Self {
        Self { from, to, time }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_id_from_raw() {
        assert_eq!(ZoneId::from_raw(132), Some(ZoneId(132)));
        assert_eq!(ZoneId::from_raw(0), None);
        assert_eq!(ZoneId::from_raw(-4), None);
        assert_eq!(ZoneId::from_raw(i64::MAX), None);
    }

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(-73.9855, 40.7580).is_valid());
        assert!(!GeoPoint::new(0.0, 91.0).is_valid());
        assert!(!GeoPoint::new(181.0, 0.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_trip_record_json_shape() {
        let trip = TripRecord::new(GeoPoint::new(-74.0, 40.7), GeoPoint::new(-73.98, 40.75), 29730);
        let json = serde_json::to_string(&trip).unwrap();
        assert_eq!(json, r#"{"from":[-74.0,40.7],"to":[-73.98,40.75],"time":29730}"#);

        let back: TripRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trip);
    }
}
