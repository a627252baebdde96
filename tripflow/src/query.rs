//! Spatial queries over one day's trips.
//!
//! Radius queries go through an R-tree over trip endpoints: a conservative
//! degree box picks candidates, and the exact haversine test decides. When no
//! box exists (the circle reaches a pole or wraps the antimeridian) every trip
//! is tested directly. Either way results come back in dataset order.

use std::sync::Arc;

use log::debug;
use once_cell::sync::OnceCell;
use rstar::RTree;
use serde::{Deserialize, Serialize};

use crate::clustering::{kmeans, ClusterResult, KMeansConfig};
use crate::error::Result;
use crate::geo_utils::{haversine_distance, search_envelope};
use crate::partition::DailyTripSet;
use crate::spatial_index::{build_rtree, indices_in_box, IndexedPoint};
use crate::{GeoPoint, TripRecord};

/// Which end of a trip an OD filter tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Origin,
    Destination,
}

impl std::str::FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "origin" | "from" | "pickup" => Ok(Endpoint::Origin),
            "destination" | "to" | "dropoff" => Ok(Endpoint::Destination),
            other => Err(format!("unknown endpoint '{other}'")),
        }
    }
}

/// Query engine over a single [`DailyTripSet`].
///
/// The engine owns a shared handle to the set, so callers can cache it and
/// keep answering queries from the same indexes. Each endpoint's R-tree is
/// built on first use and reused afterwards; concurrent queries are safe.
pub struct SpatialQueryEngine {
    set: Arc<DailyTripSet>,
    origins: Vec<GeoPoint>,
    origin_tree: OnceCell<RTree<IndexedPoint>>,
    destination_tree: OnceCell<RTree<IndexedPoint>>,
}

impl SpatialQueryEngine {
    pub fn new(set: impl Into<Arc<DailyTripSet>>) -> Self {
        let set = set.into();
        let origins = set.trips().iter().map(|t| t.from).collect();
        Self {
            set,
            origins,
            origin_tree: OnceCell::new(),
            destination_tree: OnceCell::new(),
        }
    }

    pub fn dataset(&self) -> &Arc<DailyTripSet> {
        &self.set
    }

    fn tree(&self, endpoint: Endpoint) -> &RTree<IndexedPoint> {
        let (cell, point): (_, fn(&TripRecord) -> &GeoPoint) = match endpoint {
            Endpoint::Origin => (&self.origin_tree, |t| &t.from),
            Endpoint::Destination => (&self.destination_tree, |t| &t.to),
        };
        cell.get_or_init(|| {
            debug!(
                "[Query] Indexing {} {:?} points for {}",
                self.set.len(),
                endpoint,
                self.set.date()
            );
            build_rtree(self.set.trips().iter().map(point))
        })
    }

    /// Trips whose origin lies within `radius_m` meters of `center`.
    pub fn buffer(&self, center: GeoPoint, radius_m: f64) -> Vec<TripRecord> {
        self.od_filter(center, radius_m, Endpoint::Origin)
    }

    /// Trips whose chosen endpoint lies within `radius_m` meters of `center`.
    pub fn od_filter(
        &self,
        center: GeoPoint,
        radius_m: f64,
        endpoint: Endpoint,
    ) -> Vec<TripRecord> {
        if radius_m.is_nan() || radius_m < 0.0 {
            return Vec::new();
        }

        let trips = self.set.trips();
        let point_of = |t: &TripRecord| match endpoint {
            Endpoint::Origin => t.from,
            Endpoint::Destination => t.to,
        };
        let within = |t: &TripRecord| haversine_distance(&point_of(t), &center) <= radius_m;

        let result: Vec<TripRecord> = match search_envelope(&center, radius_m) {
            Some(bbox) => indices_in_box(self.tree(endpoint), &bbox)
                .into_iter()
                .map(|i| trips[i])
                .filter(|t| within(t))
                .collect(),
            None => trips.iter().copied().filter(|t| within(t)).collect(),
        };

        debug!(
            "[Query] {:?} within {:.0} m of ({:.5}, {:.5}): {} trips",
            endpoint,
            radius_m,
            center.longitude,
            center.latitude,
            result.len()
        );
        result
    }

    /// Every trip origin, unfiltered, in dataset order.
    pub fn hotspot_origins(&self) -> &[GeoPoint] {
        &self.origins
    }

    /// K-means over all trip origins.
    pub fn cluster(&self, config: &KMeansConfig) -> Result<ClusterResult> {
        kmeans(&self.origins, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
    }

    /// Deterministic scatter over a ~20 km square around Manhattan.
    fn scattered(n: usize) -> DailyTripSet {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 1_000_000) as f64 / 1_000_000.0
        };
        let trips = (0..n)
            .map(|i| {
                let from = GeoPoint::new(-74.1 + 0.25 * next(), 40.6 + 0.2 * next());
                let to = GeoPoint::new(-74.1 + 0.25 * next(), 40.6 + 0.2 * next());
                TripRecord::new(from, to, (i * 13 % 86_400) as u32)
            })
            .collect();
        DailyTripSet::new(date(), trips, false)
    }

    fn linear(
        set: &DailyTripSet,
        center: GeoPoint,
        r: f64,
        endpoint: Endpoint,
    ) -> Vec<TripRecord> {
        set.trips()
            .iter()
            .copied()
            .filter(|t| {
                let p = match endpoint {
                    Endpoint::Origin => t.from,
                    Endpoint::Destination => t.to,
                };
                haversine_distance(&p, &center) <= r
            })
            .collect()
    }

    #[test]
    fn test_buffer_matches_linear_scan() {
        let set = scattered(3000);
        let engine = SpatialQueryEngine::new(set.clone());
        let center = GeoPoint::new(-73.98, 40.72);

        for r in [0.0, 250.0, 1_000.0, 3_500.0, 10_000.0, 50_000.0] {
            assert_eq!(
                engine.buffer(center, r),
                linear(&set, center, r, Endpoint::Origin),
                "r = {r}"
            );
            assert_eq!(
                engine.od_filter(center, r, Endpoint::Destination),
                linear(&set, center, r, Endpoint::Destination),
                "r = {r}"
            );
        }
    }

    #[test]
    fn test_buffer_is_exact() {
        let set = scattered(2000);
        let engine = SpatialQueryEngine::new(set.clone());
        let center = GeoPoint::new(-73.95, 40.70);
        let r = 2_000.0;

        let hits = engine.buffer(center, r);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|t| haversine_distance(&t.from, &center) <= r));
        let outside = set.len() - hits.len();
        let misses = set
            .trips()
            .iter()
            .filter(|t| haversine_distance(&t.from, &center) > r)
            .count();
        assert_eq!(outside, misses);
    }

    #[test]
    fn test_buffer_is_monotonic_in_radius() {
        let set = scattered(2000);
        let engine = SpatialQueryEngine::new(set.clone());
        let center = GeoPoint::new(-73.98, 40.72);

        let mut previous = 0;
        for r in [100.0, 500.0, 1_000.0, 2_000.0, 5_000.0, 20_000.0] {
            let n = engine.buffer(center, r).len();
            assert!(n >= previous, "r = {r}: {n} < {previous}");
            previous = n;
        }
        // 20 km covers the whole scatter area
        assert_eq!(previous, set.len());
    }

    #[test]
    fn test_results_keep_dataset_order() {
        let set = scattered(1500);
        let engine = SpatialQueryEngine::new(set.clone());
        let hits = engine.buffer(GeoPoint::new(-73.98, 40.70), 4_000.0);
        assert!(hits.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn test_zero_radius_hits_exact_point() {
        let from = GeoPoint::new(-74.0, 40.7);
        let set = DailyTripSet::new(
            date(),
            vec![TripRecord::new(from, GeoPoint::new(-73.98, 40.75), 10)],
            false,
        );
        let engine = SpatialQueryEngine::new(set.clone());
        assert_eq!(engine.buffer(from, 0.0).len(), 1);
        assert!(engine.buffer(from, -5.0).is_empty());
        assert!(engine.buffer(from, f64::NAN).is_empty());
    }

    #[test]
    fn test_antimeridian_falls_back_to_scan() {
        let set = DailyTripSet::new(
            date(),
            vec![
                TripRecord::new(GeoPoint::new(179.999, 0.0), GeoPoint::new(0.0, 0.0), 1),
                TripRecord::new(GeoPoint::new(-179.999, 0.0), GeoPoint::new(0.0, 0.0), 2),
            ],
            false,
        );
        let engine = SpatialQueryEngine::new(set.clone());
        // Both points are ~111 m from the antimeridian on opposite sides
        assert_eq!(engine.buffer(GeoPoint::new(180.0, 0.0), 1_000.0).len(), 2);
    }

    #[test]
    fn test_empty_dataset() {
        let set = DailyTripSet::empty(date());
        let engine = SpatialQueryEngine::new(set.clone());
        assert!(engine.buffer(GeoPoint::new(-74.0, 40.7), 1e6).is_empty());
        assert!(engine.hotspot_origins().is_empty());
        assert!(engine.cluster(&KMeansConfig::with_k(3)).unwrap_err().is_insufficient_data());
    }

    #[test]
    fn test_cluster_over_origins() {
        let set = scattered(500);
        let engine = SpatialQueryEngine::new(set.clone());
        let config = KMeansConfig {
            k: 4,
            seed: Some(1),
            ..Default::default()
        };
        let result = engine.cluster(&config).unwrap();
        assert_eq!(result.centers.len(), 4);
        assert_eq!(engine.hotspot_origins().len(), 500);
    }

    #[test]
    fn test_indexes_built_once_on_demand() {
        let engine = SpatialQueryEngine::new(scattered(800));
        assert!(engine.origin_tree.get().is_none());
        assert!(engine.destination_tree.get().is_none());

        let center = GeoPoint::new(-73.98, 40.72);
        let first = engine.buffer(center, 2_000.0);
        let tree = engine.origin_tree.get().unwrap() as *const RTree<IndexedPoint>;
        assert!(engine.destination_tree.get().is_none());

        assert_eq!(engine.buffer(center, 2_000.0), first);
        assert!(std::ptr::eq(tree, engine.origin_tree.get().unwrap()));

        // Pole-wrapping radius scans without touching the index
        let polar = SpatialQueryEngine::new(scattered(10));
        assert_eq!(polar.buffer(GeoPoint::new(0.0, 89.99), 5_000.0).len(), 0);
        assert!(polar.origin_tree.get().is_none());
    }

    #[test]
    fn test_shared_dataset_handle() {
        let set = Arc::new(scattered(50));
        let engine = SpatialQueryEngine::new(Arc::clone(&set));
        assert!(Arc::ptr_eq(engine.dataset(), &set));
    }

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!("origin".parse::<Endpoint>(), Ok(Endpoint::Origin));
        assert_eq!("Destination".parse::<Endpoint>(), Ok(Endpoint::Destination));
        assert!("middle".parse::<Endpoint>().is_err());
    }
}
