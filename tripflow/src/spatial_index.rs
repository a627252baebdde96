//! R-tree indexed endpoint types and envelope lookups.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::geo_utils::DegreeBox;
use crate::GeoPoint;

/// A trip endpoint with the index of its trip, for R-tree queries
#[derive(Debug, Clone, Copy)]
pub struct IndexedPoint {
    pub idx: usize,
    pub lon: f64,
    pub lat: f64,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lon, self.lat])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlon = self.lon - point[0];
        let dlat = self.lat - point[1];
        dlon * dlon + dlat * dlat
    }
}

/// Build an R-tree over points, remembering each point's position.
pub fn build_rtree<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> RTree<IndexedPoint> {
    let indexed: Vec<IndexedPoint> = points
        .into_iter()
        .enumerate()
        .map(|(i, p)| IndexedPoint {
            idx: i,
            lon: p.longitude,
            lat: p.latitude,
        })
        .collect();
    RTree::bulk_load(indexed)
}

/// Indices of all points inside a degree box, ascending.
pub fn indices_in_box(tree: &RTree<IndexedPoint>, bbox: &DegreeBox) -> Vec<usize> {
    let envelope = AABB::from_corners([bbox.min_lon, bbox.min_lat], [bbox.max_lon, bbox.max_lat]);
    let mut indices: Vec<usize> = tree
        .locate_in_envelope(&envelope)
        .map(|p| p.idx)
        .collect();
    indices.sort_unstable();
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_lookup_returns_sorted_indices() {
        let points = vec![
            GeoPoint::new(-73.90, 40.80),
            GeoPoint::new(-74.00, 40.70),
            GeoPoint::new(-73.99, 40.71),
            GeoPoint::new(-73.50, 41.00),
        ];
        let tree = build_rtree(&points);
        let bbox = DegreeBox {
            min_lon: -74.01,
            min_lat: 40.69,
            max_lon: -73.89,
            max_lat: 40.81,
        };
        assert_eq!(indices_in_box(&tree, &bbox), vec![0, 1, 2]);
    }

    #[test]
    fn test_nearest_uses_lon_lat_order() {
        let points = vec![GeoPoint::new(10.0, 50.0), GeoPoint::new(50.0, 10.0)];
        let tree = build_rtree(&points);
        let nearest = tree.nearest_neighbor(&[10.1, 50.1]).unwrap();
        assert_eq!(nearest.idx, 0);
    }
}
