//! # K-Means Hotspot Clustering
//!
//! Clusters trip origins into `k` hotspots.
//!
//! ## Algorithm
//! - **Init**: k-means++ (first center uniform, then proportional to squared
//!   distance from the nearest chosen center)
//! - **Iterate**: Lloyd steps until no center moves more than the tolerance
//!   or `max_iter` is reached
//! - **Restart**: `n_init` independent runs, keep the lowest inertia
//!
//! Distances are squared Euclidean in raw lon/lat degrees. At city scale the
//! distortion is uniform enough that hotspot placement is unaffected.
//!
//! A run never returns fewer than `k` centers: a cluster that loses all its
//! points is reseeded with the point farthest from its current center.

use std::collections::HashSet;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TripflowError};
use crate::GeoPoint;

/// Configuration for [`kmeans`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansConfig {
    /// Number of clusters.
    /// Default: 5
    pub k: usize,

    /// Independent initializations; the run with the lowest inertia wins.
    /// Default: 10
    pub n_init: usize,

    /// Lloyd iterations per run.
    /// Default: 300
    pub max_iter: usize,

    /// Convergence threshold, relative to the mean per-axis variance of the
    /// data. A run stops once the squared movement of every center is below
    /// `tolerance * variance`.
    /// Default: 1e-4
    pub tolerance: f64,

    /// Seed for reproducible runs.
    /// Default: None (seeded from the OS)
    pub seed: Option<u64>,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 5,
            n_init: 10,
            max_iter: 300,
            tolerance: 1e-4,
            seed: None,
        }
    }
}

impl KMeansConfig {
    pub fn with_k(k: usize) -> Self {
        Self {
            k,
            ..Default::default()
        }
    }
}

/// Result of clustering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterResult {
    /// Exactly `k` centers
    pub centers: Vec<GeoPoint>,
    /// Sum of squared distances from each point to its center
    pub inertia: f64,
    /// Number of points assigned to each center
    pub sizes: Vec<usize>,
}

/// Partition `points` into `config.k` clusters.
///
/// # Errors
/// [`TripflowError::InsufficientData`] when `points` is empty, `k == 0`, or
/// `k` exceeds the number of distinct points.
pub fn kmeans(points: &[GeoPoint], config: &KMeansConfig) -> Result<ClusterResult> {
    let k = config.k;
    if points.is_empty() {
        return Err(TripflowError::insufficient("no points to cluster"));
    }
    if k == 0 {
        return Err(TripflowError::insufficient("k must be at least 1"));
    }
    let distinct = count_distinct(points);
    if k > distinct {
        return Err(TripflowError::insufficient(format!(
            "k = {k} exceeds {distinct} distinct points"
        )));
    }

    let data: Vec<[f64; 2]> = points.iter().map(|p| [p.longitude, p.latitude]).collect();
    let tol = config.tolerance * mean_variance(&data);
    let runs = config.n_init.max(1);
    let max_iter = config.max_iter.max(1);

    let run = |i: usize| {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(i as u64)),
            None => StdRng::from_os_rng(),
        };
        (i, lloyd(&data, k, max_iter, tol, &mut rng))
    };

    #[cfg(feature = "parallel")]
    let best = {
        use rayon::prelude::*;
        (0..runs).into_par_iter().map(run).reduce_with(pick_better)
    };
    #[cfg(not(feature = "parallel"))]
    let best = (0..runs).map(run).reduce(pick_better);

    let (best_run, fit) = best.ok_or_else(|| TripflowError::Internal {
        message: "k-means produced no runs".to_string(),
    })?;

    debug!(
        "[KMeans] k={} over {} points: best run {} of {}, inertia {:.6e}, {} iterations",
        k,
        points.len(),
        best_run,
        runs,
        fit.inertia,
        fit.iterations
    );

    Ok(ClusterResult {
        centers: fit
            .centers
            .iter()
            .map(|c| GeoPoint::new(c[0], c[1]))
            .collect(),
        inertia: fit.inertia,
        sizes: fit.sizes,
    })
}

/// Lowest inertia wins; ties go to the earlier run so parallel and
/// sequential execution agree.
fn pick_better(a: (usize, Fit), b: (usize, Fit)) -> (usize, Fit) {
    match a.1.inertia.total_cmp(&b.1.inertia) {
        std::cmp::Ordering::Less => a,
        std::cmp::Ordering::Greater => b,
        std::cmp::Ordering::Equal if a.0 <= b.0 => a,
        std::cmp::Ordering::Equal => b,
    }
}

struct Fit {
    centers: Vec<[f64; 2]>,
    inertia: f64,
    sizes: Vec<usize>,
    iterations: usize,
}

fn count_distinct(points: &[GeoPoint]) -> usize {
    points
        .iter()
        .map(|p| (p.longitude.to_bits(), p.latitude.to_bits()))
        .collect::<HashSet<_>>()
        .len()
}

fn mean_variance(data: &[[f64; 2]]) -> f64 {
    let n = data.len() as f64;
    let mut total = 0.0;
    for axis in 0..2 {
        let mean = data.iter().map(|p| p[axis]).sum::<f64>() / n;
        total += data.iter().map(|p| (p[axis] - mean).powi(2)).sum::<f64>() / n;
    }
    total / 2.0
}

#[inline]
fn dist2(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// Index of the nearest center and the squared distance to it.
fn nearest(point: &[f64; 2], centers: &[[f64; 2]]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (j, c) in centers.iter().enumerate() {
        let d = dist2(point, c);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

fn kmeans_plus_plus<R: Rng + ?Sized>(data: &[[f64; 2]], k: usize, rng: &mut R) -> Vec<[f64; 2]> {
    let mut centers = Vec::with_capacity(k);
    centers.push(data[rng.random_range(0..data.len())]);

    let mut d2: Vec<f64> = data.iter().map(|p| dist2(p, &centers[0])).collect();
    while centers.len() < k {
        let total: f64 = d2.iter().sum();
        // Only reachable through float underflow; k <= distinct points
        // guarantees some point is still away from every center
        let next = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = None;
            for (i, &w) in d2.iter().enumerate() {
                if w > 0.0 {
                    chosen = Some(i);
                    if target < w {
                        break;
                    }
                    target -= w;
                }
            }
            chosen.unwrap_or(0)
        } else {
            farthest_index(&d2)
        };

        let center = data[next];
        for (i, p) in data.iter().enumerate() {
            d2[i] = d2[i].min(dist2(p, &center));
        }
        centers.push(center);
    }
    centers
}

fn farthest_index(d2: &[f64]) -> usize {
    d2.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn lloyd<R: Rng + ?Sized>(
    data: &[[f64; 2]],
    k: usize,
    max_iter: usize,
    tol: f64,
    rng: &mut R,
) -> Fit {
    let mut centers = kmeans_plus_plus(data, k, rng);
    let mut labels = vec![0usize; data.len()];
    let mut iterations = 0;

    for _ in 0..max_iter {
        iterations += 1;

        // Assignment
        let mut d2 = vec![0.0; data.len()];
        for (i, p) in data.iter().enumerate() {
            let (j, d) = nearest(p, &centers);
            labels[i] = j;
            d2[i] = d;
        }

        // Update
        let mut sums = vec![[0.0f64; 2]; k];
        let mut counts = vec![0usize; k];
        for (p, &j) in data.iter().zip(&labels) {
            sums[j][0] += p[0];
            sums[j][1] += p[1];
            counts[j] += 1;
        }

        let mut new_centers = Vec::with_capacity(k);
        for j in 0..k {
            if counts[j] > 0 {
                let n = counts[j] as f64;
                new_centers.push([sums[j][0] / n, sums[j][1] / n]);
            } else {
                new_centers.push(centers[j]);
            }
        }

        // Reseed empty clusters with the worst-served points
        for j in 0..k {
            if counts[j] == 0 {
                let far = farthest_index(&d2);
                new_centers[j] = data[far];
                d2[far] = 0.0;
            }
        }

        let shift = centers
            .iter()
            .zip(&new_centers)
            .map(|(a, b)| dist2(a, b))
            .fold(0.0, f64::max);
        centers = new_centers;
        if shift <= tol {
            break;
        }
    }

    // Final assignment against the final centers
    let mut sizes = vec![0usize; k];
    let mut inertia = 0.0;
    for p in data {
        let (j, d) = nearest(p, &centers);
        sizes[j] += 1;
        inertia += d;
    }

    Fit {
        centers,
        inertia,
        sizes,
        iterations,
    }
}
