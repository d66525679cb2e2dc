//! k-means with k-means++ seeding.
//!
//! Distances are squared Euclidean. Assignment ties go to the lowest centroid
//! index. A cluster left empty by an assignment step is reseeded with the
//! point lying farthest from the centroid of the cluster that currently holds
//! it, so every cluster keeps at least one member as long as `k <= n`.

use super::squared_distance;
use crate::error::CoreError;
use rand::Rng;
use std::str::FromStr;

/// Auto-k never goes below or above these bounds (and never above n).
pub const MIN_AUTO_K: usize = 2;
pub const MAX_AUTO_K: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterCount {
    Auto,
    Fixed(usize),
}

impl FromStr for ClusterCount {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(ClusterCount::Auto);
        }
        s.parse::<usize>()
            .map(ClusterCount::Fixed)
            .map_err(|_| CoreError::InvalidClusterCount(format!("expected \"auto\" or a number, got {s:?}")))
    }
}

/// `round(sqrt(n / 2))`, clamped to `[MIN_AUTO_K, MAX_AUTO_K]` and to `n`.
pub fn estimate_k(n: usize) -> usize {
    let k = ((n as f64) / 2.0).sqrt().round() as usize;
    k.clamp(MIN_AUTO_K, MAX_AUTO_K).min(n)
}

/// Picks `min(k, points.len())` initial centroids.
///
/// The first is a uniformly random input point; each later one is sampled
/// with probability proportional to its squared distance from the nearest
/// centroid chosen so far.
pub fn init_centroids_plus_plus<P, R>(points: &[P], k: usize, rng: &mut R) -> Vec<Vec<f32>>
where
    P: AsRef<[f32]>,
    R: Rng + ?Sized,
{
    let n = points.len();
    let k = k.min(n);
    if k == 0 {
        return Vec::new();
    }

    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.random_range(0..n)].as_ref().to_vec());
    let mut nearest: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(p.as_ref(), &centroids[0]) as f64)
        .collect();

    while centroids.len() < k {
        let total: f64 = nearest.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = None;
            for (i, d) in nearest.iter().enumerate() {
                if *d <= 0.0 {
                    continue;
                }
                chosen = Some(i);
                if target < *d {
                    break;
                }
                target -= d;
            }
            chosen.unwrap_or(0)
        } else {
            // Every point coincides with a centroid already.
            rng.random_range(0..n)
        };

        let centroid = points[chosen].as_ref().to_vec();
        for (i, p) in points.iter().enumerate() {
            let d = squared_distance(p.as_ref(), &centroid) as f64;
            if d < nearest[i] {
                nearest[i] = d;
            }
        }
        centroids.push(centroid);
    }
    centroids
}

/// Index of the nearest centroid for every point; ties go to the lower index.
pub fn assign_points<P: AsRef<[f32]>>(points: &[P], centroids: &[Vec<f32>]) -> Vec<usize> {
    points
        .iter()
        .map(|p| {
            let mut best = 0;
            let mut best_dist = f32::INFINITY;
            for (j, c) in centroids.iter().enumerate() {
                let d = squared_distance(p.as_ref(), c);
                if d < best_dist {
                    best_dist = d;
                    best = j;
                }
            }
            best
        })
        .collect()
}

/// Moves a point into each empty cluster. Returns how many clusters were reseeded.
///
/// The donor is the point farthest from its own cluster's centroid, taken only
/// from clusters that keep at least one member; ties go to the earlier point.
pub fn reseed_empty_clusters<P: AsRef<[f32]>>(
    points: &[P],
    assignments: &mut [usize],
    centroids: &mut [Vec<f32>],
) -> usize {
    let k = centroids.len();
    let mut counts = vec![0usize; k];
    for &a in assignments.iter() {
        counts[a] += 1;
    }

    let mut reseeded = 0;
    for empty in 0..k {
        if counts[empty] > 0 {
            continue;
        }
        let mut donor: Option<(usize, f32)> = None;
        for (i, p) in points.iter().enumerate() {
            let owner = assignments[i];
            if counts[owner] <= 1 {
                continue;
            }
            let d = squared_distance(p.as_ref(), &centroids[owner]);
            if donor.map_or(true, |(_, best)| d > best) {
                donor = Some((i, d));
            }
        }
        let Some((i, _)) = donor else {
            break;
        };
        counts[assignments[i]] -= 1;
        assignments[i] = empty;
        counts[empty] = 1;
        centroids[empty] = points[i].as_ref().to_vec();
        reseeded += 1;
    }
    reseeded
}

/// Coordinate-wise mean of each cluster's members. Empty clusters keep their centroid.
pub fn recompute_centroids<P: AsRef<[f32]>>(
    points: &[P],
    assignments: &[usize],
    previous: &[Vec<f32>],
) -> Vec<Vec<f32>> {
    let dim = previous.first().map(Vec::len).unwrap_or(0);
    let mut sums = vec![vec![0.0f64; dim]; previous.len()];
    let mut counts = vec![0usize; previous.len()];
    for (p, &a) in points.iter().zip(assignments) {
        counts[a] += 1;
        for (s, v) in sums[a].iter_mut().zip(p.as_ref()) {
            *s += *v as f64;
        }
    }
    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), prev)| {
            if count == 0 {
                prev.clone()
            } else {
                sum.into_iter().map(|s| (s / count as f64) as f32).collect()
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct KMeansOutcome {
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f32>>,
    pub iterations: usize,
    pub converged: bool,
    /// Sum of squared distances from each point to its centroid.
    pub inertia: f64,
}

/// Lloyd iterations until assignments stop changing or `max_iterations` is hit.
///
/// Runs synchronously and does not yield.
pub fn run_kmeans<P, R>(points: &[P], k: usize, max_iterations: usize, rng: &mut R) -> KMeansOutcome
where
    P: AsRef<[f32]>,
    R: Rng + ?Sized,
{
    let mut centroids = init_centroids_plus_plus(points, k, rng);
    if centroids.is_empty() {
        return KMeansOutcome::default();
    }

    let mut assignments: Vec<usize> = Vec::new();
    let mut iterations = 0;
    let mut converged = false;
    for iter in 1..=max_iterations.max(1) {
        let mut next = assign_points(points, &centroids);
        reseed_empty_clusters(points, &mut next, &mut centroids);
        let changed = next != assignments;
        assignments = next;
        centroids = recompute_centroids(points, &assignments, &centroids);
        iterations = iter;
        if !changed {
            converged = true;
            break;
        }
    }

    let inertia = points
        .iter()
        .zip(&assignments)
        .map(|(p, &a)| squared_distance(p.as_ref(), &centroids[a]) as f64)
        .sum();

    KMeansOutcome {
        assignments,
        centroids,
        iterations,
        converged,
        inertia,
    }
}
