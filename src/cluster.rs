//! Seeded k-means over small feature matrices.
//!
//! Used to split a habit slot's tracks into audio profiles. Inputs are a few
//! dozen to a few hundred points with a handful of dimensions, so a plain
//! Lloyd loop is plenty.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// k-means with k-means++ initialization.
#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    pub k: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

/// Result of a fit.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// Cluster index per input point
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub iterations: usize,
}

impl Clustering {
    /// Number of points per cluster.
    #[must_use]
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for &a in &self.assignments {
            sizes[a] += 1;
        }
        sizes
    }
}

impl KMeans {
    #[must_use]
    pub fn new(k: usize, seed: u64) -> Self {
        Self {
            k,
            max_iterations: 100,
            seed,
        }
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Cluster `points`. `None` if there are fewer points than clusters or
    /// the points disagree on dimension.
    #[must_use]
    pub fn fit(&self, points: &[Vec<f64>]) -> Option<Clustering> {
        if self.k == 0 || points.len() < self.k {
            return None;
        }
        let dim = points[0].len();
        if points.iter().any(|p| p.len() != dim) {
            return None;
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = self.initial_centroids(points, &mut rng);
        let mut assignments = vec![usize::MAX; points.len()];
        let mut iterations = 0;

        while iterations < self.max_iterations {
            iterations += 1;

            let mut changed = false;
            for (point, slot) in points.iter().zip(assignments.iter_mut()) {
                let nearest = nearest(point, &centroids).0;
                if *slot != nearest {
                    *slot = nearest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            // Empty clusters keep their previous centroid
            let mut sums = vec![vec![0.0; dim]; self.k];
            let mut counts = vec![0_usize; self.k];
            for (point, &cluster) in points.iter().zip(&assignments) {
                counts[cluster] += 1;
                for (s, v) in sums[cluster].iter_mut().zip(point) {
                    *s += v;
                }
            }
            for ((centroid, sum), &count) in centroids.iter_mut().zip(sums).zip(&counts) {
                if count > 0 {
                    #[allow(clippy::cast_precision_loss)]
                    let n = count as f64;
                    *centroid = sum.into_iter().map(|s| s / n).collect();
                }
            }
        }

        Some(Clustering {
            assignments,
            centroids,
            iterations,
        })
    }

    fn initial_centroids(&self, points: &[Vec<f64>], rng: &mut StdRng) -> Vec<Vec<f64>> {
        let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];

        while centroids.len() < self.k {
            let distances: Vec<f64> = points.iter().map(|p| nearest(p, &centroids).1).collect();
            let total: f64 = distances.iter().sum();

            let index = if total > 0.0 {
                let mut target = rng.gen::<f64>() * total;
                let mut chosen = points.len() - 1;
                for (i, d) in distances.iter().enumerate() {
                    if target < *d {
                        chosen = i;
                        break;
                    }
                    target -= d;
                }
                chosen
            } else {
                // All points already coincide with a centroid
                rng.gen_range(0..points.len())
            };
            centroids.push(points[index].clone());
        }

        centroids
    }
}

/// Index of and squared distance to the closest centroid. Ties go to the
/// lower index.
fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best.1 {
            best = (i, distance);
        }
    }
    best
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Z-standardize each column (population std). Constant columns become 0.
#[must_use]
pub fn standardize(points: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let Some(first) = points.first() else {
        return Vec::new();
    };
    let dim = first.len();
    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;

    let mut means = vec![0.0; dim];
    for point in points {
        for (m, v) in means.iter_mut().zip(point) {
            *m += v / n;
        }
    }
    let mut stds = vec![0.0; dim];
    for point in points {
        for ((s, v), m) in stds.iter_mut().zip(point).zip(&means) {
            *s += (v - m).powi(2) / n;
        }
    }
    let stds: Vec<f64> = stds.into_iter().map(f64::sqrt).collect();

    points
        .iter()
        .map(|point| {
            point
                .iter()
                .zip(means.iter().zip(&stds))
                .map(|(v, (m, s))| if *s > 1e-12 { (v - m) / s } else { 0.0 })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<Vec<f64>> {
        let mut points = Vec::new();
        for (cx, cy) in [(0.0, 0.0), (10.0, 10.0), (0.0, 10.0)] {
            for i in 0..5 {
                let jitter = f64::from(i) * 0.1;
                points.push(vec![cx + jitter, cy - jitter]);
            }
        }
        points
    }

    #[test]
    fn test_separates_obvious_blobs() {
        let clustering = KMeans::new(3, 42).fit(&blobs()).unwrap();

        let mut sizes = clustering.sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![5, 5, 5]);

        // each blob lands in a single cluster
        for blob in clustering.assignments.chunks(5) {
            assert!(blob.iter().all(|&a| a == blob[0]));
        }
    }

    #[test]
    fn test_same_seed_same_result() {
        let a = KMeans::new(3, 7).fit(&blobs()).unwrap();
        let b = KMeans::new(3, 7).fit(&blobs()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_too_few_points() {
        let points = vec![vec![1.0], vec![2.0]];
        assert!(KMeans::new(3, 42).fit(&points).is_none());
        assert!(KMeans::new(0, 42).fit(&points).is_none());
    }

    #[test]
    fn test_identical_points_do_not_panic() {
        let points = vec![vec![1.0, 1.0]; 6];
        let clustering = KMeans::new(2, 42).fit(&points).unwrap();
        assert_eq!(clustering.assignments.len(), 6);
        assert!(clustering.assignments.iter().all(|&a| a == 0));
    }

    #[test]
    fn test_standardize_constant_column_is_zero() {
        let points = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let z = standardize(&points);
        assert_eq!(z, vec![vec![-1.0, 0.0], vec![1.0, 0.0]]);
    }
}
