//! Seeded k-means (k-means++ initialisation, Lloyd iterations)

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansConfig {
    pub k: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub seed: u64,
}

impl KMeansConfig {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iterations: 300,
            tolerance: 1e-4,
            seed: 42,
        }
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centers: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, center) in centers.iter().enumerate() {
        let d = squared_distance(point, center);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn init_centers(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centers = vec![points[rng.gen_range(0..points.len())].clone()];
    while centers.len() < k {
        let weights: Vec<f64> = points.iter().map(|p| nearest(p, &centers).1).collect();
        let total: f64 = weights.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            // every point coincides with a center already
            rng.gen_range(0..points.len())
        };
        centers.push(points[pick].clone());
    }
    centers
}

/// Cluster `points` into `config.k` groups and return one label per point.
///
/// Labels are in `0..k`; some labels may be unused when points coincide.
/// With fewer points than clusters every point gets its own label.
pub fn fit_predict(points: &[Vec<f64>], config: &KMeansConfig) -> Vec<usize> {
    if points.is_empty() || config.k == 0 {
        return Vec::new();
    }
    if points.len() <= config.k {
        return (0..points.len()).collect();
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut centers = init_centers(points, config.k, &mut rng);
    let mut labels = vec![usize::MAX; points.len()];

    for _ in 0..config.max_iterations {
        let mut changed = false;
        for (label, point) in labels.iter_mut().zip(points) {
            let (best, _) = nearest(point, &centers);
            if *label != best {
                *label = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let dim = points[0].len();
        let mut sums = vec![vec![0.0; dim]; config.k];
        let mut counts = vec![0usize; config.k];
        for (label, point) in labels.iter().zip(points) {
            counts[*label] += 1;
            for (s, v) in sums[*label].iter_mut().zip(point) {
                *s += v;
            }
        }

        let mut shift = 0.0;
        for (c, (sum, count)) in sums.into_iter().zip(counts).enumerate() {
            if count == 0 {
                continue;
            }
            let updated: Vec<f64> = sum.into_iter().map(|s| s / count as f64).collect();
            shift += squared_distance(&centers[c], &updated);
            centers[c] = updated;
        }
        if shift <= config.tolerance * config.tolerance {
            break;
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separates_obvious_groups() {
        let points = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![10.0, 10.0],
            vec![10.1, 10.0],
            vec![10.0, 10.1],
        ];
        let labels = fit_predict(&points, &KMeansConfig::new(2));
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_labels_bounded_by_k() {
        let points: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let labels = fit_predict(&points, &KMeansConfig::new(4));
        assert_eq!(labels.len(), 20);
        assert!(labels.iter().all(|&l| l < 4));
    }

    #[test]
    fn test_deterministic_for_seed() {
        let points: Vec<Vec<f64>> = (0..15).map(|i| vec![(i * 7 % 5) as f64, i as f64]).collect();
        let config = KMeansConfig::new(3);
        assert_eq!(fit_predict(&points, &config), fit_predict(&points, &config));
    }

    #[test]
    fn test_identical_points() {
        let points = vec![vec![1.0, 1.0]; 6];
        let labels = fit_predict(&points, &KMeansConfig::new(3));
        assert!(labels.iter().all(|&l| l < 3));
    }
}
