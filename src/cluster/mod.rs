use nalgebra::Point3;

use crate::core::streamline::Streamline;
use crate::geometry::distances::{average_direct_distance, average_flip_distance};

/// One cluster: a running-mean centroid path plus the positions of its
/// members in the clustered collection.
#[derive(Debug, Clone)]
pub struct BundleCluster {
    pub centroid: Streamline,
    pub indices: Vec<usize>,
}

impl BundleCluster {
    pub fn size(&self) -> usize {
        self.indices.len()
    }
}

/// Incremental centroid clustering over the minimum average direct-flip
/// distance. Every streamline is resampled to `n_points` and merged into
/// the nearest centroid within `threshold`, in either orientation, or seeds
/// a new cluster. Deterministic in input order.
#[derive(Debug, Clone, Copy)]
pub struct QuickBundles {
    pub threshold: f64,
    pub n_points: usize,
}

impl QuickBundles {
    pub fn new(threshold: f64, n_points: usize) -> Self {
        assert!(threshold > 0.0, "cluster threshold must be positive");
        assert!(n_points >= 2, "centroids need at least two points");
        Self { threshold, n_points }
    }

    pub fn cluster(&self, streamlines: &[Streamline]) -> Vec<BundleCluster> {
        let mut clusters: Vec<BundleCluster> = Vec::new();

        for (idx, sl) in streamlines.iter().enumerate() {
            if sl.is_empty() {
                continue;
            }
            let resampled = sl.resample(self.n_points);

            // Nearest centroid over both orientations.
            let mut best: Option<(usize, f64, bool)> = None;
            for (ci, cluster) in clusters.iter().enumerate() {
                let direct = average_direct_distance(&cluster.centroid, &resampled);
                let flipped = average_flip_distance(&cluster.centroid, &resampled);
                let (dist, flip) = if flipped < direct {
                    (flipped, true)
                } else {
                    (direct, false)
                };
                if best.map_or(true, |(_, d, _)| dist < d) {
                    best = Some((ci, dist, flip));
                }
            }

            match best {
                Some((ci, dist, flip)) if dist <= self.threshold => {
                    let oriented = if flip { resampled.reversed() } else { resampled };
                    let cluster = &mut clusters[ci];
                    let count = cluster.size() as f64;
                    let updated: Vec<Point3<f64>> = cluster
                        .centroid
                        .points
                        .iter()
                        .zip(oriented.points.iter())
                        .map(|(c, p)| Point3::from((c.coords * count + p.coords) / (count + 1.0)))
                        .collect();
                    cluster.centroid = Streamline::new(updated);
                    cluster.indices.push(idx);
                }
                _ => clusters.push(BundleCluster {
                    centroid: resampled,
                    indices: vec![idx],
                }),
            }
        }
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::offset_line;

    #[test]
    fn test_two_well_separated_groups() {
        // Two tight groups 50 units apart in y.
        let mut streamlines = Vec::new();
        for i in 0..4 {
            streamlines.push(offset_line(0.0, i as f64 * 0.1, 10));
        }
        for i in 0..3 {
            streamlines.push(offset_line(50.0, i as f64 * 0.1, 10));
        }
        let clusters = QuickBundles::new(2.0, 12).cluster(&streamlines);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].indices, vec![0, 1, 2, 3]);
        assert_eq!(clusters[1].indices, vec![4, 5, 6]);
    }

    #[test]
    fn test_flipped_member_joins_same_cluster() {
        let a = offset_line(0.0, 0.0, 10);
        let b = offset_line(0.0, 0.2, 10).reversed();
        let clusters = QuickBundles::new(2.0, 12).cluster(&[a, b]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].size(), 2);
    }

    #[test]
    fn test_centroid_is_running_mean() {
        let a = offset_line(0.0, 0.0, 10);
        let b = offset_line(0.0, 1.0, 10);
        let clusters = QuickBundles::new(5.0, 12).cluster(&[a, b]);
        assert_eq!(clusters.len(), 1);
        for p in &clusters[0].centroid.points {
            approx::assert_relative_eq!(p.y, 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_empty_streamlines_are_skipped() {
        let clusters = QuickBundles::new(2.0, 12)
            .cluster(&[Streamline::new(vec![]), offset_line(0.0, 0.0, 10)]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].indices, vec![1]);
    }
}
