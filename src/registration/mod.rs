use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use rand::rngs::StdRng;

use crate::cluster::QuickBundles;
use crate::core::streamline::Streamline;
use crate::geometry::distances::{average_direct_distance, average_flip_distance};

/// Controls for the streamline-based rigid alignment used ahead of
/// cluster-recognition matching.
#[derive(Debug, Clone, Copy)]
pub struct SlrParams {
    /// At most this many streamlines from each side enter the alignment.
    pub max_subsample: usize,
    /// Point count every streamline is resampled to.
    pub n_points: usize,
    /// Cluster threshold used to reduce each side to centroid paths.
    pub qb_threshold: f64,
    /// Iteration cap of the correspondence/fit loop.
    pub max_iter: usize,
    /// Stop once the mean correspondence distance improves by less.
    pub tol: f64,
}

impl Default for SlrParams {
    fn default() -> Self {
        Self {
            max_subsample: 400,
            n_points: 20,
            qb_threshold: 15.0,
            max_iter: 10,
            tol: 1e-7,
        }
    }
}

/// Rigid (rotation + translation) transform in streamline world space.
#[derive(Debug, Clone, Copy)]
pub struct RigidTransform {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn apply_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation * p + self.translation
    }

    pub fn apply_streamline(&self, sl: &Streamline) -> Streamline {
        Streamline::new(sl.points.iter().map(|p| self.apply_point(p)).collect())
    }

    /// `other` first, then `self`.
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        RigidTransform {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }
}

/// Best-fit rotation and translation carrying `moving` onto `fixed`
/// (Kabsch, via SVD of the cross-covariance).
fn kabsch(moving: &[Point3<f64>], fixed: &[Point3<f64>]) -> RigidTransform {
    assert_eq!(moving.len(), fixed.len());
    let n = moving.len() as f64;

    let cm: Vector3<f64> = moving.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n;
    let cf: Vector3<f64> = fixed.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n;

    let mut h = Matrix3::zeros();
    for (m, f) in moving.iter().zip(fixed.iter()) {
        h += (m.coords - cm) * (f.coords - cf).transpose();
    }

    let svd = h.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        // Degenerate covariance, e.g. a single point pair: translate only.
        _ => {
            return RigidTransform {
                rotation: Rotation3::identity(),
                translation: cf - cm,
            }
        }
    };

    let mut r = v_t.transpose() * u.transpose();
    if r.determinant() < 0.0 {
        // Reflection correction.
        let mut v = v_t.transpose();
        let flipped = -v.column(2);
        v.set_column(2, &flipped);
        r = v * u.transpose();
    }
    let rotation = Rotation3::from_matrix_unchecked(r);
    RigidTransform {
        translation: cf - rotation * cm,
        rotation,
    }
}

fn subsample<'a>(
    streamlines: &'a [Streamline],
    limit: usize,
    rng: &mut StdRng,
) -> Vec<&'a Streamline> {
    if streamlines.len() <= limit {
        return streamlines.iter().collect();
    }
    let mut picked: Vec<usize> = rand::seq::index::sample(rng, streamlines.len(), limit).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| &streamlines[i]).collect()
}

fn centroids(streamlines: &[Streamline], params: &SlrParams) -> Vec<Streamline> {
    QuickBundles::new(params.qb_threshold, params.n_points)
        .cluster(streamlines)
        .into_iter()
        .map(|c| c.centroid)
        .collect()
}

/// One correspondence: a moving centroid paired point-for-point with its
/// closest fixed centroid, in the closer of the two orientations.
struct CentroidPair {
    moving: usize,
    fixed: usize,
    flipped: bool,
    dist: f64,
}

fn match_centroids(moving: &[Streamline], fixed: &[Streamline]) -> Vec<CentroidPair> {
    moving
        .iter()
        .enumerate()
        .map(|(mi, m)| {
            let mut best = CentroidPair {
                moving: mi,
                fixed: 0,
                flipped: false,
                dist: f64::INFINITY,
            };
            for (fi, f) in fixed.iter().enumerate() {
                let direct = average_direct_distance(m, f);
                let flip = average_flip_distance(m, f);
                let (dist, flipped) = if flip < direct { (flip, true) } else { (direct, false) };
                if dist < best.dist {
                    best = CentroidPair {
                        moving: mi,
                        fixed: fi,
                        flipped,
                        dist,
                    };
                }
            }
            best
        })
        .collect()
}

/// Aligns `moving` onto `fixed` with a rigid transform.
///
/// Both sides are subsampled (seeded, so a fixed seed reproduces the
/// transform), resampled, and reduced to cluster centroid paths. Each
/// iteration pairs every moving centroid with its closest fixed centroid,
/// keeps the better half of the pairs, fits a Kabsch step on their
/// point-for-point correspondences, and repeats until the mean pair
/// distance stops improving. Returns the transform and the fully
/// transformed copy of `moving`.
pub fn slr_align(
    fixed: &[Streamline],
    moving: &[Streamline],
    params: &SlrParams,
    rng: &mut StdRng,
) -> (RigidTransform, Vec<Streamline>) {
    let fixed_sub: Vec<Streamline> = subsample(fixed, params.max_subsample, rng)
        .into_iter()
        .filter(|sl| !sl.is_empty())
        .map(|sl| sl.resample(params.n_points))
        .collect();
    let moving_sub: Vec<Streamline> = subsample(moving, params.max_subsample, rng)
        .into_iter()
        .filter(|sl| !sl.is_empty())
        .map(|sl| sl.resample(params.n_points))
        .collect();

    if fixed_sub.is_empty() || moving_sub.is_empty() {
        return (RigidTransform::identity(), moving.to_vec());
    }

    let fixed_centroids = centroids(&fixed_sub, params);
    let mut moving_centroids = centroids(&moving_sub, params);

    let mut total = RigidTransform::identity();
    let mut prev_err = f64::INFINITY;

    for _ in 0..params.max_iter {
        let mut pairs = match_centroids(&moving_centroids, &fixed_centroids);
        // Keep the better half; stray clusters without a true counterpart
        // must not drag the fit.
        pairs.sort_by(|a, b| a.dist.total_cmp(&b.dist));
        pairs.truncate(pairs.len().div_ceil(2));

        let err = pairs.iter().map(|p| p.dist).sum::<f64>() / pairs.len() as f64;
        if prev_err - err < params.tol {
            break;
        }
        prev_err = err;

        let mut moving_pts = Vec::with_capacity(pairs.len() * params.n_points);
        let mut fixed_pts = Vec::with_capacity(pairs.len() * params.n_points);
        for pair in &pairs {
            let m = &moving_centroids[pair.moving];
            let f = &fixed_centroids[pair.fixed];
            moving_pts.extend(m.points.iter().copied());
            if pair.flipped {
                fixed_pts.extend(f.points.iter().rev().copied());
            } else {
                fixed_pts.extend(f.points.iter().copied());
            }
        }

        let step = kabsch(&moving_pts, &fixed_pts);
        for c in moving_centroids.iter_mut() {
            *c = step.apply_streamline(c);
        }
        total = step.compose(&total);
    }

    let aligned = moving.iter().map(|sl| total.apply_streamline(sl)).collect();
    (total, aligned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    use crate::utils::test_utils::offset_line;

    fn demo_bundle() -> Vec<Streamline> {
        (0..8).map(|i| offset_line(0.0, i as f64 * 0.5, 12)).collect()
    }

    #[test]
    fn test_recovers_translation() {
        let fixed = demo_bundle();
        let shift = Vector3::new(4.0, -2.0, 1.0);
        let moving: Vec<Streamline> = fixed
            .iter()
            .map(|sl| Streamline::new(sl.points.iter().map(|p| p + shift).collect()))
            .collect();

        let mut rng = StdRng::seed_from_u64(8);
        let (xf, aligned) = slr_align(&fixed, &moving, &SlrParams::default(), &mut rng);

        assert_relative_eq!(xf.translation.x, -4.0, epsilon = 1e-6);
        assert_relative_eq!(xf.translation.y, 2.0, epsilon = 1e-6);
        assert_relative_eq!(xf.translation.z, -1.0, epsilon = 1e-6);
        for (a, f) in aligned[0].points.iter().zip(fixed[0].points.iter()) {
            assert_relative_eq!((a - f).norm(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_stray_cluster_does_not_drag_the_fit() {
        let fixed = demo_bundle();
        let shift = Vector3::new(0.0, 1.0, 0.0);
        let mut moving: Vec<Streamline> = fixed
            .iter()
            .map(|sl| Streamline::new(sl.points.iter().map(|p| p + shift).collect()))
            .collect();
        // A far-away bundle with no counterpart on the fixed side.
        for i in 0..8 {
            moving.push(offset_line(200.0, i as f64 * 0.5, 12));
        }

        let mut rng = StdRng::seed_from_u64(8);
        let (xf, _) = slr_align(&fixed, &moving, &SlrParams::default(), &mut rng);
        assert_relative_eq!(xf.translation.y, -1.0, epsilon = 1e-6);
        assert!(xf.translation.x.abs() < 1e-6);
    }

    #[test]
    fn test_same_seed_reproduces_transform() {
        let fixed = demo_bundle();
        let moving: Vec<Streamline> = fixed
            .iter()
            .map(|sl| {
                Streamline::new(
                    sl.points.iter().map(|p| p + Vector3::new(1.0, 2.0, 0.0)).collect(),
                )
            })
            .collect();

        let mut rng_a = StdRng::seed_from_u64(77);
        let mut rng_b = StdRng::seed_from_u64(77);
        let (xf_a, _) = slr_align(&fixed, &moving, &SlrParams::default(), &mut rng_a);
        let (xf_b, _) = slr_align(&fixed, &moving, &SlrParams::default(), &mut rng_b);
        assert_eq!(xf_a.translation, xf_b.translation);
        assert_eq!(xf_a.rotation, xf_b.rotation);
    }

    #[test]
    fn test_empty_moving_yields_identity() {
        let fixed = demo_bundle();
        let mut rng = StdRng::seed_from_u64(1);
        let (xf, aligned) = slr_align(&fixed, &[], &SlrParams::default(), &mut rng);
        assert_eq!(aligned.len(), 0);
        assert_relative_eq!(xf.translation.norm(), 0.0);
    }
}
