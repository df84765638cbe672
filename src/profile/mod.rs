use anyhow::Result;
use ndarray::Array3;

use crate::core::streamline::StreamlineSet;
use crate::core::volume::sample_trilinear;
use crate::segmentation::SegmentationError;

/// Along-tract profile: every streamline is resampled to `n_points`, the
/// scalar volume is sampled trilinearly at each node, and the per-node mean
/// across the bundle is returned. Streamlines and volume must share the
/// same voxel space.
pub fn tract_profile(
    data: &Array3<f64>,
    bundle: &StreamlineSet,
    n_points: usize,
) -> Result<Vec<f64>> {
    if bundle.is_empty() {
        return Err(SegmentationError::EmptyBundle.into());
    }

    let mut profile = vec![0.0; n_points];
    for sl in bundle.iter() {
        let resampled = sl.resample(n_points);
        for (node, p) in resampled.points.iter().enumerate() {
            profile[node] += sample_trilinear(data, p);
        }
    }
    let count = bundle.len() as f64;
    for v in profile.iter_mut() {
        *v /= count;
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::streamline::StreamlineSet;
    use crate::utils::test_utils::straight_line_through;
    use approx::assert_relative_eq;

    #[test]
    fn test_profile_of_all_ones_volume_is_all_ones() {
        let data = Array3::from_elem((20, 20, 20), 1.0);
        let bundle = StreamlineSet::from_streamlines(vec![
            straight_line_through(18, 5.0, 5.0),
            straight_line_through(18, 6.0, 6.0),
        ]);
        let profile = tract_profile(&data, &bundle, 100).unwrap();
        assert_eq!(profile.len(), 100);
        for v in profile {
            assert_relative_eq!(v, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_profile_tracks_a_gradient() {
        // Volume value equals the x coordinate.
        let mut data = Array3::zeros((20, 20, 20));
        for ((x, _, _), v) in data.indexed_iter_mut() {
            *v = x as f64;
        }
        let bundle =
            StreamlineSet::from_streamlines(vec![straight_line_through(11, 5.0, 5.0)]);
        let profile = tract_profile(&data, &bundle, 11).unwrap();
        for (node, v) in profile.iter().enumerate() {
            assert_relative_eq!(*v, node as f64, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_empty_bundle_is_an_error() {
        let data = Array3::from_elem((5, 5, 5), 1.0);
        let bundle = StreamlineSet::default();
        assert!(tract_profile(&data, &bundle, 10).is_err());
    }
}
