use nalgebra::{Matrix4, Point3};

use crate::core::streamline::Streamline;

/// Applies one affine to a whole collection, e.g. world-to-voxel before
/// gating against ROI masks.
pub fn transform_streamlines(streamlines: &[Streamline], affine: &Matrix4<f64>) -> Vec<Streamline> {
    streamlines.iter().map(|sl| sl.transformed(affine)).collect()
}

/// Nearest-voxel index of a continuous voxel-space point.
pub fn round_to_voxel(p: &Point3<f64>) -> [i64; 3] {
    [p.x.round() as i64, p.y.round() as i64, p.z.round() as i64]
}

/// First and last point of a streamline, when it has any.
pub fn endpoints(sl: &Streamline) -> Option<(&Point3<f64>, &Point3<f64>)> {
    match (sl.first_point(), sl.last_point()) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    }
}

/// Axis-aligned bounding box over all points.
pub fn bounding_box(sl: &Streamline) -> Option<(Point3<f64>, Point3<f64>)> {
    let first = sl.first_point()?;
    let mut lo = *first;
    let mut hi = *first;
    for p in &sl.points {
        lo.x = lo.x.min(p.x);
        lo.y = lo.y.min(p.y);
        lo.z = lo.z.min(p.z);
        hi.x = hi.x.max(p.x);
        hi.y = hi.y.max(p.y);
        hi.z = hi.z.max(p.z);
    }
    Some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_voxel_half_up() {
        assert_eq!(round_to_voxel(&Point3::new(1.5, 2.4, -0.2)), [2, 2, 0]);
    }

    #[test]
    fn test_bounding_box() {
        let sl = Streamline::from_coords(&[[1.0, 5.0, 2.0], [3.0, 1.0, 4.0], [2.0, 2.0, 0.0]]);
        let (lo, hi) = bounding_box(&sl).unwrap();
        assert_eq!(lo, Point3::new(1.0, 1.0, 0.0));
        assert_eq!(hi, Point3::new(3.0, 5.0, 4.0));
        assert!(bounding_box(&Streamline::new(vec![])).is_none());
    }

    #[test]
    fn test_transform_streamlines_translation() {
        let mut affine = Matrix4::identity();
        affine[(1, 3)] = -2.0;
        let moved = transform_streamlines(
            &[Streamline::from_coords(&[[0.0, 2.0, 0.0]])],
            &affine,
        );
        assert_eq!(moved[0].points[0], Point3::new(0.0, 0.0, 0.0));
    }
}
