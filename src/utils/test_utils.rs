use nalgebra::{Matrix4, Point3};
use ndarray::Array3;

use crate::core::streamline::Streamline;
use crate::core::volume::MaskVolume;

/// Straight line along x with `n` unit-spaced points at lateral offset
/// `y + dy`, for building synthetic bundles.
pub fn offset_line(y: f64, dy: f64, n: usize) -> Streamline {
    Streamline::new(
        (0..n)
            .map(|i| Point3::new(i as f64, y + dy, 0.0))
            .collect(),
    )
}

/// Straight line along x crossing a cubic grid of edge `n` at the given
/// y/z track.
pub fn straight_line_through(n: usize, y: f64, z: f64) -> Streamline {
    Streamline::new((0..n).map(|i| Point3::new(i as f64, y, z)).collect())
}

/// Axis-aligned solid box as a continuous field (1.0 inside), the shape
/// template ROIs arrive in.
pub fn box_field(
    shape: (usize, usize, usize),
    lo: [usize; 3],
    hi: [usize; 3],
) -> Array3<f64> {
    let mut field = Array3::from_elem(shape, 0.0);
    for x in lo[0]..=hi[0] {
        for y in lo[1]..=hi[1] {
            for z in lo[2]..=hi[2] {
                field[[x, y, z]] = 1.0;
            }
        }
    }
    field
}

/// Axis-aligned solid box as a ready binary mask with an identity affine.
pub fn box_mask(
    shape: (usize, usize, usize),
    lo: [usize; 3],
    hi: [usize; 3],
) -> MaskVolume {
    MaskVolume::new(box_field(shape, lo, hi).mapv(|v| v > 0.0), Matrix4::identity())
}
