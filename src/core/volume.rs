use nalgebra::{Matrix4, Point3};
use ndarray::Array3;

/// Binary region-of-interest mask on a voxel grid, together with the
/// voxel-to-world affine it was sampled on.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskVolume {
    pub data: Array3<bool>,
    pub affine: Matrix4<f64>,
}

impl MaskVolume {
    pub fn new(data: Array3<bool>, affine: Matrix4<f64>) -> Self {
        Self { data, affine }
    }

    /// Thresholds a continuous field at > 0, e.g. a warped probability map.
    pub fn from_positive(field: &Array3<f64>, affine: Matrix4<f64>) -> Self {
        Self {
            data: field.mapv(|v| v > 0.0),
            affine,
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        let s = self.data.shape();
        (s[0], s[1], s[2])
    }

    /// Whether the given voxel index is inside the grid and set.
    pub fn contains_voxel(&self, voxel: [i64; 3]) -> bool {
        let s = self.data.shape();
        if voxel.iter().any(|&v| v < 0) {
            return false;
        }
        let (x, y, z) = (voxel[0] as usize, voxel[1] as usize, voxel[2] as usize);
        if x >= s[0] || y >= s[1] || z >= s[2] {
            return false;
        }
        self.data[[x, y, z]]
    }
}

/// All voxel indices of `atlas` whose value equals `label`.
pub fn voxels_with_label(atlas: &Array3<f32>, label: f32) -> Vec<[i64; 3]> {
    atlas
        .indexed_iter()
        .filter(|(_, &v)| v == label)
        .map(|((x, y, z), _)| [x as i64, y as i64, z as i64])
        .collect()
}

/// Trilinear interpolation of `vol` at a continuous voxel-space point.
/// Points outside the grid sample as 0.
pub fn sample_trilinear(vol: &Array3<f64>, p: &Point3<f64>) -> f64 {
    let s = vol.shape();
    let (nx, ny, nz) = (s[0] as i64, s[1] as i64, s[2] as i64);

    let x0 = p.x.floor() as i64;
    let y0 = p.y.floor() as i64;
    let z0 = p.z.floor() as i64;
    let fx = p.x - x0 as f64;
    let fy = p.y - y0 as f64;
    let fz = p.z - z0 as f64;

    let fetch = |x: i64, y: i64, z: i64| -> f64 {
        if x < 0 || y < 0 || z < 0 || x >= nx || y >= ny || z >= nz {
            0.0
        } else {
            vol[[x as usize, y as usize, z as usize]]
        }
    };

    let mut acc = 0.0;
    for (dx, wx) in [(0, 1.0 - fx), (1, fx)] {
        for (dy, wy) in [(0, 1.0 - fy), (1, fy)] {
            for (dz, wz) in [(0, 1.0 - fz), (1, fz)] {
                let w = wx * wy * wz;
                if w > 0.0 {
                    acc += w * fetch(x0 + dx, y0 + dy, z0 + dz);
                }
            }
        }
    }
    acc
}

const NEIGHBORS_26: [[i64; 3]; 26] = {
    let mut out = [[0i64; 3]; 26];
    let mut n = 0;
    let mut dx = -1i64;
    while dx <= 1 {
        let mut dy = -1i64;
        while dy <= 1 {
            let mut dz = -1i64;
            while dz <= 1 {
                if !(dx == 0 && dy == 0 && dz == 0) {
                    out[n] = [dx, dy, dz];
                    n += 1;
                }
                dz += 1;
            }
            dy += 1;
        }
        dx += 1;
    }
    out
};

fn in_bounds(v: [i64; 3], s: &[usize]) -> bool {
    v[0] >= 0
        && v[1] >= 0
        && v[2] >= 0
        && (v[0] as usize) < s[0]
        && (v[1] as usize) < s[1]
        && (v[2] as usize) < s[2]
}

fn dilate(mask: &Array3<bool>) -> Array3<bool> {
    let s = mask.shape().to_vec();
    let mut out = mask.clone();
    for ((x, y, z), &v) in mask.indexed_iter() {
        if !v {
            continue;
        }
        for d in NEIGHBORS_26 {
            let n = [x as i64 + d[0], y as i64 + d[1], z as i64 + d[2]];
            if in_bounds(n, &s) {
                out[[n[0] as usize, n[1] as usize, n[2] as usize]] = true;
            }
        }
    }
    out
}

/// Erosion with the full 26-neighborhood; voxels outside the grid count as
/// foreground so a mask touching the volume edge is not eaten away there.
fn erode(mask: &Array3<bool>) -> Array3<bool> {
    let s = mask.shape().to_vec();
    let mut out = mask.clone();
    for ((x, y, z), &v) in mask.indexed_iter() {
        if !v {
            continue;
        }
        let keep = NEIGHBORS_26.iter().all(|d| {
            let n = [x as i64 + d[0], y as i64 + d[1], z as i64 + d[2]];
            !in_bounds(n, &s) || mask[[n[0] as usize, n[1] as usize, n[2] as usize]]
        });
        if !keep {
            out[[x, y, z]] = false;
        }
    }
    out
}

/// Fills cavities: background regions with no 6-connected path to the
/// volume boundary become foreground.
fn fill_holes(mask: &Array3<bool>) -> Array3<bool> {
    let s = mask.shape().to_vec();
    let (nx, ny, nz) = (s[0], s[1], s[2]);
    let mut reachable = Array3::from_elem((nx, ny, nz), false);
    let mut stack: Vec<[usize; 3]> = Vec::new();

    // Seed the flood fill with every background voxel on the boundary.
    for ((x, y, z), &v) in mask.indexed_iter() {
        let on_boundary =
            x == 0 || y == 0 || z == 0 || x == nx - 1 || y == ny - 1 || z == nz - 1;
        if on_boundary && !v {
            reachable[[x, y, z]] = true;
            stack.push([x, y, z]);
        }
    }

    const FACES: [[i64; 3]; 6] = [
        [1, 0, 0],
        [-1, 0, 0],
        [0, 1, 0],
        [0, -1, 0],
        [0, 0, 1],
        [0, 0, -1],
    ];
    while let Some([x, y, z]) = stack.pop() {
        for d in FACES {
            let n = [x as i64 + d[0], y as i64 + d[1], z as i64 + d[2]];
            if !in_bounds(n, &s) {
                continue;
            }
            let ni = [n[0] as usize, n[1] as usize, n[2] as usize];
            if !mask[ni] && !reachable[ni] {
                reachable[ni] = true;
                stack.push(n.map(|v| v as usize));
            }
        }
    }

    let mut out = mask.clone();
    for ((x, y, z), r) in reachable.indexed_iter() {
        if !mask[[x, y, z]] && !r {
            out[[x, y, z]] = true;
        }
    }
    out
}

/// Repairs a binary ROI into a closed, non-degenerate mask: one dilation
/// pass, cavity filling, erosion back, then a sweep dropping voxels with no
/// remaining 26-neighbor. Runs once per ROI, never per streamline.
pub fn patch_up_roi(mask: &Array3<bool>) -> Array3<bool> {
    let closed = erode(&fill_holes(&dilate(mask)));

    let s = closed.shape().to_vec();
    let mut out = closed.clone();
    for ((x, y, z), &v) in closed.indexed_iter() {
        if !v {
            continue;
        }
        let isolated = NEIGHBORS_26.iter().all(|d| {
            let n = [x as i64 + d[0], y as i64 + d[1], z as i64 + d[2]];
            !in_bounds(n, &s) || !closed[[n[0] as usize, n[1] as usize, n[2] as usize]]
        });
        if isolated {
            out[[x, y, z]] = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn solid_box(shape: (usize, usize, usize), lo: [usize; 3], hi: [usize; 3]) -> Array3<bool> {
        let mut m = Array3::from_elem(shape, false);
        for x in lo[0]..=hi[0] {
            for y in lo[1]..=hi[1] {
                for z in lo[2]..=hi[2] {
                    m[[x, y, z]] = true;
                }
            }
        }
        m
    }

    #[test]
    fn test_patch_up_roi_fills_interior_hole() {
        let mut m = solid_box((10, 10, 10), [2, 2, 2], [7, 7, 7]);
        m[[4, 4, 4]] = false;
        let patched = patch_up_roi(&m);
        assert!(patched[[4, 4, 4]]);
    }

    #[test]
    fn test_patch_up_roi_drops_isolated_voxel() {
        let mut m = solid_box((12, 12, 12), [2, 2, 2], [5, 5, 5]);
        m[[10, 10, 10]] = true;
        let patched = patch_up_roi(&m);
        assert!(!patched[[10, 10, 10]]);
        // The solid block itself survives.
        assert!(patched[[3, 3, 3]]);
    }

    #[test]
    fn test_contains_voxel_bounds() {
        let roi = MaskVolume::new(solid_box((4, 4, 4), [1, 1, 1], [2, 2, 2]), Matrix4::identity());
        assert!(roi.contains_voxel([1, 2, 1]));
        assert!(!roi.contains_voxel([0, 0, 0]));
        assert!(!roi.contains_voxel([-1, 1, 1]));
        assert!(!roi.contains_voxel([4, 1, 1]));
    }

    #[test]
    fn test_sample_trilinear_interpolates_and_zeroes_outside() {
        let mut vol = Array3::from_elem((3, 3, 3), 0.0);
        vol[[1, 1, 1]] = 8.0;
        let center = sample_trilinear(&vol, &Point3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(center, 8.0);
        let halfway = sample_trilinear(&vol, &Point3::new(1.5, 1.0, 1.0));
        assert_relative_eq!(halfway, 4.0);
        let outside = sample_trilinear(&vol, &Point3::new(-5.0, 0.0, 0.0));
        assert_relative_eq!(outside, 0.0);
    }

    #[test]
    fn test_voxels_with_label() {
        let mut atlas = Array3::from_elem((5, 5, 5), 0.0f32);
        atlas[[1, 1, 1]] = 2.0;
        atlas[[4, 0, 3]] = 2.0;
        atlas[[2, 2, 2]] = 1.0;
        let mut found = voxels_with_label(&atlas, 2.0);
        found.sort();
        assert_eq!(found, vec![[1, 1, 1], [4, 0, 3]]);
    }
}
