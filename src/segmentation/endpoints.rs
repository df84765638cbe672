use anyhow::Result;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::core::streamline::Streamline;
use crate::core::volume::voxels_with_label;
use crate::geometry::transforms::round_to_voxel;
use crate::segmentation::SegmentationError;

/// Target voxels for one end of a streamline: either label values resolved
/// against a label atlas, or explicit voxel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EndpointTarget {
    Labels(Vec<f32>),
    Coords(Vec<[i64; 3]>),
}

fn resolve_targets(
    target: Option<&EndpointTarget>,
    atlas: Option<&Array3<f32>>,
) -> Result<Option<Vec<[i64; 3]>>> {
    match target {
        None => Ok(None),
        Some(EndpointTarget::Coords(coords)) => Ok(Some(coords.clone())),
        Some(EndpointTarget::Labels(labels)) => {
            let atlas = atlas.ok_or(SegmentationError::MissingLabelAtlas)?;
            let mut coords = Vec::new();
            for &label in labels {
                coords.extend(voxels_with_label(atlas, label));
            }
            Ok(Some(coords))
        }
    }
}

/// Inclusive per-axis (Chebyshev) proximity test.
fn within_tol(voxel: [i64; 3], targets: &[[i64; 3]], tol: i64) -> bool {
    targets.iter().any(|t| {
        (voxel[0] - t[0]).abs() <= tol
            && (voxel[1] - t[1]).abs() <= tol
            && (voxel[2] - t[2]).abs() <= tol
    })
}

/// Positions of the streamlines whose endpoints land on the targets.
///
/// A side given as `None` is unconstrained. `tol = 0` requires the exact
/// voxel; `tol = 1` covers the 26-neighborhood. Output order matches input
/// order, so the result can be re-applied to the source collection any
/// number of times.
pub fn clean_by_endpoints_idx(
    streamlines: &[Streamline],
    start: Option<&EndpointTarget>,
    end: Option<&EndpointTarget>,
    tol: i64,
    atlas: Option<&Array3<f32>>,
) -> Result<Vec<usize>> {
    let start_coords = resolve_targets(start, atlas)?;
    let end_coords = resolve_targets(end, atlas)?;

    let mut kept = Vec::new();
    for (i, sl) in streamlines.iter().enumerate() {
        let (first, last) = match (sl.first_point(), sl.last_point()) {
            (Some(a), Some(b)) => (a, b),
            // An empty streamline has no endpoints to test.
            _ => {
                if start_coords.is_none() && end_coords.is_none() {
                    kept.push(i);
                }
                continue;
            }
        };

        let start_ok = match &start_coords {
            None => true,
            Some(targets) => within_tol(round_to_voxel(first), targets, tol),
        };
        if !start_ok {
            continue;
        }
        let end_ok = match &end_coords {
            None => true,
            Some(targets) => within_tol(round_to_voxel(last), targets, tol),
        };
        if end_ok {
            kept.push(i);
        }
    }
    Ok(kept)
}

/// Convenience wrapper returning the surviving streamlines themselves.
pub fn clean_by_endpoints(
    streamlines: &[Streamline],
    start: Option<&EndpointTarget>,
    end: Option<&EndpointTarget>,
    tol: i64,
    atlas: Option<&Array3<f32>>,
) -> Result<Vec<Streamline>> {
    let kept = clean_by_endpoints_idx(streamlines, start, end, tol, atlas)?;
    Ok(kept.into_iter().map(|i| streamlines[i].clone()).collect())
}
