use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::streamline::Streamline;
use crate::core::volume::MaskVolume;
use crate::geometry::transforms::round_to_voxel;

/// Per-ROI membership rule, aligned index-by-index with a bundle's ROI list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoiRule {
    /// At least one point of the streamline must fall inside the ROI.
    Include,
    /// No point of the streamline may fall inside the ROI.
    Exclude,
}

/// Whether one streamline (in subject voxel space) satisfies rule `rule`
/// against one patched ROI mask. Points are rounded to the nearest voxel.
fn satisfies_rule(sl: &Streamline, roi: &MaskVolume, rule: RoiRule) -> bool {
    let hit = sl
        .points
        .iter()
        .any(|p| roi.contains_voxel(round_to_voxel(p)));
    match rule {
        RoiRule::Include => hit,
        RoiRule::Exclude => !hit,
    }
}

/// Conjunction across all ROI rules; an empty ROI list accepts everything.
/// Pure predicate over immutable inputs.
pub fn streamline_passes(sl: &Streamline, rois: &[MaskVolume], rules: &[RoiRule]) -> bool {
    assert_eq!(
        rois.len(),
        rules.len(),
        "ROI and rule lists must be aligned"
    );
    rois.iter()
        .zip(rules.iter())
        .all(|(roi, &rule)| satisfies_rule(sl, roi, rule))
}

/// Gates a whole collection, returning the accepted positions in input
/// order. The per-streamline tests are independent, so they run on the
/// rayon pool; ordered collect keeps the output deterministic.
pub fn gate_streamlines(
    streamlines: &[Streamline],
    rois: &[MaskVolume],
    rules: &[RoiRule],
    cross_midline: Option<bool>,
    mid_x: f64,
) -> Vec<usize> {
    streamlines
        .par_iter()
        .enumerate()
        .filter(|(_, sl)| {
            if let Some(required) = cross_midline {
                if sl.crosses_midline(mid_x) != required {
                    return false;
                }
            }
            streamline_passes(sl, rois, rules)
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{box_mask, straight_line_through};

    #[test]
    fn test_conjunction_over_mixed_rules() {
        // Streamline runs along x at y=z=5 through a 20^3 grid.
        let sl = straight_line_through(20, 5.0, 5.0);
        let on_path = box_mask((20, 20, 20), [8, 4, 4], [12, 6, 6]);
        let off_path = box_mask((20, 20, 20), [8, 14, 14], [12, 16, 16]);

        // Include hit + Exclude miss: accepted.
        assert!(streamline_passes(
            &sl,
            &[on_path.clone(), off_path.clone()],
            &[RoiRule::Include, RoiRule::Exclude]
        ));
        // Include on a mask the path never touches: rejected.
        assert!(!streamline_passes(
            &sl,
            &[on_path.clone(), off_path.clone()],
            &[RoiRule::Include, RoiRule::Include]
        ));
        // Exclude on a mask the path crosses: rejected.
        assert!(!streamline_passes(
            &sl,
            &[on_path.clone()],
            &[RoiRule::Exclude]
        ));
        // Reject as soon as any single rule fails, regardless of the rest.
        assert!(!streamline_passes(
            &sl,
            &[on_path, off_path],
            &[RoiRule::Exclude, RoiRule::Exclude]
        ));
    }

    #[test]
    fn test_empty_roi_list_accepts_all() {
        let sl = straight_line_through(10, 2.0, 2.0);
        assert!(streamline_passes(&sl, &[], &[]));
    }

    #[test]
    fn test_gate_respects_cross_midline() {
        let crossing = Streamline::from_coords(&[[2.0, 5.0, 5.0], [8.0, 5.0, 5.0]]);
        let left_only = Streamline::from_coords(&[[1.0, 5.0, 5.0], [3.0, 5.0, 5.0]]);
        let streamlines = vec![crossing, left_only];
        let mid = 4.5;

        let kept = gate_streamlines(&streamlines, &[], &[], Some(true), mid);
        assert_eq!(kept, vec![0]);
        let kept = gate_streamlines(&streamlines, &[], &[], Some(false), mid);
        assert_eq!(kept, vec![1]);
        let kept = gate_streamlines(&streamlines, &[], &[], None, mid);
        assert_eq!(kept, vec![0, 1]);
    }
}
