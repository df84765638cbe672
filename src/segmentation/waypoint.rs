use anyhow::{Context, Result};
use nalgebra::Matrix4;
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::core::mapping::SpatialMapping;
use crate::core::streamline::Streamline;
use crate::core::volume::{patch_up_roi, sample_trilinear, MaskVolume};
use crate::segmentation::endpoints::clean_by_endpoints_idx;
use crate::segmentation::roi_gate::gate_streamlines;
use crate::segmentation::{BundleSpec, SegmentationContext};

/// Parameters of the waypoint-ROI strategy.
#[derive(Debug, Clone, Copy)]
pub struct WaypointParams {
    /// Minimum mean probability sampled along a streamline for bundles that
    /// carry a probability map.
    pub prob_threshold: f64,
    /// Tolerance handed to the endpoint filter for bundles with targets.
    pub endpoint_tol: i64,
}

impl Default for WaypointParams {
    fn default() -> Self {
        Self {
            prob_threshold: 0.0,
            endpoint_tol: 0,
        }
    }
}

/// One bundle: warp the ROIs into subject space, patch them once, gate all
/// streamlines, then apply the optional probability and endpoint filters.
/// Returns accepted positions in input order.
fn segment_bundle(
    name: &str,
    spec: &BundleSpec,
    streamlines: &[Streamline],
    mapping: &dyn SpatialMapping,
    ctx: &SegmentationContext,
    params: &WaypointParams,
) -> Result<Vec<usize>> {
    // Warp + patch once per ROI; the gate below runs over thousands of
    // streamlines against these cached masks.
    let rois: Vec<MaskVolume> = spec
        .rois
        .iter()
        .map(|roi| {
            let warped = mapping.transform_inverse(roi);
            MaskVolume::new(patch_up_roi(&warped.mapv(|v| v > 0.0)), Matrix4::identity())
        })
        .collect();

    let mid_x = match ctx.ref_shape {
        Some(shape) => (shape[0] as f64 - 1.0) / 2.0,
        None => rois
            .first()
            .map(|r| (r.shape().0 as f64 - 1.0) / 2.0)
            .unwrap_or(0.0),
    };

    let mut kept = gate_streamlines(streamlines, &rois, &spec.rules, spec.cross_midline, mid_x);

    if let Some(prob_map) = &spec.prob_map {
        let warped_prob = mapping.transform_inverse(prob_map);
        kept.retain(|&i| {
            let sl = &streamlines[i];
            if sl.is_empty() {
                return false;
            }
            let mean = sl
                .points
                .iter()
                .map(|p| sample_trilinear(&warped_prob, p))
                .sum::<f64>()
                / sl.len() as f64;
            mean > params.prob_threshold
        });
    }

    if spec.start_targets.is_some() || spec.end_targets.is_some() {
        let subset: Vec<Streamline> = kept.iter().map(|&i| streamlines[i].clone()).collect();
        let surviving = clean_by_endpoints_idx(
            &subset,
            spec.start_targets.as_ref(),
            spec.end_targets.as_ref(),
            params.endpoint_tol,
            ctx.label_atlas,
        )
        .with_context(|| format!("endpoint filtering of bundle '{}' failed", name))?;
        kept = surviving.into_iter().map(|k| kept[k]).collect();
    }

    Ok(kept)
}

/// Runs the waypoint strategy over every bundle independently. Bundles are
/// not mutually exclusive: a streamline may satisfy several bundle
/// definitions and is then reported under each of them.
pub(crate) fn segment_waypoint(
    bundles: &BTreeMap<String, BundleSpec>,
    streamlines: &[Streamline],
    ctx: &SegmentationContext,
    params: &WaypointParams,
) -> Result<BTreeMap<String, Vec<usize>>> {
    let mapping = ctx
        .mapping
        .ok_or(crate::segmentation::SegmentationError::MissingMapping)?;

    let entries: Vec<(&String, &BundleSpec)> = bundles.iter().collect();
    let per_bundle: Vec<(String, Vec<usize>)> = entries
        .par_iter()
        .map(|(name, spec)| {
            segment_bundle(name, spec, streamlines, mapping, ctx, params)
                .map(|idx| ((*name).clone(), idx))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(per_bundle.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mapping::IdentityMapping;
    use crate::segmentation::roi_gate::RoiRule;
    use crate::utils::test_utils::{box_field, straight_line_through};
    use ndarray::Array3;

    fn ctx_with_shape<'a>(
        mapping: &'a IdentityMapping,
        shape: [usize; 3],
    ) -> SegmentationContext<'a> {
        SegmentationContext {
            mapping: Some(mapping),
            label_atlas: None,
            cluster_atlas: None,
            ref_shape: Some(shape),
        }
    }

    fn demo_bundles() -> BTreeMap<String, BundleSpec> {
        // Two waypoint boxes on the y=5 track; the y=14 track misses both.
        let roi1 = box_field((20, 20, 20), [2, 4, 4], [4, 6, 6]);
        let roi2 = box_field((20, 20, 20), [14, 4, 4], [16, 6, 6]);
        let mut bundles = BTreeMap::new();
        bundles.insert(
            "on_track".to_string(),
            BundleSpec {
                rois: vec![roi1, roi2],
                rules: vec![RoiRule::Include, RoiRule::Include],
                ..BundleSpec::default()
            },
        );
        bundles
    }

    fn demo_streamlines() -> Vec<Streamline> {
        vec![
            straight_line_through(20, 5.0, 5.0),
            straight_line_through(20, 14.0, 14.0),
        ]
    }

    #[test]
    fn test_required_rois_reject_non_intersecting_streamlines() {
        let mapping = IdentityMapping;
        let ctx = ctx_with_shape(&mapping, [20, 20, 20]);
        let result = segment_waypoint(
            &demo_bundles(),
            &demo_streamlines(),
            &ctx,
            &WaypointParams::default(),
        )
        .unwrap();
        assert_eq!(result["on_track"], vec![0]);
    }

    #[test]
    fn test_prob_map_only_removes_streamlines() {
        let mapping = IdentityMapping;
        let ctx = ctx_with_shape(&mapping, [20, 20, 20]);
        let streamlines = demo_streamlines();

        let without = segment_waypoint(
            &demo_bundles(),
            &streamlines,
            &ctx,
            &WaypointParams::default(),
        )
        .unwrap();

        // A probability map that is zero everywhere vetoes every survivor.
        let mut bundles = demo_bundles();
        bundles.get_mut("on_track").unwrap().prob_map =
            Some(Array3::from_elem((20, 20, 20), 0.0));
        let with_zero_map =
            segment_waypoint(&bundles, &streamlines, &ctx, &WaypointParams::default()).unwrap();
        assert!(with_zero_map["on_track"].is_empty());

        // A map covering the whole grid changes nothing.
        bundles.get_mut("on_track").unwrap().prob_map =
            Some(Array3::from_elem((20, 20, 20), 1.0));
        let with_full_map =
            segment_waypoint(&bundles, &streamlines, &ctx, &WaypointParams::default()).unwrap();
        assert_eq!(with_full_map["on_track"], without["on_track"]);
    }

    #[test]
    fn test_bundles_are_evaluated_independently() {
        let mapping = IdentityMapping;
        let ctx = ctx_with_shape(&mapping, [20, 20, 20]);
        let streamlines = demo_streamlines();

        let mut pair = demo_bundles();
        pair.insert(
            "off_track".to_string(),
            BundleSpec {
                rois: vec![box_field((20, 20, 20), [2, 13, 13], [4, 15, 15])],
                rules: vec![RoiRule::Include],
                ..BundleSpec::default()
            },
        );

        let both = segment_waypoint(&pair, &streamlines, &ctx, &WaypointParams::default()).unwrap();
        let solo = segment_waypoint(
            &demo_bundles(),
            &streamlines,
            &ctx,
            &WaypointParams::default(),
        )
        .unwrap();
        assert_eq!(both["on_track"], solo["on_track"]);
        assert_eq!(both["off_track"], vec![1]);
    }

    #[test]
    fn test_empty_bundle_is_valid_not_an_error() {
        let mapping = IdentityMapping;
        let ctx = ctx_with_shape(&mapping, [20, 20, 20]);
        // Nothing passes a bundle that requires a corner the tracks avoid.
        let mut bundles = BTreeMap::new();
        bundles.insert(
            "nowhere".to_string(),
            BundleSpec {
                rois: vec![box_field((20, 20, 20), [17, 17, 1], [19, 19, 2])],
                rules: vec![RoiRule::Include],
                ..BundleSpec::default()
            },
        );
        let result = segment_waypoint(
            &bundles,
            &demo_streamlines(),
            &ctx,
            &WaypointParams::default(),
        )
        .unwrap();
        assert!(result["nowhere"].is_empty());
    }
}
