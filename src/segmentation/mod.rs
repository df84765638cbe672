pub mod cleaning;
pub mod endpoints;
pub mod reco;
pub mod roi_gate;
pub mod waypoint;

use anyhow::Result;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::mapping::SpatialMapping;
use crate::core::streamline::StreamlineSet;

pub use cleaning::{clean_bundle, clean_bundle_idx, CleanParams, DeviationStat};
pub use endpoints::{clean_by_endpoints, clean_by_endpoints_idx, EndpointTarget};
pub use reco::{ClusterAtlas, RecoParams, WHOLE_BRAIN_KEY};
pub use roi_gate::RoiRule;
pub use waypoint::WaypointParams;

/// Configuration and lookup failures. All of them are raised before any
/// per-streamline work starts; there is no partial result to clean up.
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("bundle '{bundle}' lists {n_rois} ROIs but {n_rules} rules; the two must align")]
    RoiRuleMismatch {
        bundle: String,
        n_rois: usize,
        n_rules: usize,
    },
    #[error("no atlas model for requested bundle '{0}'")]
    MissingAtlasModel(String),
    #[error("cluster atlas has no '{WHOLE_BRAIN_KEY}' reference model")]
    MissingWholeBrain,
    #[error("endpoint labels were given without a label atlas to resolve them")]
    MissingLabelAtlas,
    #[error("waypoint segmentation needs a subject-to-template mapping")]
    MissingMapping,
    #[error("cluster recognition needs a cluster atlas")]
    MissingClusterAtlas,
    #[error("bundle '{0}' constrains midline crossing but no reference shape is known")]
    MissingReferenceShape(String),
    #[error("cannot compute a profile from an empty bundle")]
    EmptyBundle,
}

/// Definition of one named bundle. ROI fields live in template space and are
/// warped into subject space at segmentation time; `rois` and `rules` are
/// aligned by index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleSpec {
    pub rois: Vec<Array3<f64>>,
    pub rules: Vec<RoiRule>,
    #[serde(default)]
    pub prob_map: Option<Array3<f64>>,
    #[serde(default)]
    pub cross_midline: Option<bool>,
    #[serde(default)]
    pub start_targets: Option<EndpointTarget>,
    #[serde(default)]
    pub end_targets: Option<EndpointTarget>,
}

/// Externally supplied subject data the strategies draw on.
pub struct SegmentationContext<'a> {
    /// Deformable subject/template mapping; required by the waypoint
    /// strategy.
    pub mapping: Option<&'a dyn SpatialMapping>,
    /// Label atlas for resolving endpoint label targets.
    pub label_atlas: Option<&'a Array3<f32>>,
    /// Reference bundle models; required by the Reco strategy.
    pub cluster_atlas: Option<&'a ClusterAtlas>,
    /// Subject grid shape, used for the midline plane.
    pub ref_shape: Option<[usize; 3]>,
}

impl Default for SegmentationContext<'_> {
    fn default() -> Self {
        Self {
            mapping: None,
            label_atlas: None,
            cluster_atlas: None,
            ref_shape: None,
        }
    }
}

/// Per-bundle output, tagged by whether original indices were requested.
#[derive(Debug, Clone)]
pub enum FiberGroup {
    Streamlines(StreamlineSet),
    WithIndices {
        streamlines: StreamlineSet,
        indices: Vec<usize>,
    },
}

impl FiberGroup {
    pub fn streamlines(&self) -> &StreamlineSet {
        match self {
            FiberGroup::Streamlines(set) => set,
            FiberGroup::WithIndices { streamlines, .. } => streamlines,
        }
    }

    pub fn indices(&self) -> Option<&[usize]> {
        match self {
            FiberGroup::Streamlines(_) => None,
            FiberGroup::WithIndices { indices, .. } => Some(indices),
        }
    }

    pub fn len(&self) -> usize {
        self.streamlines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streamlines().is_empty()
    }
}

/// Immutable outcome of one `segment` call: bundle name to fiber group.
/// Empty groups are valid results, not errors.
#[derive(Debug, Clone, Default)]
pub struct SegmentationResult {
    pub bundles: BTreeMap<String, FiberGroup>,
}

impl SegmentationResult {
    pub fn get(&self, name: &str) -> Option<&FiberGroup> {
        self.bundles.get(name)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn bundle_names(&self) -> impl Iterator<Item = &String> {
        self.bundles.keys()
    }
}

/// Strategy choice; a closed set, dispatched explicitly.
#[derive(Debug, Clone)]
pub enum Algo {
    Waypoint(WaypointParams),
    Reco(RecoParams),
}

impl Default for Algo {
    fn default() -> Self {
        Algo::Waypoint(WaypointParams::default())
    }
}

/// Segmentation orchestrator. Holds configuration only; every `segment`
/// call returns a fresh result and leaves the orchestrator untouched.
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub algo: Algo,
    /// Also report, per bundle, the indices of its members in the input
    /// collection.
    pub return_idx: bool,
    /// Run the bundle cleaner on every group before returning.
    pub clean: Option<CleanParams>,
}

impl Segmentation {
    pub fn new(algo: Algo) -> Self {
        Self {
            algo,
            return_idx: false,
            clean: None,
        }
    }

    pub fn with_return_idx(mut self, return_idx: bool) -> Self {
        self.return_idx = return_idx;
        self
    }

    pub fn with_cleaning(mut self, params: CleanParams) -> Self {
        self.clean = Some(params);
        self
    }

    /// Validates every bundle definition up front; no partial work happens
    /// when any of them is inconsistent.
    fn validate(
        &self,
        bundles: &BTreeMap<String, BundleSpec>,
        ctx: &SegmentationContext,
    ) -> Result<(), SegmentationError> {
        match &self.algo {
            Algo::Waypoint(_) => {
                if ctx.mapping.is_none() {
                    return Err(SegmentationError::MissingMapping);
                }
                for (name, spec) in bundles {
                    if spec.rois.len() != spec.rules.len() {
                        return Err(SegmentationError::RoiRuleMismatch {
                            bundle: name.clone(),
                            n_rois: spec.rois.len(),
                            n_rules: spec.rules.len(),
                        });
                    }
                    let wants_labels = matches!(
                        spec.start_targets,
                        Some(EndpointTarget::Labels(_))
                    ) || matches!(spec.end_targets, Some(EndpointTarget::Labels(_)));
                    if wants_labels && ctx.label_atlas.is_none() {
                        return Err(SegmentationError::MissingLabelAtlas);
                    }
                    if spec.cross_midline.is_some()
                        && spec.rois.is_empty()
                        && ctx.ref_shape.is_none()
                    {
                        return Err(SegmentationError::MissingReferenceShape(name.clone()));
                    }
                }
            }
            Algo::Reco(_) => {
                let atlas = ctx
                    .cluster_atlas
                    .ok_or(SegmentationError::MissingClusterAtlas)?;
                if !atlas.contains_key(WHOLE_BRAIN_KEY) {
                    return Err(SegmentationError::MissingWholeBrain);
                }
                for name in bundles.keys() {
                    if name != WHOLE_BRAIN_KEY && !atlas.contains_key(name) {
                        return Err(SegmentationError::MissingAtlasModel(name.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Assigns streamlines to every requested bundle and returns the result
    /// keyed by bundle name. Streamlines are expected in subject voxel
    /// space for the waypoint strategy and in world space for Reco.
    pub fn segment(
        &self,
        bundles: &BTreeMap<String, BundleSpec>,
        streamlines: &StreamlineSet,
        ctx: &SegmentationContext,
    ) -> Result<SegmentationResult> {
        self.validate(bundles, ctx)?;

        let assignments: BTreeMap<String, Vec<usize>> = match &self.algo {
            Algo::Waypoint(params) => {
                waypoint::segment_waypoint(bundles, &streamlines.streamlines, ctx, params)?
            }
            Algo::Reco(params) => {
                let names: Vec<String> = bundles.keys().cloned().collect();
                let atlas = ctx
                    .cluster_atlas
                    .ok_or(SegmentationError::MissingClusterAtlas)?;
                reco::segment_reco(&names, &streamlines.streamlines, atlas, params)?
            }
        };

        let mut result = SegmentationResult::default();
        for (name, mut positions) in assignments {
            if let Some(clean_params) = &self.clean {
                let member_sls: Vec<_> = positions
                    .iter()
                    .map(|&i| streamlines.streamlines[i].clone())
                    .collect();
                let kept = clean_bundle_idx(&member_sls, clean_params);
                positions = kept.into_iter().map(|k| positions[k]).collect();
            }

            let members: Vec<_> = positions
                .iter()
                .map(|&i| streamlines.streamlines[i].clone())
                .collect();
            let original: Vec<usize> = positions
                .iter()
                .map(|&i| streamlines.original_index(i))
                .collect();

            let group = if self.return_idx {
                FiberGroup::WithIndices {
                    streamlines: StreamlineSet::from_streamlines(members),
                    indices: original,
                }
            } else {
                FiberGroup::Streamlines(StreamlineSet::from_streamlines(members))
            };
            result.bundles.insert(name, group);
        }
        Ok(result)
    }
}
