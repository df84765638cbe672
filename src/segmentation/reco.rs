use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

use crate::cluster::QuickBundles;
use crate::core::streamline::Streamline;
use crate::geometry::distances::mdf;
use crate::registration::{slr_align, SlrParams};
use crate::segmentation::SegmentationError;

/// Named reference bundle models; must include the whole-brain universe
/// model used as the registration target. Read-only during segmentation.
pub type ClusterAtlas = BTreeMap<String, Vec<Streamline>>;

pub const WHOLE_BRAIN_KEY: &str = "whole_brain";

/// Parameters of the cluster-recognition strategy.
#[derive(Debug, Clone, Copy)]
pub struct RecoParams {
    /// Minimum model-cluster size kept as a matching seed.
    pub greater_than: usize,
    /// Matched groups smaller than this are dropped.
    pub rm_small_clusters: usize,
    /// Cluster threshold applied to each reference model.
    pub model_clust_thr: f64,
    /// Radius of the first candidate sweep around the seed centroids.
    pub reduction_thr: f64,
    /// Radius of the final acceptance sweep.
    pub pruning_thr: f64,
    /// Re-align the candidate set onto the model before pruning.
    pub progressive: bool,
    /// Point count used for all distance computations.
    pub n_points: usize,
    /// Seed for the stochastic subsampling inside registration; identical
    /// seeds reproduce the result set.
    pub seed: u64,
    pub slr: SlrParams,
}

impl Default for RecoParams {
    fn default() -> Self {
        Self {
            greater_than: 50,
            rm_small_clusters: 50,
            model_clust_thr: 5.0,
            reduction_thr: 10.0,
            pruning_thr: 5.0,
            progressive: true,
            n_points: 20,
            seed: 42,
            slr: SlrParams::default(),
        }
    }
}

fn min_seed_distance(sl: &Streamline, seeds: &[Streamline]) -> f64 {
    seeds
        .iter()
        .map(|c| mdf(sl, c))
        .fold(f64::INFINITY, f64::min)
}

/// Matches one bundle: seeds from the clustered model, a candidate sweep,
/// optional progressive re-alignment, pruning, then small-group removal.
/// Returned positions index the original subject collection, ascending.
fn recognize_bundle(
    model: &[Streamline],
    aligned: &[Streamline],
    params: &RecoParams,
    rng: &mut StdRng,
) -> Vec<usize> {
    let model_clusters =
        QuickBundles::new(params.model_clust_thr, params.n_points).cluster(model);
    let seeds: Vec<Streamline> = model_clusters
        .into_iter()
        .filter(|c| c.size() >= params.greater_than)
        .map(|c| c.centroid)
        .collect();
    if seeds.is_empty() {
        return Vec::new();
    }

    let resampled: Vec<Option<Streamline>> = aligned
        .iter()
        .map(|sl| (!sl.is_empty()).then(|| sl.resample(params.n_points)))
        .collect();

    // Candidate sweep.
    let mut candidates: Vec<usize> = resampled
        .iter()
        .enumerate()
        .filter(|(_, rs)| {
            rs.as_ref()
                .is_some_and(|rs| min_seed_distance(rs, &seeds) <= params.reduction_thr)
        })
        .map(|(i, _)| i)
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }

    // Progressive pass: refine the candidate alignment against this model
    // before the tighter sweep.
    let mut candidate_rs: Vec<Streamline> = candidates
        .iter()
        .map(|&i| resampled[i].clone().unwrap())
        .collect();
    if params.progressive {
        let model_rs: Vec<Streamline> = model
            .iter()
            .filter(|sl| !sl.is_empty())
            .map(|sl| sl.resample(params.n_points))
            .collect();
        let (_, refined) = slr_align(&model_rs, &candidate_rs, &params.slr, rng);
        candidate_rs = refined;
    }

    // Pruning.
    let pruned: Vec<usize> = candidate_rs
        .iter()
        .enumerate()
        .filter(|(_, rs)| min_seed_distance(rs, &seeds) <= params.pruning_thr)
        .map(|(k, _)| k)
        .collect();
    if pruned.is_empty() {
        return Vec::new();
    }

    // Small matched groups are discarded.
    let pruned_rs: Vec<Streamline> = pruned.iter().map(|&k| candidate_rs[k].clone()).collect();
    let groups = QuickBundles::new(params.pruning_thr, params.n_points).cluster(&pruned_rs);
    let mut kept: Vec<usize> = groups
        .into_iter()
        .filter(|g| g.size() >= params.rm_small_clusters)
        .flat_map(|g| g.indices)
        .map(|k| candidates[pruned[k]])
        .collect();
    kept.sort_unstable();
    kept
}

/// Runs cluster recognition for every requested bundle.
///
/// The registration of the subject streamlines onto the atlas whole-brain
/// model is a shared precondition and runs exactly once, before any
/// per-bundle matching. The `whole_brain` entry itself is never reported as
/// a bundle.
pub(crate) fn segment_reco(
    bundle_names: &[String],
    streamlines: &[Streamline],
    atlas: &ClusterAtlas,
    params: &RecoParams,
) -> Result<BTreeMap<String, Vec<usize>>> {
    let whole_brain = atlas
        .get(WHOLE_BRAIN_KEY)
        .ok_or(SegmentationError::MissingWholeBrain)?;

    let mut rng = StdRng::seed_from_u64(params.seed);
    let (_, aligned) = slr_align(whole_brain, streamlines, &params.slr, &mut rng);

    let mut result = BTreeMap::new();
    for name in bundle_names {
        if name == WHOLE_BRAIN_KEY {
            continue;
        }
        let model = atlas
            .get(name)
            .ok_or_else(|| SegmentationError::MissingAtlasModel(name.clone()))?;
        let kept = recognize_bundle(model, &aligned, params, &mut rng);
        result.insert(name.clone(), kept);
    }
    Ok(result)
}
