use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::core::streamline::{Streamline, StreamlineSet};
use crate::geometry::distances::mdf;

/// Center statistic for the deviation scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviationStat {
    Mean,
    Median,
}

/// Thresholds for iterative outlier rejection on one bundle. A member is
/// rejected only when it violates both bounds; staying under either one is
/// enough to survive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CleanParams {
    /// Distance-to-representative z-score bound.
    pub distance_threshold: f64,
    /// Length z-score bound.
    pub length_threshold: f64,
    /// Bundles smaller than this are returned untouched.
    pub min_sl: usize,
    /// Point count for shape comparison.
    pub n_points: usize,
    /// Cap on rejection rounds.
    pub clean_rounds: usize,
    pub stat: DeviationStat,
}

impl Default for CleanParams {
    fn default() -> Self {
        Self {
            distance_threshold: 3.0,
            length_threshold: 4.0,
            min_sl: 20,
            n_points: 100,
            clean_rounds: 5,
            stat: DeviationStat::Mean,
        }
    }
}

fn center(values: &[f64], stat: DeviationStat) -> f64 {
    match stat {
        DeviationStat::Mean => values.iter().sum::<f64>() / values.len() as f64,
        DeviationStat::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            }
        }
    }
}

/// Deviation scores against the chosen center, scaled by the population
/// standard deviation. A spread too small to matter maps everything to 0,
/// so homogeneous bundles are never trimmed.
fn deviation_scores(values: &[f64], stat: DeviationStat) -> Vec<f64> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std < 1e-12 {
        return vec![0.0; values.len()];
    }
    let c = center(values, stat);
    values.iter().map(|v| (v - c) / std).collect()
}

/// Point-wise mean path over the selected resampled members.
fn representative(resampled: &[Streamline], members: &[usize], n_points: usize) -> Streamline {
    let count = members.len() as f64;
    let points = (0..n_points)
        .map(|i| {
            let sum = members
                .iter()
                .map(|&m| resampled[m].points[i].coords)
                .sum::<nalgebra::Vector3<f64>>();
            Point3::from(sum / count)
        })
        .collect();
    Streamline::new(points)
}

/// Iterative outlier rejection, returning surviving positions in input
/// order.
///
/// Each round resamples survivors onto a common point count, builds the
/// bundle representative as their point-wise mean, and drops members whose
/// distance-to-representative score reaches `distance_threshold` while their
/// length score also reaches `length_threshold`; a member under either bound
/// stays, so tightening both thresholds never trims past the stricter one
/// alone. Both scores are one-sided. Rounds stop at a fixed point, at
/// `clean_rounds`, or when another round would shrink the bundle below
/// `min_sl`. Deterministic; no hidden randomness.
pub fn clean_bundle_idx(streamlines: &[Streamline], params: &CleanParams) -> Vec<usize> {
    let all: Vec<usize> = (0..streamlines.len()).collect();
    if streamlines.len() < params.min_sl {
        return all;
    }

    let resampled: Vec<Streamline> = streamlines
        .iter()
        .map(|sl| sl.resample(params.n_points))
        .collect();
    let lengths: Vec<f64> = streamlines.iter().map(|sl| sl.arc_length()).collect();

    let mut survivors = all;
    for _ in 0..params.clean_rounds {
        let rep = representative(&resampled, &survivors, params.n_points);
        let dists: Vec<f64> = survivors.iter().map(|&i| mdf(&resampled[i], &rep)).collect();
        let lens: Vec<f64> = survivors.iter().map(|&i| lengths[i]).collect();

        let dist_z = deviation_scores(&dists, params.stat);
        let len_z = deviation_scores(&lens, params.stat);

        let keep: Vec<usize> = survivors
            .iter()
            .enumerate()
            .filter(|&(k, _)| {
                dist_z[k] < params.distance_threshold
                    || len_z[k] < params.length_threshold
            })
            .map(|(_, &i)| i)
            .collect();

        if keep.len() == survivors.len() {
            break;
        }
        if keep.len() < params.min_sl {
            break;
        }
        survivors = keep;
    }
    survivors
}

/// Cleans a bundle, preserving any index mapping it carries.
pub fn clean_bundle(bundle: &StreamlineSet, params: &CleanParams) -> StreamlineSet {
    let kept = clean_bundle_idx(&bundle.streamlines, params);
    bundle.select(&kept)
}
