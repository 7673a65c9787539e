//! Matching fitted states against reference genotypes of known samples.
use crate::counts::{CountMatrices, Variant};
use ndarray::Array2;
use serde::Serialize;
use std::collections::HashMap;

/// ALT dosages of known samples, `NaN` where a genotype is missing.
#[derive(Clone, Debug, PartialEq)]
pub struct KnownGenotypes {
    /// Sample names, one per column.
    pub samples: Vec<String>,
    /// Variants, one per row.
    pub variants: Vec<Variant>,
    /// Expected ALT allele count in `[0, 2]`, variants x samples.
    pub dosages: Array2<f64>,
}

/// Best matching known sample of one state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SampleMatch {
    /// State index.
    pub state: usize,
    /// Best matching sample, `None` when no correlation could be computed.
    pub sample: Option<String>,
    /// Pearson correlation with that sample.
    pub correlation: Option<f64>,
    /// Variants shared between the model and the reference.
    pub shared_variants: usize,
}

fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let (mx, vx) = stats::mean_variance(pairs.iter().map(|p| p.0));
    let (my, vy) = stats::mean_variance(pairs.iter().map(|p| p.1));
    if vx <= 0.0 || vy <= 0.0 {
        return None;
    }
    let cov = pairs.iter().map(|(x, y)| (x - mx) * (y - my)).sum::<f64>() / pairs.len() as f64;
    Some(cov / (vx * vy).sqrt())
}

/// Correlate every state profile in `states` with every known sample's
/// dosage / 2 over the variants both carry, and report the best sample of
/// each state. Ties go to the first sample.
pub fn match_states(
    counts: &CountMatrices,
    model_af: &Array2<f64>,
    states: &[usize],
    known: &KnownGenotypes,
) -> Vec<SampleMatch> {
    let rows: HashMap<(&str, u64), usize> = counts
        .variants()
        .iter()
        .enumerate()
        .map(|(i, v)| ((v.chrom.as_str(), v.pos), i))
        .collect();
    let shared: Vec<(usize, usize)> = known
        .variants
        .iter()
        .enumerate()
        .filter_map(|(j, v)| rows.get(&(v.chrom.as_str(), v.pos)).map(|&i| (i, j)))
        .collect();

    states
        .iter()
        .map(|&state| {
            let mut best: Option<(usize, f64)> = None;
            for s in 0..known.samples.len() {
                let pairs: Vec<(f64, f64)> = shared
                    .iter()
                    .map(|&(i, j)| (model_af[[i, state]], known.dosages[[j, s]] / 2.0))
                    .filter(|(_, d)| d.is_finite())
                    .collect();
                if let Some(r) = pearson(&pairs) {
                    if best.map_or(true, |(_, b)| r > b) {
                        best = Some((s, r));
                    }
                }
            }
            SampleMatch {
                state,
                sample: best.map(|(s, _)| known.samples[s].clone()),
                correlation: best.map(|(_, r)| r),
                shared_variants: shared.len(),
            }
        })
        .collect()
}
