//! Choice of the number of pooled samples when it is not given.
use crate::counts::CountMatrices;
use crate::em::{fit_restarts, Converged};
use crate::error::{DemuxError, Result};
use crate::events::DemuxEvent;
use crate::params::DemuxParams;

/// Bayesian information criterion of a fitted model.
///
/// `log_likelihood` is base 2. Free parameters are one allele frequency per
/// variant and state plus `states - 1` mixing weights.
pub fn bic(log_likelihood: f64, states: usize, num_variants: usize, num_barcodes: usize) -> f64 {
    let ln_likelihood = log_likelihood * std::f64::consts::LN_2;
    let params = (states * num_variants + states - 1) as f64;
    -2.0 * ln_likelihood + params * (num_barcodes as f64).ln()
}

/// Fit every sample count in `2..=params.max_candidate_samples` and keep
/// the lowest BIC, the smaller count winning ties. Counts that cannot be
/// fitted are scored `None` and skipped.
pub fn search_sample_count(
    counts: &CountMatrices,
    params: &DemuxParams,
    events: &mut Vec<DemuxEvent>,
) -> Result<(usize, Converged)> {
    let mut best: Option<(usize, Converged, f64)> = None;
    let mut all_insufficient = true;
    let mut last_err = None;
    for samples in 2..=params.max_candidate_samples {
        let states = params.num_states(samples);
        match fit_restarts(counts, states, params, events) {
            Ok(model) => {
                all_insufficient = false;
                let score = bic(
                    model.log_likelihood,
                    states,
                    counts.num_variants(),
                    counts.num_barcodes(),
                );
                events.push(DemuxEvent::SampleCountScored {
                    samples,
                    bic: Some(score),
                });
                if best.as_ref().map_or(true, |(_, _, b)| score < *b) {
                    best = Some((samples, model, score));
                }
            }
            Err(
                err @ (DemuxError::InsufficientInformation { .. }
                | DemuxError::ModelDidNotConverge { .. }),
            ) => {
                if matches!(err, DemuxError::ModelDidNotConverge { .. }) {
                    all_insufficient = false;
                }
                events.push(DemuxEvent::SampleCountScored { samples, bic: None });
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    match (best, last_err) {
        (Some((samples, model, _)), _) => Ok((samples, model)),
        (None, Some(err)) if all_insufficient => Err(err),
        (None, _) => Err(DemuxError::ModelDidNotConverge {
            restarts: params.restarts,
        }),
    }
}
