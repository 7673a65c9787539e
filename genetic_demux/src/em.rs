//! Expectation-maximization of per-state allele-frequency profiles.
use crate::counts::{BarcodeIdx, CountMatrices};
use crate::error::{DemuxError, Result};
use crate::events::DemuxEvent;
use crate::init::initialize;
use crate::params::DemuxParams;
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use rayon::prelude::*;
use stats::{log2_normalize, log2_sum_exp2};

/// The fitted model of one restart.
#[derive(Clone, Debug, PartialEq)]
pub struct Converged {
    /// Restart index that produced this model.
    pub restart: usize,
    /// Seed of the restart.
    pub seed: u64,
    /// Initial clusters of the retained submatrix.
    pub initial_groups: Vec<Vec<BarcodeIdx>>,
    /// Allele-frequency profiles, variants x states.
    pub model_af: Array2<f64>,
    /// Base-2 log state priors.
    pub log_prior: Array1<f64>,
    /// Responsibilities, barcodes x states. Rows sum to 1.
    pub p_s_c: Array2<f64>,
    /// Base-2 log-likelihood of every barcode under every state profile.
    pub lp_c_s: Array2<f64>,
    /// Total base-2 log-likelihood.
    pub log_likelihood: f64,
    /// Log-likelihood after every E-step.
    pub trace: Vec<f64>,
    /// E-steps performed.
    pub iterations: usize,
    /// True when the log-likelihood repeated exactly before the cap.
    pub converged: bool,
}

impl Converged {
    /// Number of latent states.
    pub fn num_states(&self) -> usize {
        self.model_af.ncols()
    }

    /// Finite likelihood and a finite profile matrix that is not all zero.
    pub fn is_valid(&self) -> bool {
        self.log_likelihood.is_finite()
            && self.model_af.iter().all(|x| x.is_finite())
            && self.model_af.iter().any(|&x| x != 0.0)
    }
}

/// `lp_c_s[c, k] = Σ_v alt·log2(af[v,k]) + ref·log2(1 - af[v,k])`,
/// accumulated over the non-zero entries of the sparse matrices.
pub fn barcode_log_likelihoods(counts: &CountMatrices, model_af: &Array2<f64>) -> Array2<f64> {
    let states = model_af.ncols();
    let log_af = model_af.mapv(f64::log2);
    let log_ref = model_af.mapv(|a| (1.0 - a).log2());
    let mut lp_c_s = Array2::<f64>::zeros((counts.num_barcodes(), states));
    for (m, logs) in [(counts.alt_counts(), &log_af), (counts.ref_counts(), &log_ref)] {
        for (v, row) in m.outer_iterator().enumerate() {
            let logs_v = logs.row(v);
            for (c, &x) in row.iter() {
                let x = f64::from(x);
                for (lp, l) in lp_c_s.row_mut(c).iter_mut().zip(logs_v.iter()) {
                    *lp += x * l;
                }
            }
        }
    }
    lp_c_s
}

/// Responsibilities and total log-likelihood from per-barcode
/// log-likelihoods and log priors.
pub fn expectation(lp_c_s: &Array2<f64>, log_prior: &Array1<f64>) -> (Array2<f64>, f64) {
    let mut p_s_c = lp_c_s + log_prior;
    let mut log_likelihood = 0.0;
    for mut row in p_s_c.axis_iter_mut(Axis(0)) {
        if let Some(weights) = row.as_slice_mut() {
            log_likelihood += log2_sum_exp2(weights);
            log2_normalize(weights);
        }
    }
    (p_s_c, log_likelihood)
}

/// Smoothed profiles and log priors from responsibilities.
pub fn maximization(
    counts: &CountMatrices,
    background: &Array1<f64>,
    p_s_c: &Array2<f64>,
) -> (Array2<f64>, Array1<f64>) {
    let states = p_s_c.ncols();
    let mut alt_weight = Array2::<f64>::zeros((counts.num_variants(), states));
    let mut depth_weight = Array2::<f64>::zeros((counts.num_variants(), states));
    for (is_alt, m) in [(true, counts.alt_counts()), (false, counts.ref_counts())] {
        for (v, row) in m.outer_iterator().enumerate() {
            for (c, &x) in row.iter() {
                let x = f64::from(x);
                let p = p_s_c.row(c);
                depth_weight.row_mut(v).scaled_add(x, &p);
                if is_alt {
                    alt_weight.row_mut(v).scaled_add(x, &p);
                }
            }
        }
    }
    let bg = background.view().insert_axis(Axis(1));
    let model_af = (&alt_weight + &bg) / (&depth_weight + 1.0);
    let log_total = (p_s_c.nrows() as f64).log2();
    let log_prior = p_s_c.sum_axis(Axis(0)).mapv(|s| s.log2() - log_total);
    (model_af, log_prior)
}

/// Outcome of [`fit`].
#[derive(Clone, Debug, PartialEq)]
pub struct EmFit {
    /// Final profiles.
    pub model_af: Array2<f64>,
    /// Final log priors.
    pub log_prior: Array1<f64>,
    /// Responsibilities under the final profiles.
    pub p_s_c: Array2<f64>,
    /// Barcode log-likelihoods under the final profiles.
    pub lp_c_s: Array2<f64>,
    /// Log-likelihood after every E-step.
    pub trace: Vec<f64>,
    /// True when the log-likelihood repeated exactly.
    pub converged: bool,
}

/// Iterate EM from `model_af` until the log-likelihood repeats exactly or
/// `max_iterations` E-steps have run. The returned responsibilities always
/// belong to the returned profiles.
pub fn fit(counts: &CountMatrices, model_af: Array2<f64>, max_iterations: usize) -> EmFit {
    let states = model_af.ncols();
    let background = counts.background_alt();
    let mut model_af = model_af;
    let mut log_prior = Array1::from_elem(states, (1.0 / states as f64).log2());
    let mut trace: Vec<f64> = Vec::new();
    loop {
        let lp_c_s = barcode_log_likelihoods(counts, &model_af);
        let (p_s_c, log_likelihood) = expectation(&lp_c_s, &log_prior);
        let converged = trace.last() == Some(&log_likelihood);
        trace.push(log_likelihood);
        if converged || trace.len() >= max_iterations {
            return EmFit {
                model_af,
                log_prior,
                p_s_c,
                lp_c_s,
                trace,
                converged,
            };
        }
        (model_af, log_prior) = maximization(counts, &background, &p_s_c);
    }
}

/// Derive one seed per restart from the master seed.
pub fn restart_seeds(master_seed: u64, restarts: usize) -> Vec<u64> {
    let mut rng = Xoshiro256StarStar::seed_from_u64(master_seed);
    (0..restarts).map(|_| rng.gen::<u64>()).collect()
}

/// Initialize and fit one restart. Depends only on the counts and the seed.
pub fn run_restart(
    counts: &CountMatrices,
    num_states: usize,
    restart: usize,
    seed: u64,
    max_iterations: usize,
) -> Result<Converged> {
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let init = initialize(counts, num_states, &mut rng)?;
    let fitted = fit(counts, init.model_af, max_iterations);
    Ok(Converged {
        restart,
        seed,
        initial_groups: init.groups,
        model_af: fitted.model_af,
        log_prior: fitted.log_prior,
        p_s_c: fitted.p_s_c,
        lp_c_s: fitted.lp_c_s,
        log_likelihood: fitted.trace.last().copied().unwrap_or(f64::NEG_INFINITY),
        iterations: fitted.trace.len(),
        trace: fitted.trace,
        converged: fitted.converged,
    })
}

/// Run every restart in parallel and keep the best valid model, see
/// [`select_restart`].
pub fn fit_restarts(
    counts: &CountMatrices,
    num_states: usize,
    params: &DemuxParams,
    events: &mut Vec<DemuxEvent>,
) -> Result<Converged> {
    let seeds = restart_seeds(params.seed, params.restarts);
    let outcomes: Vec<Result<Converged>> = seeds
        .par_iter()
        .enumerate()
        .map(|(restart, &seed)| {
            run_restart(counts, num_states, restart, seed, params.max_iterations)
        })
        .collect();
    select_restart(num_states, &seeds, outcomes, events)
}

/// Keep the valid model with the largest log-likelihood, the lowest restart
/// index winning ties. `outcomes[i]` is the result of the restart seeded
/// with `seeds[i]`; events are pushed in restart order.
///
/// Returns `InsufficientInformation` when every restart failed to
/// initialize for that reason, and `ModelDidNotConverge` when no restart
/// produced a valid model otherwise.
pub fn select_restart(
    num_states: usize,
    seeds: &[u64],
    outcomes: Vec<Result<Converged>>,
    events: &mut Vec<DemuxEvent>,
) -> Result<Converged> {
    let mut best: Option<Converged> = None;
    let mut insufficient: Option<DemuxError> = None;
    let mut all_insufficient = true;
    for ((restart, &seed), outcome) in seeds.iter().enumerate().zip(outcomes) {
        events.push(DemuxEvent::RestartStarted {
            states: num_states,
            restart,
            seed,
        });
        match outcome {
            Ok(model) => {
                all_insufficient = false;
                events.push(DemuxEvent::RestartFinished {
                    restart,
                    iterations: model.iterations,
                    converged: model.converged,
                    log_likelihood: model.log_likelihood,
                });
                let better = best
                    .as_ref()
                    .map_or(true, |b| model.log_likelihood > b.log_likelihood);
                if model.is_valid() && better {
                    best = Some(model);
                }
            }
            Err(err @ DemuxError::InsufficientInformation { .. }) => {
                events.push(DemuxEvent::InitializationAborted {
                    restart,
                    reason: err.to_string(),
                });
                insufficient.get_or_insert(err);
            }
            Err(err) => return Err(err),
        }
    }

    match (best, insufficient) {
        (Some(model), _) => {
            events.push(DemuxEvent::RestartSelected {
                states: num_states,
                restart: model.restart,
                log_likelihood: model.log_likelihood,
            });
            Ok(model)
        }
        (None, Some(err)) if all_insufficient => Err(err),
        (None, _) => Err(DemuxError::ModelDidNotConverge {
            restarts: seeds.len(),
        }),
    }
}
