//! Diagnostic events emitted at fixed checkpoints of a run.
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// A checkpoint reached by the engine. Events are collected in pipeline order and
/// returned alongside the result; the engine itself never writes logs.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum DemuxEvent {
    /// A restart began.
    RestartStarted {
        /// Number of latent states being fitted.
        states: usize,
        /// Restart index.
        restart: usize,
        /// Seed of the restart's random stream.
        seed: u64,
    },
    /// Initialization of a restart failed and the restart was skipped.
    InitializationAborted {
        /// Restart index.
        restart: usize,
        /// Why initialization failed.
        reason: String,
    },
    /// EM stopped for a restart.
    RestartFinished {
        /// Restart index.
        restart: usize,
        /// EM iterations performed.
        iterations: usize,
        /// Whether the log-likelihood stopped changing before the cap.
        converged: bool,
        /// Final base-2 log-likelihood.
        log_likelihood: f64,
    },
    /// The restart kept for downstream stages.
    RestartSelected {
        /// Number of latent states.
        states: usize,
        /// Restart index.
        restart: usize,
        /// Its base-2 log-likelihood.
        log_likelihood: f64,
    },
    /// The state identified as the doublet state.
    DoubletStateDefined {
        /// Doublet state index.
        state: usize,
    },
    /// Barcodes moved into the doublet state.
    DoubletsReassigned {
        /// Number of barcodes moved.
        moved: usize,
        /// Doublet group size requested.
        target: usize,
    },
    /// One level of the distinguishing-variant search.
    SearchLevel {
        /// State columns searched at this level.
        states: Vec<usize>,
        /// Candidate rows after pattern grouping.
        candidates: usize,
        /// Variants selected at this level.
        selected: Vec<usize>,
    },
    /// The search ran out of candidates while some states were still
    /// indistinguishable.
    NotAllDistinguishable {
        /// State pairs that no selected variant separates.
        pairs: Vec<(usize, usize)>,
    },
    /// BIC of one candidate sample count, `None` when it could not be fitted.
    SampleCountScored {
        /// Candidate number of samples.
        samples: usize,
        /// Bayesian information criterion, lower is better.
        bic: Option<f64>,
    },
}

impl DemuxEvent {
    /// Whether the event deserves a warning rather than an info line.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            DemuxEvent::InitializationAborted { .. } | DemuxEvent::NotAllDistinguishable { .. }
        ) || matches!(
            self,
            DemuxEvent::RestartFinished {
                converged: false,
                ..
            }
        )
    }
}

impl Display for DemuxEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DemuxEvent::RestartStarted {
                states,
                restart,
                seed,
            } => write!(f, "restart {restart}: fitting {states} states, seed {seed}"),
            DemuxEvent::InitializationAborted { restart, reason } => {
                write!(f, "restart {restart}: initialization aborted: {reason}")
            }
            DemuxEvent::RestartFinished {
                restart,
                iterations,
                converged,
                log_likelihood,
            } => {
                let status = if *converged {
                    "converged"
                } else {
                    "hit the iteration cap"
                };
                write!(
                    f,
                    "restart {restart}: {status} after {iterations} iterations, log2 likelihood {log_likelihood:.4}"
                )
            }
            DemuxEvent::RestartSelected {
                states,
                restart,
                log_likelihood,
            } => write!(
                f,
                "selected restart {restart} for {states} states, log2 likelihood {log_likelihood:.4}"
            ),
            DemuxEvent::DoubletStateDefined { state } => write!(f, "doublet state is {state}"),
            DemuxEvent::DoubletsReassigned { moved, target } => write!(
                f,
                "moved {moved} barcodes into the doublet state (target size {target})"
            ),
            DemuxEvent::SearchLevel {
                states,
                candidates,
                selected,
            } => write!(
                f,
                "distinguishing search over states {states:?}: {candidates} candidate patterns, selected {selected:?}"
            ),
            DemuxEvent::NotAllDistinguishable { pairs } => write!(
                f,
                "not all states are distinguishable, unresolved pairs {pairs:?}"
            ),
            DemuxEvent::SampleCountScored { samples, bic } => match bic {
                Some(bic) => write!(f, "{samples} samples: BIC {bic:.2}"),
                None => write!(f, "{samples} samples: no valid model"),
            },
        }
    }
}
