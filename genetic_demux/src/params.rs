//! Run parameters.
use crate::error::{DemuxError, Result};
use serde::{Deserialize, Serialize};

/// Hard cap on EM iterations per restart.
pub const MAX_EM_ITERATIONS: usize = 300;
/// Responsibility a barcode needs to be assigned to a state.
pub const CONFIDENT_RESPONSIBILITY: f64 = 0.99;
/// Minimum per-state ALT count for a clear ALT call.
pub const MIN_ALT_CALL_COUNT: u32 = 10;
/// Minimum per-state REF count (with no ALT reads) for a clear REF call.
pub const MIN_REF_CALL_COUNT: u32 = 10;
/// Allele error rate used when emitting genotype likelihoods.
pub const GENOTYPE_ERROR_RATE: f64 = 0.01;

/// How the doublet state is handled.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DoubletMode {
    /// No doublet state is fitted.
    Excluded,
    /// A doublet state is fitted and identified, membership is left as assigned.
    Automatic,
    /// A doublet state is fitted and topped up to this fraction of all barcodes.
    Target(f64),
}

/// Parameters of a demultiplexing run.
///
/// Every field has a default so a parameter file only needs to carry the
/// values that differ.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemuxParams {
    /// Number of pooled samples. `None` searches `2..=max_candidate_samples`.
    pub num_samples: Option<usize>,
    /// Upper bound of the sample-count search.
    pub max_candidate_samples: usize,
    /// Independent initialize + EM restarts per sample count.
    pub restarts: usize,
    /// Master seed from which restart seeds are drawn.
    pub seed: u64,
    /// EM iteration cap.
    pub max_iterations: usize,
    /// Responsibility threshold for hard assignment.
    pub confidence: f64,
    /// Expected doublet fraction. `None` means automatic, `0` excludes doublets.
    pub doublet_proportion: Option<f64>,
    /// Minimum per-state ALT count for a clear ALT call.
    pub min_alt_calls: u32,
    /// Minimum per-state REF count for a clear REF call.
    pub min_ref_calls: u32,
    /// Allele error rate for genotype likelihoods.
    pub genotype_error: f64,
    /// Worker threads for restarts. `0` lets rayon decide.
    pub threads: usize,
}

impl Default for DemuxParams {
    fn default() -> Self {
        DemuxParams {
            num_samples: None,
            max_candidate_samples: 10,
            restarts: 10,
            seed: 0,
            max_iterations: MAX_EM_ITERATIONS,
            confidence: CONFIDENT_RESPONSIBILITY,
            doublet_proportion: None,
            min_alt_calls: MIN_ALT_CALL_COUNT,
            min_ref_calls: MIN_REF_CALL_COUNT,
            genotype_error: GENOTYPE_ERROR_RATE,
            threads: 0,
        }
    }
}

impl DemuxParams {
    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<()> {
        let invalid = |name: &'static str, reason: &str| -> Result<()> {
            Err(DemuxError::InvalidParameter {
                name,
                reason: reason.to_string(),
            })
        };
        if self.num_samples == Some(0) {
            return invalid("num_samples", "must be at least 1");
        }
        if self.num_samples.is_none() && self.max_candidate_samples < 2 {
            return invalid("max_candidate_samples", "must be at least 2");
        }
        if self.restarts == 0 {
            return invalid("restarts", "must be at least 1");
        }
        if self.max_iterations == 0 {
            return invalid("max_iterations", "must be at least 1");
        }
        // Above one half a barcode can only reach the threshold for one state.
        if !(self.confidence > 0.5 && self.confidence <= 1.0) {
            return invalid("confidence", "must be in (0.5, 1]");
        }
        if let Some(p) = self.doublet_proportion {
            if !(0.0..1.0).contains(&p) {
                return invalid("doublet_proportion", "must be in [0, 1)");
            }
        }
        if !(self.genotype_error > 0.0 && self.genotype_error < 0.5) {
            return invalid("genotype_error", "must be in (0, 0.5)");
        }
        Ok(())
    }

    /// Doublet handling implied by `doublet_proportion`.
    pub fn doublet_mode(&self) -> DoubletMode {
        match self.doublet_proportion {
            None => DoubletMode::Automatic,
            Some(p) if p == 0.0 => DoubletMode::Excluded,
            Some(p) => DoubletMode::Target(p),
        }
    }

    /// Number of latent states fitted for `samples` pooled samples.
    pub fn num_states(&self, samples: usize) -> usize {
        match self.doublet_mode() {
            DoubletMode::Excluded => samples,
            DoubletMode::Automatic | DoubletMode::Target(_) => samples + 1,
        }
    }
}
