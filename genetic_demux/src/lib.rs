//! Crate for genetic demultiplexing without reference genotypes.
//!
//! Barcodes of a pooled single-cell run are grouped by sample of origin from
//! their REF/ALT allele counts alone. The pipeline is a chain of immutable
//! snapshots: [`Initialized`] profiles are fitted by EM into a [`Converged`]
//! model, barcodes are hard-assigned and the doublet state is resolved into
//! [`DoubletResolved`], and finally [`VariantsSelected`] holds a small set of
//! variants that tells the samples apart.
#![deny(missing_docs)]

pub mod assign;
mod cluster;
pub mod counts;
pub mod distinguish;
pub mod doublet;
pub mod em;
pub mod error;
pub mod events;
pub mod genotype;
pub mod init;
pub mod known;
pub mod params;
mod pca;
pub mod select_k;
#[cfg(test)]
mod synthetic;

pub use assign::{assign_cells, Assignment};
pub use counts::{BarcodeIdx, CountMatrices, Variant, VariantIdx};
pub use distinguish::{
    presence_absence, select_distinguishing_variants, Call, PresenceAbsence, VariantsSelected,
};
pub use doublet::{define_doublet, refine_doublets, resolve_doublets, DoubletResolved};
pub use em::{fit_restarts, Converged};
pub use error::{DemuxError, Result};
pub use events::DemuxEvent;
pub use genotype::{emit_genotypes, genotype_likelihoods, Genotype, GenotypeLikelihoods};
pub use init::{initialize, Initialized};
pub use known::{match_states, KnownGenotypes, SampleMatch};
pub use params::{DemuxParams, DoubletMode};

/// Label prefix of singlet groups.
pub const SINGLET_PREFIX: &str = "SNG";
/// Label prefix of the doublet group.
pub const DOUBLET_PREFIX: &str = "DBL";

/// Everything a demultiplexing run produced.
#[derive(Clone, Debug)]
pub struct DemuxRun {
    /// Number of pooled samples, given or searched.
    pub num_samples: usize,
    /// The selected EM model.
    pub converged: Converged,
    /// Assignment and doublet handling.
    pub doublets: DoubletResolved,
    /// Distinguishing variants.
    pub variants: VariantsSelected,
    /// Diagnostics in pipeline order. Restart events are grouped per restart
    /// and ordered by restart index, not by completion time.
    pub events: Vec<DemuxEvent>,
}

impl DemuxRun {
    /// `SNG-<state>` or `DBL-<state>`.
    pub fn state_label(&self, state: usize) -> String {
        let prefix = if Some(state) == self.doublets.doublet_state {
            DOUBLET_PREFIX
        } else {
            SINGLET_PREFIX
        };
        format!("{prefix}-{state}")
    }

    /// Label of every barcode, `None` for unassigned barcodes.
    pub fn labels(&self) -> Vec<Option<String>> {
        self.doublets
            .reassigned
            .state_of(self.converged.p_s_c.nrows())
            .into_iter()
            .map(|state| state.map(|k| self.state_label(k)))
            .collect()
    }
}

/// Run the whole pipeline on a pair of count matrices.
///
/// When `params.num_samples` is `None`, every sample count up to
/// `params.max_candidate_samples` is fitted and the lowest BIC kept.
pub fn demultiplex(counts: &CountMatrices, params: &DemuxParams) -> Result<DemuxRun> {
    params.validate()?;
    let mut events = Vec::new();
    let (num_samples, converged) = match params.num_samples {
        Some(samples) => {
            let states = params.num_states(samples);
            (samples, fit_restarts(counts, states, params, &mut events)?)
        }
        None => select_k::search_sample_count(counts, params, &mut events)?,
    };

    let assignment = assign_cells(&converged.p_s_c, params.confidence);
    let doublets = resolve_doublets(
        counts,
        &converged,
        &assignment,
        params.doublet_mode(),
        params.confidence,
        &mut events,
    );
    let pa = presence_absence(
        counts,
        &doublets,
        params.min_alt_calls,
        params.min_ref_calls,
    );
    let variants = select_distinguishing_variants(&pa, &mut events);
    Ok(DemuxRun {
        num_samples,
        converged,
        doublets,
        variants,
        events,
    })
}
