//! Per-state genotype likelihoods from pooled allele counts.
use crate::assign::Assignment;
use crate::counts::{CountMatrices, VariantIdx};
use crate::error::{DemuxError, Result};
use serde::Serialize;
use statrs::distribution::{Binomial, Discrete};
use std::fmt::{Display, Formatter};

/// Diploid genotype of a biallelic SNV.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Genotype {
    /// Homozygous reference.
    HomRef,
    /// Heterozygous.
    Het,
    /// Homozygous alternative.
    HomAlt,
}

impl Genotype {
    /// In `GL`/`GP` order.
    pub const ALL: [Genotype; 3] = [Genotype::HomRef, Genotype::Het, Genotype::HomAlt];

    /// Expected ALT read fraction given the allele error rate.
    pub fn alt_probability(self, error_rate: f64) -> f64 {
        match self {
            Genotype::HomRef => error_rate,
            Genotype::Het => 0.5,
            Genotype::HomAlt => 1.0 - error_rate,
        }
    }
}

impl Display for Genotype {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Genotype::HomRef => "0/0",
            Genotype::Het => "0/1",
            Genotype::HomAlt => "1/1",
        })
    }
}

/// Likelihoods and posteriors of the three genotypes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenotypeLikelihoods {
    /// ALT reads.
    pub alt: u64,
    /// ALT + REF reads.
    pub depth: u64,
    /// Binomial likelihood of each genotype.
    pub gl: [f64; 3],
    /// Normalized genotype probabilities.
    pub gp: [f64; 3],
}

impl GenotypeLikelihoods {
    /// The most probable genotype, the first on ties.
    pub fn call(&self) -> Genotype {
        let mut best = 0;
        for g in 1..3 {
            if self.gp[g] > self.gp[best] {
                best = g;
            }
        }
        Genotype::ALL[best]
    }
}

/// `GL(g) = BinomialPMF(alt; depth, p_g)` and `GP(g) = GL(g) / Σ GL`.
/// The posterior is normalized in log space so deep sites do not underflow.
/// With no reads every genotype has likelihood 1 and probability 1/3.
pub fn genotype_likelihoods(alt: u64, depth: u64, error_rate: f64) -> Result<GenotypeLikelihoods> {
    if alt > depth {
        return Err(DemuxError::MalformedInput(format!(
            "{alt} ALT reads exceed a depth of {depth}"
        )));
    }
    let mut gl = [0.0; 3];
    let mut log_gl = [0.0; 3];
    for (i, g) in Genotype::ALL.iter().enumerate() {
        let binom = Binomial::new(g.alt_probability(error_rate), depth).map_err(|e| {
            DemuxError::InvalidParameter {
                name: "genotype_error",
                reason: e.to_string(),
            }
        })?;
        gl[i] = binom.pmf(alt);
        log_gl[i] = binom.ln_pmf(alt) / std::f64::consts::LN_2;
    }
    let mut gp = log_gl;
    stats::log2_normalize(&mut gp);
    Ok(GenotypeLikelihoods {
        alt,
        depth,
        gl,
        gp,
    })
}

/// Genotypes of every state at one variant.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenotypeRecord {
    /// Variant row.
    pub variant: VariantIdx,
    /// One entry per requested state.
    pub states: Vec<GenotypeLikelihoods>,
}

/// Genotype every variant in each of `states`, pooling the counts of the
/// barcodes assigned to the state.
pub fn emit_genotypes(
    counts: &CountMatrices,
    assignment: &Assignment,
    states: &[usize],
    error_rate: f64,
) -> Result<Vec<GenotypeRecord>> {
    let groups: Vec<Vec<usize>> = states
        .iter()
        .map(|&k| assignment.groups.get(k).cloned().unwrap_or_default())
        .collect();
    let (ref_sums, alt_sums) = counts.group_sums(&groups);
    (0..counts.num_variants())
        .map(|v| {
            let states = (0..groups.len())
                .map(|j| {
                    let alt = alt_sums[[v, j]] as u64;
                    let depth = alt + ref_sums[[v, j]] as u64;
                    genotype_likelihoods(alt, depth, error_rate)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(GenotypeRecord { variant: v, states })
        })
        .collect()
}
