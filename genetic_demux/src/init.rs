//! Initial allele-frequency profiles from the dense core of the count matrices.
use crate::cluster::{groups_of, kmeans, KMEANS_STARTS};
use crate::counts::{BarcodeIdx, CountMatrices, VariantIdx};
use crate::error::{DemuxError, Result};
use crate::pca::{principal_components, standardize_columns, MAX_PCS};
use ndarray::Array2;
use rand::Rng;
use stats::RankBiasedSampler;
use std::collections::HashMap;

/// Row and column coverage the retained submatrix must reach.
const TARGET_DENSITY: f64 = 0.9;
/// Fraction of a failing axis dropped per round.
const STRIP_FRACTION: f64 = 0.1;
const RANK_PRIOR_ALPHA: f64 = 1.0;
const RANK_PRIOR_BETA: f64 = 10.0;
/// Pseudo-count of the ALT proportion features.
const PROPORTION_PSEUDO_COUNT: f64 = 0.01;

/// Output of [`initialize`].
#[derive(Clone, Debug, PartialEq)]
pub struct Initialized {
    /// Initial allele-frequency profiles, variants x states.
    pub model_af: Array2<f64>,
    /// Barcodes of the retained submatrix grouped by initial cluster.
    pub groups: Vec<Vec<BarcodeIdx>>,
    /// Variants of the retained submatrix.
    pub retained_variants: Vec<VariantIdx>,
    /// Barcodes of the retained submatrix.
    pub retained_barcodes: Vec<BarcodeIdx>,
}

/// Columns covered (REF + ALT > 0) in each row.
fn coverage(counts: &CountMatrices) -> Vec<Vec<BarcodeIdx>> {
    counts
        .ref_counts()
        .outer_iterator()
        .zip(counts.alt_counts().outer_iterator())
        .map(|(r, a)| {
            let mut cols: Vec<usize> = r
                .iter()
                .chain(a.iter())
                .filter(|(_, &x)| x > 0)
                .map(|(c, _)| c)
                .collect();
            cols.sort_unstable();
            cols.dedup();
            cols
        })
        .collect()
}

/// Drop poorly covered rows and columns until the rest is dense.
fn strip_to_dense_core<R: Rng + ?Sized>(
    covered: &[Vec<BarcodeIdx>],
    num_barcodes: usize,
    num_states: usize,
    sampler: &RankBiasedSampler,
    rng: &mut R,
) -> (Vec<VariantIdx>, Vec<BarcodeIdx>) {
    let mut row_kept = vec![true; covered.len()];
    let mut col_kept = vec![true; num_barcodes];
    let col_floor = num_states as f64 / TARGET_DENSITY + 1.0;
    loop {
        let rows: Vec<VariantIdx> = (0..covered.len()).filter(|&v| row_kept[v]).collect();
        let cols: Vec<BarcodeIdx> = (0..num_barcodes).filter(|&c| col_kept[c]).collect();
        if rows.len() <= 1 || (cols.len() as f64) < col_floor {
            return (rows, cols);
        }

        let mut col_count = vec![0_usize; num_barcodes];
        let row_count: Vec<usize> = rows
            .iter()
            .map(|&v| {
                let mut n = 0;
                for &c in covered[v].iter().filter(|&&c| col_kept[c]) {
                    col_count[c] += 1;
                    n += 1;
                }
                n
            })
            .collect();
        let col_count: Vec<usize> = cols.iter().map(|&c| col_count[c]).collect();

        let min_fraction =
            |n: &[usize], d: usize| n.iter().min().map_or(0.0, |&m| m as f64 / d as f64);
        let rows_dense = min_fraction(&row_count, cols.len()) >= TARGET_DENSITY;
        let cols_dense = min_fraction(&col_count, rows.len()) >= TARGET_DENSITY;
        if rows_dense && cols_dense {
            return (rows, cols);
        }
        if !rows_dense {
            for i in sampler.sample(&row_count, STRIP_FRACTION, rng) {
                row_kept[rows[i]] = false;
            }
        }
        if !cols_dense {
            for i in sampler.sample(&col_count, STRIP_FRACTION, rng) {
                col_kept[cols[i]] = false;
            }
        }
    }
}

/// Barcodes x variants smoothed ALT proportions of the retained submatrix.
fn alt_proportions(
    counts: &CountMatrices,
    rows: &[VariantIdx],
    cols: &[BarcodeIdx],
) -> Array2<f64> {
    let col_pos: HashMap<BarcodeIdx, usize> =
        cols.iter().enumerate().map(|(i, &c)| (c, i)).collect();
    let mut ref_sub = Array2::<f64>::zeros((cols.len(), rows.len()));
    let mut alt_sub = Array2::<f64>::zeros((cols.len(), rows.len()));
    for (j, &v) in rows.iter().enumerate() {
        for (dense, m) in [
            (&mut ref_sub, counts.ref_counts()),
            (&mut alt_sub, counts.alt_counts()),
        ] {
            if let Some(row) = m.outer_view(v) {
                for (c, &x) in row.iter() {
                    if let Some(&i) = col_pos.get(&c) {
                        dense[[i, j]] = f64::from(x);
                    }
                }
            }
        }
    }
    let p = PROPORTION_PSEUDO_COUNT;
    (&alt_sub + p) / (&alt_sub + &ref_sub + 2.0 * p)
}

/// Smoothed per-state ALT fractions over all variants for the given
/// barcode groups: `(alt_k + bg) / (alt_k + ref_k + 1)`.
pub(crate) fn profiles_from_groups(
    counts: &CountMatrices,
    groups: &[Vec<BarcodeIdx>],
) -> Array2<f64> {
    let bg = counts.background_alt();
    let (ref_sums, alt_sums) = counts.group_sums(groups);
    let mut af = Array2::<f64>::zeros(alt_sums.dim());
    for ((v, k), x) in af.indexed_iter_mut() {
        *x = (alt_sums[[v, k]] + bg[v]) / (alt_sums[[v, k]] + ref_sums[[v, k]] + 1.0);
    }
    af
}

/// Seed `num_states` allele-frequency profiles.
///
/// The sparse matrices are stripped to a dense core with rank-biased random
/// sampling, the core's barcodes are clustered on the leading principal
/// components of their ALT proportions, and each cluster's counts over all
/// variants give the initial profile of one state.
pub fn initialize<R: Rng + ?Sized>(
    counts: &CountMatrices,
    num_states: usize,
    rng: &mut R,
) -> Result<Initialized> {
    let sampler = RankBiasedSampler::new(RANK_PRIOR_ALPHA, RANK_PRIOR_BETA).map_err(|e| {
        DemuxError::InvalidParameter {
            name: "rank_prior",
            reason: e.to_string(),
        }
    })?;
    let covered = coverage(counts);
    let (rows, cols) =
        strip_to_dense_core(&covered, counts.num_barcodes(), num_states, &sampler, rng);

    let mut features = alt_proportions(counts, &rows, &cols);
    standardize_columns(&mut features);
    let scores = principal_components(&features, MAX_PCS);
    if scores.nrows() < num_states {
        return Err(DemuxError::InsufficientInformation {
            barcodes: scores.nrows(),
            states: num_states,
        });
    }

    let labels = kmeans(scores.view(), num_states, KMEANS_STARTS, rng);
    let groups: Vec<Vec<BarcodeIdx>> = groups_of(&labels, num_states)
        .into_iter()
        .map(|g| g.into_iter().map(|i| cols[i]).collect())
        .collect();
    let model_af = profiles_from_groups(counts, &groups);
    Ok(Initialized {
        model_af,
        groups,
        retained_variants: rows,
        retained_barcodes: cols,
    })
}
