//! REF/ALT count matrices and variant identities.
use crate::error::{DemuxError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Row index into the count matrices.
pub type VariantIdx = usize;
/// Column index into the count matrices.
pub type BarcodeIdx = usize;

/// A single-nucleotide variant, identified by `chrom:pos`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variant {
    /// Contig name.
    pub chrom: String,
    /// 1-based position.
    pub pos: u64,
    /// Reference base, when known.
    pub ref_base: Option<char>,
    /// Alternative base, when known.
    pub alt_base: Option<char>,
}

impl Variant {
    /// Create a variant without allele information.
    pub fn new(chrom: impl Into<String>, pos: u64) -> Self {
        Variant {
            chrom: chrom.into(),
            pos,
            ref_base: None,
            alt_base: None,
        }
    }

    /// Attach REF and ALT bases.
    pub fn with_alleles(self, ref_base: char, alt_base: char) -> Self {
        Variant {
            ref_base: Some(ref_base),
            alt_base: Some(alt_base),
            ..self
        }
    }

    /// The `chrom:pos` identifier.
    pub fn id(&self) -> String {
        self.to_string()
    }

    /// False for mitochondrial and sex chromosomes.
    pub fn is_autosomal(&self) -> bool {
        let name = self.chrom.strip_prefix("chr").unwrap_or(&self.chrom);
        !matches!(name.to_ascii_uppercase().as_str(), "M" | "MT" | "X" | "Y")
    }
}

impl Display for Variant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.chrom, self.pos)
    }
}

impl FromStr for Variant {
    type Err = DemuxError;

    fn from_str(s: &str) -> Result<Self> {
        let Some((chrom, pos)) = s.trim().rsplit_once(':') else {
            return Err(DemuxError::MalformedInput(format!(
                "variant id {s:?} is not of the form chrom:pos"
            )));
        };
        let pos = pos.parse::<u64>().map_err(|_| {
            DemuxError::MalformedInput(format!("variant id {s:?} has a non-numeric position"))
        })?;
        if chrom.is_empty() {
            return Err(DemuxError::MalformedInput(format!("variant id {s:?} has an empty contig")));
        }
        Ok(Variant::new(chrom, pos))
    }
}

/// Aligned REF and ALT count matrices, rows = variants, columns = barcodes.
///
/// Both matrices are kept in CSR layout and never densified as a whole.
#[derive(Clone, Debug)]
pub struct CountMatrices {
    variants: Vec<Variant>,
    barcodes: Vec<String>,
    ref_counts: CsMat<u32>,
    alt_counts: CsMat<u32>,
}

impl CountMatrices {
    /// Validate and wrap a pair of count matrices.
    ///
    /// Rejects empty inputs, shape mismatches between the matrices and their
    /// labels, and duplicated variant ids or barcodes.
    pub fn new(
        variants: Vec<Variant>,
        barcodes: Vec<String>,
        ref_counts: CsMat<u32>,
        alt_counts: CsMat<u32>,
    ) -> Result<Self> {
        if variants.is_empty() || barcodes.is_empty() {
            return Err(DemuxError::MalformedInput(
                "count matrices must have at least one variant and one barcode".to_string(),
            ));
        }
        if ref_counts.shape() != alt_counts.shape() {
            return Err(DemuxError::MalformedInput(format!(
                "REF matrix shape {:?} differs from ALT matrix shape {:?}",
                ref_counts.shape(),
                alt_counts.shape()
            )));
        }
        if ref_counts.shape() != (variants.len(), barcodes.len()) {
            return Err(DemuxError::MalformedInput(format!(
                "matrix shape {:?} does not match {} variants x {} barcodes",
                ref_counts.shape(),
                variants.len(),
                barcodes.len()
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = variants.iter().find(|v| !seen.insert((&v.chrom, v.pos))) {
            return Err(DemuxError::MalformedInput(format!("duplicate variant {dup}")));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = barcodes.iter().find(|b| !seen.insert(b.as_str())) {
            return Err(DemuxError::MalformedInput(format!("duplicate barcode {dup}")));
        }
        let to_csr = |m: CsMat<u32>| if m.is_csr() { m } else { m.to_csr() };
        Ok(CountMatrices {
            variants,
            barcodes,
            ref_counts: to_csr(ref_counts),
            alt_counts: to_csr(alt_counts),
        })
    }

    /// Build count matrices from dense `[variant][barcode]` tables.
    pub fn from_dense(
        variants: Vec<Variant>,
        barcodes: Vec<String>,
        ref_counts: &[Vec<u32>],
        alt_counts: &[Vec<u32>],
    ) -> Result<Self> {
        let shape = (variants.len(), barcodes.len());
        let to_sparse = |rows: &[Vec<u32>], name: &str| -> Result<CsMat<u32>> {
            if rows.len() != shape.0 || rows.iter().any(|r| r.len() != shape.1) {
                return Err(DemuxError::MalformedInput(format!(
                    "{name} table is not {} x {}",
                    shape.0, shape.1
                )));
            }
            let mut tri = TriMat::new(shape);
            for (v, row) in rows.iter().enumerate() {
                for (c, &x) in row.iter().enumerate() {
                    if x > 0 {
                        tri.add_triplet(v, c, x);
                    }
                }
            }
            Ok(tri.to_csr())
        };
        let ref_counts = to_sparse(ref_counts, "REF")?;
        let alt_counts = to_sparse(alt_counts, "ALT")?;
        CountMatrices::new(variants, barcodes, ref_counts, alt_counts)
    }

    /// Number of variants (rows).
    pub fn num_variants(&self) -> usize {
        self.variants.len()
    }

    /// Number of barcodes (columns).
    pub fn num_barcodes(&self) -> usize {
        self.barcodes.len()
    }

    /// Variant identities, in row order.
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Barcodes, in column order.
    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    /// REF counts, CSR.
    pub fn ref_counts(&self) -> &CsMat<u32> {
        &self.ref_counts
    }

    /// ALT counts, CSR.
    pub fn alt_counts(&self) -> &CsMat<u32> {
        &self.alt_counts
    }

    /// Per-variant REF and ALT totals over all barcodes.
    pub fn variant_totals(&self) -> (Array1<f64>, Array1<f64>) {
        let sum_rows = |m: &CsMat<u32>| {
            Array1::from_iter(
                m.outer_iterator()
                    .map(|row| row.iter().map(|(_, &x)| f64::from(x)).sum::<f64>()),
            )
        };
        (sum_rows(&self.ref_counts), sum_rows(&self.alt_counts))
    }

    /// Genome-wide smoothed ALT fraction `(alt + 1) / (ref + alt + 2)` per variant.
    pub fn background_alt(&self) -> Array1<f64> {
        let (ref_total, alt_total) = self.variant_totals();
        (&alt_total + 1.0) / (&ref_total + &alt_total + 2.0)
    }

    /// REF and ALT sums per variant over the barcodes of each group.
    /// Returns `(ref, alt)`, each variants x groups. A barcode listed in more
    /// than one group counts toward each of them.
    pub fn group_sums(&self, groups: &[Vec<BarcodeIdx>]) -> (Array2<f64>, Array2<f64>) {
        let mut membership: Vec<Vec<usize>> = vec![Vec::new(); self.num_barcodes()];
        for (g, members) in groups.iter().enumerate() {
            for &c in members {
                membership[c].push(g);
            }
        }
        let shape = (self.num_variants(), groups.len());
        let accumulate = |m: &CsMat<u32>| {
            let mut sums = Array2::<f64>::zeros(shape);
            for (v, row) in m.outer_iterator().enumerate() {
                for (c, &x) in row.iter() {
                    for &g in &membership[c] {
                        sums[[v, g]] += f64::from(x);
                    }
                }
            }
            sums
        };
        (accumulate(&self.ref_counts), accumulate(&self.alt_counts))
    }

    /// Keep only the listed variants, in the given order.
    pub fn select_variants(&self, keep: &[VariantIdx]) -> Result<Self> {
        let select = |m: &CsMat<u32>| -> CsMat<u32> {
            let mut tri = TriMat::new((keep.len(), self.num_barcodes()));
            for (new_v, &v) in keep.iter().enumerate() {
                if let Some(row) = m.outer_view(v) {
                    for (c, &x) in row.iter() {
                        tri.add_triplet(new_v, c, x);
                    }
                }
            }
            tri.to_csr()
        };
        CountMatrices::new(
            keep.iter().map(|&v| self.variants[v].clone()).collect(),
            self.barcodes.clone(),
            select(&self.ref_counts),
            select(&self.alt_counts),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn barcodes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("BC{i}-1")).collect()
    }

    fn small() -> CountMatrices {
        CountMatrices::from_dense(
            vec![Variant::new("chr1", 100), Variant::new("chr2", 5)],
            barcodes(3),
            &[vec![4, 0, 1], vec![0, 0, 2]],
            &[vec![0, 3, 1], vec![6, 0, 0]],
        )
        .unwrap()
    }

    #[test]
    fn test_variant_parsing() {
        let v: Variant = "chr1:12345".parse().unwrap();
        assert_eq!(v, Variant::new("chr1", 12345));
        assert_eq!(v.id(), "chr1:12345");
        // Contigs may themselves contain colons.
        let v: Variant = "HLA-A*01:01:500".parse().unwrap();
        assert_eq!(v.chrom, "HLA-A*01:01");
        assert_eq!(v.pos, 500);
        assert!("chr1".parse::<Variant>().is_err());
        assert!("chr1:abc".parse::<Variant>().is_err());
        assert!(":12".parse::<Variant>().is_err());
    }

    #[test]
    fn test_autosomal() {
        assert!(Variant::new("chr1", 1).is_autosomal());
        assert!(Variant::new("22", 1).is_autosomal());
        for chrom in ["chrX", "Y", "chrM", "MT", "chrMT"] {
            assert!(!Variant::new(chrom, 1).is_autosomal(), "{chrom}");
        }
    }

    #[test]
    fn test_rejects_malformed() {
        let variants = vec![Variant::new("chr1", 1)];
        let ok: CsMat<u32> = TriMat::new((1, 2)).to_csr();
        let wrong: CsMat<u32> = TriMat::new((1, 3)).to_csr();
        assert!(CountMatrices::new(variants.clone(), barcodes(2), ok.clone(), wrong).is_err());
        assert!(CountMatrices::new(variants.clone(), barcodes(3), ok.clone(), ok.clone()).is_err());
        let repeated = vec!["A".to_string(), "A".to_string()];
        assert!(CountMatrices::new(variants.clone(), repeated, ok.clone(), ok.clone()).is_err());
        let dup_variants = vec![Variant::new("chr1", 1), Variant::new("chr1", 1)];
        let two_rows: CsMat<u32> = TriMat::new((2, 2)).to_csr();
        assert!(
            CountMatrices::new(dup_variants, barcodes(2), two_rows.clone(), two_rows).is_err()
        );
        assert!(CountMatrices::new(variants, barcodes(2), ok.clone(), ok).is_ok());
    }

    #[test]
    fn test_background_alt() {
        let counts = small();
        let bg = counts.background_alt();
        // chr1:100: ref 5, alt 4; chr2:5: ref 2, alt 6
        assert!((bg[0] - 5.0 / 11.0).abs() < 1e-12);
        assert!((bg[1] - 7.0 / 10.0).abs() < 1e-12);
        assert!(bg.iter().all(|&x| x > 0.0 && x < 1.0));
    }

    #[test]
    fn test_group_sums_and_select() {
        let counts = small();
        let (ref_sums, alt_sums) = counts.group_sums(&[vec![0, 2], vec![1]]);
        assert_eq!(ref_sums, ndarray::array![[5.0, 0.0], [2.0, 0.0]]);
        assert_eq!(alt_sums, ndarray::array![[1.0, 3.0], [6.0, 0.0]]);

        let selected = counts.select_variants(&[1]).unwrap();
        assert_eq!(selected.variants(), &[Variant::new("chr2", 5)]);
        let (ref_sums, alt_sums) = selected.group_sums(&[vec![0, 1, 2]]);
        assert_eq!(ref_sums, ndarray::array![[2.0]]);
        assert_eq!(alt_sums, ndarray::array![[6.0]]);
    }
}
