//! VCF inputs: the high-confidence variant filter and known genotypes.
use anyhow::{bail, Context, Result};
use genetic_demux::{KnownGenotypes, Variant};
use ndarray::Array2;
use rust_htslib::bcf::header::{HeaderRecord, HeaderView};
use rust_htslib::bcf::{Read as BcfRead, Reader as BcfReader, Record as BcfRecord};
use std::collections::HashSet;
use std::path::Path;
use std::str;

/// Imputation quality a variant needs to pass the filter.
pub const MIN_IMPUTATION_R2: f32 = 0.9;

fn contig(rec: &BcfRecord) -> Result<String> {
    let Some(rid) = rec.rid() else {
        bail!("record at position {} does not have a rid", rec.pos() + 1)
    };
    let name = rec
        .header()
        .rid2name(rid)
        .with_context(|| format!("record rid {rid} has no contig name"))?;
    Ok(str::from_utf8(name)
        .context("contig name is not valid UTF-8")?
        .to_string())
}

/// `(chrom, 1-based pos)` of every record whose INFO `R2` exceeds
/// [`MIN_IMPUTATION_R2`]. Records without `R2` are dropped.
pub fn high_confidence_variants(path: &Path) -> Result<HashSet<(String, u64)>> {
    let mut reader = BcfReader::from_path(path).context("error opening vcf file")?;
    let mut keep = HashSet::new();
    for rec in reader.records() {
        let rec = rec?;
        let r2 = rec
            .info(b"R2")
            .float()
            .with_context(|| format!("reading R2 in {}", path.display()))?
            .and_then(|values| values.first().copied());
        if matches!(r2, Some(r2) if r2 > MIN_IMPUTATION_R2) {
            keep.insert((contig(&rec)?, rec.pos() as u64 + 1));
        }
    }
    Ok(keep)
}

/// The FORMAT field genotypes are read from, in order of preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenotypeField {
    /// Genotype probabilities.
    Gp,
    /// log10 genotype likelihoods.
    Gl,
    /// Phred-scaled genotype likelihoods.
    Pl,
    /// Hard genotype calls.
    Gt,
}

impl GenotypeField {
    const PREFERENCE: [GenotypeField; 4] = [
        GenotypeField::Gp,
        GenotypeField::Gl,
        GenotypeField::Pl,
        GenotypeField::Gt,
    ];

    /// FORMAT tag.
    pub fn tag(self) -> &'static str {
        match self {
            GenotypeField::Gp => "GP",
            GenotypeField::Gl => "GL",
            GenotypeField::Pl => "PL",
            GenotypeField::Gt => "GT",
        }
    }

    /// The most informative field the header declares.
    pub fn from_header(header: &HeaderView) -> Option<GenotypeField> {
        let declared: HashSet<String> = header
            .header_records()
            .into_iter()
            .filter_map(|record| match record {
                HeaderRecord::Format { values, .. } => values.get("ID").cloned(),
                _ => None,
            })
            .collect();
        Self::PREFERENCE
            .into_iter()
            .find(|field| declared.contains(field.tag()))
    }

    /// ALT dosage in `[0, 2]` of every sample of a record, `NaN` when missing.
    fn dosages(self, rec: &BcfRecord, num_samples: usize) -> Result<Vec<f64>> {
        let tag = self.tag().as_bytes();
        let mut dosages = vec![f64::NAN; num_samples];
        match self {
            GenotypeField::Gp | GenotypeField::Gl => {
                let values = rec.format(tag).float()?;
                for (dosage, v) in dosages.iter_mut().zip(values.iter()) {
                    let v: Vec<f64> = v.iter().map(|&x| f64::from(x)).collect();
                    let probs = match self {
                        GenotypeField::Gl => v.iter().map(|gl| 10_f64.powf(*gl)).collect(),
                        _ => v,
                    };
                    *dosage = dosage_from_probabilities(&probs);
                }
            }
            GenotypeField::Pl => {
                let values = rec.format(tag).integer()?;
                for (dosage, v) in dosages.iter_mut().zip(values.iter()) {
                    let probs: Vec<f64> = v
                        .iter()
                        .map(|&pl| {
                            if pl < 0 {
                                f64::NAN
                            } else {
                                10_f64.powf(-f64::from(pl) / 10.0)
                            }
                        })
                        .collect();
                    *dosage = dosage_from_probabilities(&probs);
                }
            }
            GenotypeField::Gt => {
                let genotypes = rec.genotypes()?;
                for (i, dosage) in dosages.iter_mut().enumerate() {
                    let alleles: Vec<u32> = genotypes
                        .get(i)
                        .iter()
                        .filter_map(|a| a.index())
                        .map(|a| a.min(1))
                        .collect();
                    if !alleles.is_empty() && alleles.len() <= 2 {
                        *dosage =
                            2.0 * f64::from(alleles.iter().sum::<u32>()) / alleles.len() as f64;
                    }
                }
            }
        }
        Ok(dosages)
    }
}

/// `P(RA) + 2 P(AA)` after normalizing three genotype weights.
fn dosage_from_probabilities(weights: &[f64]) -> f64 {
    if weights.len() != 3 || weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return f64::NAN;
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return f64::NAN;
    }
    (weights[1] + 2.0 * weights[2]) / total
}

/// Read the genotypes of every sample of a VCF.
///
/// The FORMAT field is chosen once from the header, by preference
/// GP, GL, PL and then GT, and every record is reduced to ALT dosages.
/// Multi-allelic records are skipped.
pub fn load_known_genotypes(path: &Path) -> Result<(KnownGenotypes, GenotypeField)> {
    let mut reader = BcfReader::from_path(path).context("error opening vcf file")?;
    let header = reader.header().clone();
    let samples: Vec<String> = header
        .samples()
        .iter()
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect();
    if samples.is_empty() {
        bail!("{} has no samples", path.display());
    }
    let Some(field) = GenotypeField::from_header(&header) else {
        bail!(
            "{} declares none of the GP, GL, PL or GT fields",
            path.display()
        );
    };

    let mut variants = Vec::new();
    let mut dosages: Vec<f64> = Vec::new();
    for rec in reader.records() {
        let rec = rec?;
        let alleles = rec.alleles();
        let [ref_allele, alt_allele] = alleles.as_slice() else {
            continue;
        };
        let mut variant = Variant::new(contig(&rec)?, rec.pos() as u64 + 1);
        if let ([r], [a]) = (ref_allele, alt_allele) {
            variant = variant.with_alleles(char::from(*r), char::from(*a));
        }
        dosages.extend(
            field
                .dosages(&rec, samples.len())
                .with_context(|| format!("reading {} of {variant}", field.tag()))?,
        );
        variants.push(variant);
    }
    let dosages = Array2::from_shape_vec((variants.len(), samples.len()), dosages)?;
    Ok((
        KnownGenotypes {
            samples,
            variants,
            dosages,
        },
        field,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const HEADER: &str = "##fileformat=VCFv4.2
##contig=<ID=chr1,length=1000>
##contig=<ID=chrX,length=1000>
##INFO=<ID=R2,Number=1,Type=Float,Description=\"Imputation R2\">
";

    fn write_vcf(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(HEADER.as_bytes()).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_high_confidence_variants() {
        let dir = TempDir::new().unwrap();
        let path = write_vcf(
            &dir,
            "imputed.vcf",
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO
chr1\t10\t.\tA\tG\t.\tPASS\tR2=0.95
chr1\t20\t.\tC\tT\t.\tPASS\tR2=0.5
chr1\t30\t.\tC\tT\t.\tPASS\t.
chrX\t40\t.\tG\tA\t.\tPASS\tR2=0.99
",
        );
        let keep = high_confidence_variants(&path).unwrap();
        let expected = HashSet::from([("chr1".to_string(), 10), ("chrX".to_string(), 40)]);
        assert_eq!(keep, expected);
    }

    #[test]
    fn test_known_genotypes_prefers_gp() {
        let dir = TempDir::new().unwrap();
        let path = write_vcf(
            &dir,
            "known.vcf",
            "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
##FORMAT=<ID=GP,Number=G,Type=Float,Description=\"Genotype probabilities\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tdonor1\tdonor2
chr1\t10\t.\tA\tG\t.\tPASS\t.\tGT:GP\t0/0:1,0,0\t1/1:0,0.2,0.8
chr1\t20\t.\tC\tT,A\t.\tPASS\t.\tGT:GP\t0/1:0,1,0,0,0,0\t0/0:1,0,0,0,0,0
",
        );
        let (known, field) = load_known_genotypes(&path).unwrap();
        assert_eq!(field, GenotypeField::Gp);
        assert_eq!(known.samples, vec!["donor1", "donor2"]);
        assert_eq!(
            known.variants,
            vec![Variant::new("chr1", 10).with_alleles('A', 'G')]
        );
        assert!((known.dosages[[0, 0]] - 0.0).abs() < 1e-6);
        assert!((known.dosages[[0, 1]] - 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_known_genotypes_from_gt() {
        let dir = TempDir::new().unwrap();
        let path = write_vcf(
            &dir,
            "calls.vcf",
            "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts1\ts2\ts3
chr1\t10\t.\tA\tG\t.\tPASS\t.\tGT\t0/1\t1|1\t./.
",
        );
        let (known, field) = load_known_genotypes(&path).unwrap();
        assert_eq!(field, GenotypeField::Gt);
        assert_eq!(known.dosages[[0, 0]], 1.0);
        assert_eq!(known.dosages[[0, 1]], 2.0);
        assert!(known.dosages[[0, 2]].is_nan());
    }

    #[test]
    fn test_dosage_from_probabilities() {
        assert!((dosage_from_probabilities(&[0.25, 0.5, 0.25]) - 1.0).abs() < 1e-12);
        assert!((dosage_from_probabilities(&[2.0, 0.0, 2.0]) - 1.0).abs() < 1e-12);
        assert!(dosage_from_probabilities(&[0.5, 0.5]).is_nan());
        assert!(dosage_from_probabilities(&[f64::NAN, 0.5, 0.5]).is_nan());
    }
}
