//! Loading REF/ALT count matrices.
use anyhow::{bail, Context, Result};
use genetic_demux::{CountMatrices, Variant};
use sprs::{CsMat, TriMat};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Parse one line of a variants file.
///
/// Accepts `chrom<TAB>pos[<TAB>ref<TAB>alt]`, `chrom:pos` and the
/// `chrom_pos` ids written by vartrix.
pub fn parse_variant(line: &str) -> Result<Variant> {
    let line = line.trim_end();
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() >= 2 {
        let pos = fields[1]
            .parse::<u64>()
            .with_context(|| format!("bad position in variant line {line:?}"))?;
        let variant = Variant::new(fields[0], pos);
        return Ok(match (fields.get(2), fields.get(3)) {
            (Some(r), Some(a)) if r.len() == 1 && a.len() == 1 => {
                let (r, a) = (r.as_bytes()[0] as char, a.as_bytes()[0] as char);
                variant.with_alleles(r, a)
            }
            _ => variant,
        });
    }
    if let Ok(variant) = line.parse::<Variant>() {
        return Ok(variant);
    }
    let Some((chrom, pos)) = line.rsplit_once('_') else {
        bail!("unrecognized variant id {line:?}");
    };
    let pos = pos
        .parse::<u64>()
        .with_context(|| format!("bad position in variant id {line:?}"))?;
    Ok(Variant::new(chrom, pos))
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| path.display().to_string())?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// One variant per line.
pub fn read_variants(path: &Path) -> Result<Vec<Variant>> {
    read_lines(path)?
        .iter()
        .map(|l| parse_variant(l).with_context(|| path.display().to_string()))
        .collect()
}

/// One barcode per line.
pub fn read_barcodes(path: &Path) -> Result<Vec<String>> {
    Ok(read_lines(path)?
        .into_iter()
        .map(|l| l.trim().to_string())
        .collect())
}

/// Read a Matrix Market file of non-negative integer counts.
pub fn read_mtx(path: &Path) -> Result<CsMat<u32>> {
    let tri: TriMat<i64> = sprs::io::read_matrix_market(path)
        .with_context(|| format!("reading matrix market file {}", path.display()))?;
    let mut counts = TriMat::new(tri.shape());
    for (&x, (row, col)) in tri.triplet_iter() {
        let Ok(x) = u32::try_from(x) else {
            bail!(
                "{}: count {x} at row {} column {} is not a non-negative 32-bit integer",
                path.display(),
                row + 1,
                col + 1
            );
        };
        if x > 0 {
            counts.add_triplet(row, col, x);
        }
    }
    Ok(counts.to_csr())
}

/// Load the Matrix Market layout written by the allele counting stage:
/// `ref.mtx` and `alt.mtx` with rows listed in `variants` and columns in
/// `barcodes`.
pub fn load_mtx(
    ref_mtx: &Path,
    alt_mtx: &Path,
    variants: &Path,
    barcodes: &Path,
) -> Result<CountMatrices> {
    let counts = CountMatrices::new(
        read_variants(variants)?,
        read_barcodes(barcodes)?,
        read_mtx(ref_mtx)?,
        read_mtx(alt_mtx)?,
    )?;
    Ok(counts)
}

/// Read a dense count table: a header of barcodes after one leading cell,
/// then one row per variant, the id first.
fn read_dense_csv(path: &Path) -> Result<(Vec<Variant>, Vec<String>, Vec<Vec<u32>>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| path.display().to_string())?;
    let barcodes: Vec<String> = reader
        .headers()
        .with_context(|| path.display().to_string())?
        .iter()
        .skip(1)
        .map(str::to_string)
        .collect();
    let mut variants = Vec::new();
    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| path.display().to_string())?;
        let Some(id) = record.get(0) else {
            bail!("{}: empty row {}", path.display(), i + 2);
        };
        variants.push(parse_variant(id)?);
        let row = record
            .iter()
            .skip(1)
            .map(|cell| {
                let cell = cell.trim();
                match cell.parse::<i64>() {
                    Ok(x) if x >= 0 => u32::try_from(x).ok(),
                    _ => None,
                }
                .with_context(|| {
                    format!(
                        "{}: {cell:?} is not a non-negative count (row {})",
                        path.display(),
                        i + 2
                    )
                })
            })
            .collect::<Result<Vec<u32>>>()?;
        rows.push(row);
    }
    Ok((variants, barcodes, rows))
}

/// Load a pair of dense CSV count tables with identical labels.
pub fn load_dense_csv(ref_csv: &Path, alt_csv: &Path) -> Result<CountMatrices> {
    let (ref_variants, ref_barcodes, ref_rows) = read_dense_csv(ref_csv)?;
    let (alt_variants, alt_barcodes, alt_rows) = read_dense_csv(alt_csv)?;
    if ref_variants != alt_variants || ref_barcodes != alt_barcodes {
        bail!(
            "{} and {} do not share the same variant and barcode labels",
            ref_csv.display(),
            alt_csv.display()
        );
    }
    Ok(CountMatrices::from_dense(ref_variants, ref_barcodes, &ref_rows, &alt_rows)?)
}

/// Keep only variants whose `(chrom, pos)` is in `keep`.
pub fn restrict_variants(
    counts: &CountMatrices,
    keep: &HashSet<(String, u64)>,
) -> Result<CountMatrices> {
    let rows: Vec<usize> = counts
        .variants()
        .iter()
        .enumerate()
        .filter(|(_, v)| keep.contains(&(v.chrom.clone(), v.pos)))
        .map(|(i, _)| i)
        .collect();
    if rows.is_empty() {
        bail!("no variant of the count matrices passed the variant filter");
    }
    Ok(counts.select_variants(&rows)?)
}
