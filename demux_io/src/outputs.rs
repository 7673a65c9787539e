//! Result files of a demultiplexing run.
use anyhow::{bail, Context, Result};
use genetic_demux::genotype::GenotypeRecord;
use genetic_demux::{
    Assignment, Call, CountMatrices, DemuxParams, DemuxRun, SampleMatch, VariantIdx,
};
use itertools::Itertools;
use ndarray::{Array2, ArrayView2};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Hard assignments, assigned barcodes only.
pub const RESULT_CSV: &str = "result.csv";
/// Responsibilities of every barcode.
pub const P_S_C_CSV: &str = "p_s_c.csv";
/// Distinguishing variant ids, one per line.
pub const DIST_VARIANTS_TXT: &str = "dist_variants.txt";
/// Calls of the distinguishing variants.
pub const DIST_MATRIX_CSV: &str = "dist_matrix.csv";
/// Calls of every variant.
pub const PA_MATRIX_CSV: &str = "pa_matrix.csv";
/// Per-state genotypes.
pub const GENOTYPES_VCF: &str = "genotypes.vcf";
/// Run summary.
pub const SUMMARY_JSON: &str = "summary.json";

/// Paths of the files written into an output directory.
#[derive(Debug, Clone)]
pub struct OutputFiles {
    dir: PathBuf,
}

impl OutputFiles {
    /// Create `dir` if needed.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
        Ok(OutputFiles {
            dir: dir.to_path_buf(),
        })
    }

    /// Path of `name` inside the output directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

fn buf_writer(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(
        File::create(path).with_context(|| path.display().to_string())?,
    ))
}

/// `barcode,label` for every assigned barcode, in barcode order.
pub fn write_assignments(
    path: &Path,
    barcodes: &[String],
    labels: &[Option<String>],
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(buf_writer(path)?);
    writer.write_record(["barcode", "label"])?;
    for (barcode, label) in barcodes.iter().zip(labels) {
        if let Some(label) = label {
            writer.write_record([barcode, label])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Read a file written by [`write_assignments`] as `(barcode, label)` rows.
pub fn read_assignments(path: &Path) -> Result<Vec<(String, String)>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| path.display().to_string())?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| path.display().to_string())?;
        let (Some(barcode), Some(label)) = (record.get(0), record.get(1)) else {
            bail!(
                "{}: line {} needs a barcode and a label",
                path.display(),
                rows.len() + 2
            );
        };
        rows.push((barcode.to_string(), label.to_string()));
    }
    Ok(rows)
}

/// Barcodes by state with the state labels as header.
pub fn write_p_s_c(
    path: &Path,
    barcodes: &[String],
    state_labels: &[String],
    p_s_c: &Array2<f64>,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(buf_writer(path)?);
    writer.write_record(std::iter::once("barcode").chain(state_labels.iter().map(String::as_str)))?;
    for (barcode, row) in barcodes.iter().zip(p_s_c.outer_iter()) {
        let mut record = vec![barcode.clone()];
        record.extend(row.iter().map(f64::to_string));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Responsibilities read back from [`P_S_C_CSV`].
#[derive(Debug, Clone, PartialEq)]
pub struct SavedPosteriors {
    /// Row labels.
    pub barcodes: Vec<String>,
    /// Column labels.
    pub states: Vec<String>,
    /// Barcodes x states.
    pub p_s_c: Array2<f64>,
}

impl SavedPosteriors {
    /// State membership recorded in `labels`, the rows of [`RESULT_CSV`],
    /// indexed against `barcodes`. Doublet reassignment is only visible in
    /// these labels, not in the responsibilities.
    pub fn membership(
        &self,
        barcodes: &[String],
        labels: &[(String, String)],
    ) -> Result<Assignment> {
        let barcode_index: HashMap<&str, usize> = barcodes
            .iter()
            .enumerate()
            .map(|(i, b)| (b.as_str(), i))
            .collect();
        let state_index: HashMap<&str, usize> = self
            .states
            .iter()
            .enumerate()
            .map(|(k, s)| (s.as_str(), k))
            .collect();
        let mut groups = vec![Vec::new(); self.states.len()];
        let mut assigned = vec![false; barcodes.len()];
        for (barcode, label) in labels {
            let Some(&c) = barcode_index.get(barcode.as_str()) else {
                bail!("assigned barcode {barcode} is not in the count matrices");
            };
            let Some(&k) = state_index.get(label.as_str()) else {
                bail!("label {label} of barcode {barcode} is not a saved state");
            };
            if assigned[c] {
                bail!("barcode {barcode} is assigned twice");
            }
            assigned[c] = true;
            groups[k].push(c);
        }
        for group in &mut groups {
            group.sort_unstable();
        }
        let unassigned = (0..barcodes.len()).filter(|&c| !assigned[c]).collect();
        Ok(Assignment { groups, unassigned })
    }
}

/// Read a file written by [`write_p_s_c`].
pub fn read_p_s_c(path: &Path) -> Result<SavedPosteriors> {
    let mut reader = csv::Reader::from_path(path).with_context(|| path.display().to_string())?;
    let states: Vec<String> = reader
        .headers()?
        .iter()
        .skip(1)
        .map(str::to_string)
        .collect();
    if states.is_empty() {
        bail!("{} has no state columns", path.display());
    }
    let mut barcodes = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| path.display().to_string())?;
        if record.len() != states.len() + 1 {
            bail!(
                "{}: line {} has {} fields, expected {}",
                path.display(),
                barcodes.len() + 2,
                record.len(),
                states.len() + 1
            );
        }
        barcodes.push(record[0].to_string());
        for cell in record.iter().skip(1) {
            values.push(
                cell.parse::<f64>()
                    .with_context(|| format!("{}: bad probability {cell:?}", path.display()))?,
            );
        }
    }
    let p_s_c = Array2::from_shape_vec((barcodes.len(), states.len()), values)?;
    Ok(SavedPosteriors {
        barcodes,
        states,
        p_s_c,
    })
}

/// One variant id per line.
pub fn write_variant_ids(path: &Path, counts: &CountMatrices, rows: &[VariantIdx]) -> Result<()> {
    let mut writer = buf_writer(path)?;
    for &v in rows {
        writeln!(writer, "{}", counts.variants()[v])?;
    }
    writer.flush()?;
    Ok(())
}

/// Call matrix with one row per variant and one column per state label.
pub fn write_call_matrix(
    path: &Path,
    counts: &CountMatrices,
    rows: &[VariantIdx],
    state_labels: &[String],
    calls: ArrayView2<'_, Call>,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(buf_writer(path)?);
    writer.write_record(std::iter::once("variant").chain(state_labels.iter().map(String::as_str)))?;
    for (&v, row) in rows.iter().zip(calls.outer_iter()) {
        let mut record = vec![counts.variants()[v].id()];
        record.extend(row.iter().map(|call| call.symbol().to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn format_triplet(values: impl IntoIterator<Item = f64>) -> String {
    values.into_iter().map(|x| format!("{x:.4}")).join(",")
}

/// Per-state genotypes as a VCF with `GT:GL:GP` samples. GL is written in
/// log10 as the format requires.
pub fn write_genotypes_vcf(
    path: &Path,
    counts: &CountMatrices,
    records: &[GenotypeRecord],
    state_labels: &[String],
) -> Result<()> {
    let mut w = buf_writer(path)?;
    writeln!(w, "##fileformat=VCFv4.2")?;
    writeln!(w, "##source=genetic_demux")?;
    for chrom in counts.variants().iter().map(|v| v.chrom.as_str()).unique() {
        writeln!(w, "##contig=<ID={chrom}>")?;
    }
    writeln!(
        w,
        "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">"
    )?;
    writeln!(
        w,
        "##FORMAT=<ID=GL,Number=G,Type=Float,Description=\"Genotype likelihoods, log10\">"
    )?;
    writeln!(
        w,
        "##FORMAT=<ID=GP,Number=G,Type=Float,Description=\"Genotype posterior probabilities\">"
    )?;
    writeln!(
        w,
        "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}",
        state_labels.iter().join("\t")
    )?;
    for record in records {
        let variant = &counts.variants()[record.variant];
        let samples = record
            .states
            .iter()
            .map(|g| {
                format!(
                    "{}:{}:{}",
                    g.call(),
                    format_triplet(g.gl.iter().map(|gl| gl.max(f64::MIN_POSITIVE).log10())),
                    format_triplet(g.gp.iter().copied())
                )
            })
            .join("\t");
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t.\tPASS\t.\tGT:GL:GP\t{samples}",
            variant.chrom,
            variant.pos,
            variant.id(),
            variant.ref_base.unwrap_or('N'),
            variant.alt_base.map_or(".".to_string(), String::from),
        )?;
    }
    w.flush()?;
    Ok(())
}

/// Contents of [`SUMMARY_JSON`].
#[derive(Debug, Serialize)]
pub struct Summary<'a> {
    /// Pooled samples, given or searched.
    pub num_samples: usize,
    /// Label of every fitted state.
    pub states: Vec<String>,
    /// Doublet state, if any.
    pub doublet_state: Option<usize>,
    /// Winning restart.
    pub restart: usize,
    /// Seed of the winning restart.
    pub seed: u64,
    /// Base-2 log-likelihood of the selected model.
    pub log_likelihood: f64,
    /// Whether EM stopped before the iteration cap.
    pub converged: bool,
    /// EM iterations of the selected model.
    pub iterations: usize,
    /// Barcodes with a label.
    pub assigned: usize,
    /// Barcodes without a label.
    pub unassigned: usize,
    /// Barcodes moved into the doublet state.
    pub moved_to_doublet: usize,
    /// Distinguishing variant ids.
    pub distinguishing_variants: Vec<String>,
    /// State pairs left indistinguishable.
    pub indistinguishable: &'a [(usize, usize)],
    /// Matches against known genotypes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_matches: Option<&'a [SampleMatch]>,
    /// Parameters of the run.
    pub params: &'a DemuxParams,
}

impl<'a> Summary<'a> {
    /// Summarize a run.
    pub fn new(
        run: &'a DemuxRun,
        counts: &CountMatrices,
        params: &'a DemuxParams,
        sample_matches: Option<&'a [SampleMatch]>,
    ) -> Self {
        let reassigned = &run.doublets.reassigned;
        Summary {
            num_samples: run.num_samples,
            states: (0..run.converged.num_states())
                .map(|k| run.state_label(k))
                .collect(),
            doublet_state: run.doublets.doublet_state,
            restart: run.converged.restart,
            seed: run.converged.seed,
            log_likelihood: run.converged.log_likelihood,
            converged: run.converged.converged,
            iterations: run.converged.iterations,
            assigned: reassigned.num_assigned(),
            unassigned: reassigned.unassigned.len(),
            moved_to_doublet: run.doublets.moved,
            distinguishing_variants: run
                .variants
                .selected
                .iter()
                .map(|&v| counts.variants()[v].id())
                .collect(),
            indistinguishable: &run.variants.indistinguishable,
            sample_matches,
            params,
        }
    }
}

/// Pretty-printed JSON.
pub fn write_summary(path: &Path, summary: &Summary<'_>) -> Result<()> {
    let mut writer = buf_writer(path)?;
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.flush()?;
    Ok(())
}

/// Write every result file of `run` into `outs`.
pub fn write_run(
    outs: &OutputFiles,
    counts: &CountMatrices,
    run: &DemuxRun,
    params: &DemuxParams,
    sample_matches: Option<&[SampleMatch]>,
) -> Result<()> {
    let state_labels: Vec<String> = (0..run.converged.num_states())
        .map(|k| run.state_label(k))
        .collect();
    write_assignments(&outs.path(RESULT_CSV), counts.barcodes(), &run.labels())?;
    write_p_s_c(
        &outs.path(P_S_C_CSV),
        counts.barcodes(),
        &state_labels,
        &run.converged.p_s_c,
    )?;
    write_variant_ids(
        &outs.path(DIST_VARIANTS_TXT),
        counts,
        &run.variants.selected,
    )?;

    let pa = &run.variants.presence_absence;
    let pa_labels: Vec<String> = pa.states.iter().map(|&k| run.state_label(k)).collect();
    write_call_matrix(
        &outs.path(DIST_MATRIX_CSV),
        counts,
        &run.variants.selected,
        &pa_labels,
        run.variants.pattern.view(),
    )?;
    write_call_matrix(
        &outs.path(PA_MATRIX_CSV),
        counts,
        &pa.variants,
        &pa_labels,
        pa.calls.view(),
    )?;

    let states = run.doublets.singlet_states();
    let records = genetic_demux::emit_genotypes(
        counts,
        &run.doublets.reassigned,
        &states,
        params.genotype_error,
    )?;
    let genotype_labels: Vec<String> = states.iter().map(|&k| run.state_label(k)).collect();
    write_genotypes_vcf(
        &outs.path(GENOTYPES_VCF),
        counts,
        &records,
        &genotype_labels,
    )?;

    write_summary(
        &outs.path(SUMMARY_JSON),
        &Summary::new(run, counts, params, sample_matches),
    )
}

/// Re-emit per-state genotypes from a previous run's [`P_S_C_CSV`] and
/// [`RESULT_CSV`] into `out`. Doublet states are skipped. Returns the number
/// of states and of records written.
pub fn write_saved_genotypes(
    counts: &CountMatrices,
    p_s_c: &Path,
    result: &Path,
    out: &Path,
    error_rate: f64,
) -> Result<(usize, usize)> {
    let saved = read_p_s_c(p_s_c)?;
    let labels = read_assignments(result)?;
    let assignment = saved.membership(counts.barcodes(), &labels)?;
    let states: Vec<usize> = saved
        .states
        .iter()
        .enumerate()
        .filter(|(_, label)| !label.starts_with(genetic_demux::DOUBLET_PREFIX))
        .map(|(k, _)| k)
        .collect();
    let state_labels: Vec<String> = states.iter().map(|&k| saved.states[k].clone()).collect();
    let records = genetic_demux::emit_genotypes(counts, &assignment, &states, error_rate)?;
    write_genotypes_vcf(out, counts, &records, &state_labels)?;
    Ok((states.len(), records.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use genetic_demux::{
        assign_cells, genotype_likelihoods, presence_absence, select_distinguishing_variants,
        Converged, DoubletResolved, Variant,
    };
    use ndarray::array;
    use tempfile::TempDir;

    fn counts() -> CountMatrices {
        CountMatrices::from_dense(
            vec![
                Variant::new("chr1", 10).with_alleles('A', 'G'),
                Variant::new("chr2", 20),
            ],
            vec!["AAA-1".into(), "CCC-1".into(), "GGG-1".into()],
            &[vec![5, 0, 3], vec![0, 4, 4]],
            &[vec![0, 6, 0], vec![2, 0, 0]],
        )
        .unwrap()
    }

    #[test]
    fn test_assignments_skip_unassigned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(RESULT_CSV);
        let c = counts();
        write_assignments(
            &path,
            c.barcodes(),
            &[Some("SNG-0".into()), None, Some("DBL-1".into())],
        )
        .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "barcode,label\nAAA-1,SNG-0\nGGG-1,DBL-1\n");
    }

    #[test]
    fn test_p_s_c_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(P_S_C_CSV);
        let c = counts();
        let p = array![[1.0, 0.0], [0.25, 0.75], [0.5, 0.5]];
        let labels = vec!["SNG-0".to_string(), "SNG-1".to_string()];
        write_p_s_c(&path, c.barcodes(), &labels, &p).unwrap();

        let saved = read_p_s_c(&path).unwrap();
        assert_eq!(saved.states, labels);
        assert_eq!(saved.barcodes, c.barcodes());
        assert_eq!(saved.p_s_c, p);
    }

    #[test]
    fn test_call_matrix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DIST_MATRIX_CSV);
        let calls = array![[Call::Ref, Call::Alt], [Call::Ambiguous, Call::Alt]];
        write_call_matrix(
            &path,
            &counts(),
            &[1, 0],
            &["SNG-0".into(), "SNG-2".into()],
            calls.view(),
        )
        .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "variant,SNG-0,SNG-2\nchr2:20,0,1\nchr1:10,NA,1\n");
    }

    #[test]
    fn test_genotypes_vcf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(GENOTYPES_VCF);
        let c = counts();
        let records = vec![
            GenotypeRecord {
                variant: 0,
                states: vec![
                    genotype_likelihoods(0, 8, 0.01).unwrap(),
                    genotype_likelihoods(6, 6, 0.01).unwrap(),
                ],
            },
            GenotypeRecord {
                variant: 1,
                states: vec![
                    genotype_likelihoods(2, 10, 0.01).unwrap(),
                    genotype_likelihoods(0, 0, 0.01).unwrap(),
                ],
            },
        ];
        write_genotypes_vcf(&path, &c, &records, &["SNG-0".into(), "SNG-1".into()]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.contains(&"##contig=<ID=chr1>"));
        assert!(lines.contains(&"##contig=<ID=chr2>"));
        let header = lines.iter().position(|l| l.starts_with("#CHROM")).unwrap();
        assert!(lines[header].ends_with("FORMAT\tSNG-0\tSNG-1"));

        let first: Vec<&str> = lines[header + 1].split('\t').collect();
        assert_eq!(&first[..5], &["chr1", "10", "chr1:10", "A", "G"]);
        assert!(first[9].starts_with("0/0:"));
        assert!(first[10].starts_with("1/1:"));

        let second: Vec<&str> = lines[header + 2].split('\t').collect();
        assert_eq!(&second[3..5], &["N", "."]);
        assert!(second[9].starts_with("0/1:"));
        assert_eq!(second[10], "0/0:0.0000,0.0000,0.0000:0.3333,0.3333,0.3333");
    }

    #[test]
    fn test_variant_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DIST_VARIANTS_TXT);
        write_variant_ids(&path, &counts(), &[1, 0]).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "chr2:20\nchr1:10\n"
        );
    }

    #[test]
    fn test_empty_assignment_has_header_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(RESULT_CSV);
        let assignment = Assignment {
            groups: vec![vec![]],
            unassigned: vec![0, 1, 2],
        };
        let labels: Vec<Option<String>> = assignment
            .state_of(3)
            .into_iter()
            .map(|s| s.map(|k| format!("SNG-{k}")))
            .collect();
        write_assignments(&path, counts().barcodes(), &labels).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "barcode,label\n");
    }

    fn run_with_moved_doublet(counts: &CountMatrices) -> DemuxRun {
        let p_s_c = array![[1.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let assigned = assign_cells(&p_s_c, 0.99);
        // Barcode 1 was topped up into the doublet state.
        let reassigned = Assignment {
            groups: vec![vec![0], vec![1, 2]],
            unassigned: vec![],
        };
        let doublets = DoubletResolved {
            doublet_state: Some(1),
            assigned,
            reassigned,
            moved: 1,
        };
        let converged = Converged {
            restart: 0,
            seed: 0,
            initial_groups: vec![vec![0, 1], vec![2]],
            model_af: array![[0.1, 0.5], [0.5, 0.1]],
            log_prior: array![-1.0, -1.0],
            p_s_c,
            lp_c_s: Array2::from_elem((3, 2), -4.0),
            log_likelihood: -12.0,
            trace: vec![-12.0],
            iterations: 1,
            converged: true,
        };
        let mut events = Vec::new();
        let pa = presence_absence(counts, &doublets, 10, 10);
        let variants = select_distinguishing_variants(&pa, &mut events);
        DemuxRun {
            num_samples: 1,
            converged,
            doublets,
            variants,
            events,
        }
    }

    #[test]
    fn test_saved_genotypes_follow_doublet_moves() {
        let dir = TempDir::new().unwrap();
        let c = counts();
        let run = run_with_moved_doublet(&c);
        let params = DemuxParams::default();
        let outs = OutputFiles::create(dir.path()).unwrap();
        write_run(&outs, &c, &run, &params, None).unwrap();

        let saved = read_p_s_c(&outs.path(P_S_C_CSV)).unwrap();
        let labels = read_assignments(&outs.path(RESULT_CSV)).unwrap();
        assert_eq!(
            labels,
            vec![
                ("AAA-1".to_string(), "SNG-0".to_string()),
                ("CCC-1".to_string(), "DBL-1".to_string()),
                ("GGG-1".to_string(), "DBL-1".to_string()),
            ]
        );
        let membership = saved.membership(c.barcodes(), &labels).unwrap();
        assert_eq!(membership, run.doublets.reassigned);
        assert_ne!(membership, assign_cells(&saved.p_s_c, 0.99));

        let regenerated = dir.path().join("regenerated.vcf");
        let (states, records) = write_saved_genotypes(
            &c,
            &outs.path(P_S_C_CSV),
            &outs.path(RESULT_CSV),
            &regenerated,
            params.genotype_error,
        )
        .unwrap();
        assert_eq!((states, records), (1, 2));
        assert_eq!(
            std::fs::read_to_string(&regenerated).unwrap(),
            std::fs::read_to_string(outs.path(GENOTYPES_VCF)).unwrap()
        );
    }

    #[test]
    fn test_membership_rejects_unknown_labels() {
        let saved = SavedPosteriors {
            barcodes: vec!["AAA-1".into()],
            states: vec!["SNG-0".into(), "SNG-1".into()],
            p_s_c: array![[1.0, 0.0]],
        };
        let barcodes = vec!["AAA-1".to_string(), "CCC-1".to_string()];
        let row = |b: &str, l: &str| (b.to_string(), l.to_string());

        let labels = [row("CCC-1", "SNG-1")];
        let membership = saved.membership(&barcodes, &labels).unwrap();
        assert_eq!(membership.groups, vec![vec![], vec![1]]);
        assert_eq!(membership.unassigned, vec![0]);

        let unknown_state = [row("AAA-1", "SNG-7")];
        assert!(saved.membership(&barcodes, &unknown_state).is_err());
        let unknown_barcode = [row("TTT-1", "SNG-0")];
        assert!(saved.membership(&barcodes, &unknown_barcode).is_err());
        let twice = [row("AAA-1", "SNG-0"), row("AAA-1", "SNG-1")];
        assert!(saved.membership(&barcodes, &twice).is_err());
    }
}
