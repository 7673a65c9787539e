//! Genotype-free demultiplexing of pooled single-cell libraries.
use anyhow::{bail, Context, Result};
use clap::{self, Args, Parser, Subcommand};
use demux_io::outputs::{self, OutputFiles, GENOTYPES_VCF, RESULT_CSV};
use demux_io::{config, log_events, matrix, vcf};
use genetic_demux::{match_states, CountMatrices, DemuxParams};
use log::{info, LevelFilter};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Assign cell barcodes of a pooled library to their sample of origin from
/// REF/ALT allele counts alone.
#[derive(Parser, Debug)]
#[clap(name = "genetic_demux", version)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Log debug messages.
    #[clap(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit the model and write every result file.
    Run(RunArgs),
    /// Re-emit per-state genotypes from a saved p_s_c.csv and result.csv.
    Genotype(GenotypeArgs),
}

/// Count matrices: a Matrix Market pair with its labels, or a dense CSV pair.
#[derive(Args, Debug)]
struct CountArgs {
    /// REF counts, `.mtx` or `.csv`.
    #[clap(long = "ref", value_name = "PATH")]
    ref_counts: PathBuf,

    /// ALT counts, same format as --ref.
    #[clap(long = "alt", value_name = "PATH")]
    alt_counts: PathBuf,

    /// Variant of each matrix row. Required for `.mtx` input.
    #[clap(long, value_name = "TSV")]
    variants: Option<PathBuf>,

    /// Barcode of each matrix column. Required for `.mtx` input.
    #[clap(long, value_name = "TSV")]
    barcodes: Option<PathBuf>,

    /// Keep only variants with an imputation R2 above 0.9 in this VCF.
    #[clap(long, value_name = "VCF")]
    vcf_filter: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[clap(flatten)]
    counts: CountArgs,

    /// Output directory.
    #[clap(short, long, value_name = "DIR")]
    out: PathBuf,

    /// TOML parameter file.
    #[clap(long, value_name = "TOML")]
    params: Option<PathBuf>,

    /// Number of pooled samples. Searched when omitted.
    #[clap(short = 'k', long)]
    num_samples: Option<usize>,

    /// Upper bound of the sample-count search.
    #[clap(long)]
    max_candidate_samples: Option<usize>,

    /// Independent restarts per sample count.
    #[clap(short, long)]
    restarts: Option<usize>,

    /// Master seed.
    #[clap(long)]
    seed: Option<u64>,

    /// Expected doublet fraction; 0 fits no doublet state.
    #[clap(short, long)]
    doublet_proportion: Option<f64>,

    /// Worker threads, 0 for all cores.
    #[clap(short, long)]
    threads: Option<usize>,

    /// VCF of known sample genotypes to match states against.
    #[clap(long, value_name = "VCF")]
    known_genotypes: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GenotypeArgs {
    #[clap(flatten)]
    counts: CountArgs,

    /// p_s_c.csv written by `run`.
    #[clap(long, value_name = "CSV")]
    p_s_c: PathBuf,

    /// result.csv written by `run`. Defaults to the file next to p_s_c.csv.
    #[clap(long, value_name = "CSV")]
    result: Option<PathBuf>,

    /// Output VCF. Defaults to genotypes.vcf next to p_s_c.csv.
    #[clap(short, long, value_name = "VCF")]
    out: Option<PathBuf>,

    /// TOML parameter file, for the genotype error rate.
    #[clap(long, value_name = "TOML")]
    params: Option<PathBuf>,
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

fn load_counts(args: &CountArgs) -> Result<CountMatrices> {
    let counts = if is_csv(&args.ref_counts) {
        matrix::load_dense_csv(&args.ref_counts, &args.alt_counts)?
    } else {
        let (Some(variants), Some(barcodes)) = (&args.variants, &args.barcodes) else {
            bail!("--variants and --barcodes are required with Matrix Market counts");
        };
        matrix::load_mtx(&args.ref_counts, &args.alt_counts, variants, barcodes)?
    };
    info!(
        "loaded {} variants x {} barcodes",
        counts.num_variants(),
        counts.num_barcodes()
    );
    let Some(filter) = &args.vcf_filter else {
        return Ok(counts);
    };
    let keep = vcf::high_confidence_variants(filter)
        .with_context(|| format!("reading variant filter {}", filter.display()))?;
    let counts = matrix::restrict_variants(&counts, &keep)?;
    info!(
        "{} variants pass the imputation filter",
        counts.num_variants()
    );
    Ok(counts)
}

impl RunArgs {
    fn params(&self) -> Result<DemuxParams> {
        let mut params = config::load_params(self.params.as_deref())?;
        if self.num_samples.is_some() {
            params.num_samples = self.num_samples;
        }
        if let Some(max) = self.max_candidate_samples {
            params.max_candidate_samples = max;
        }
        if let Some(restarts) = self.restarts {
            params.restarts = restarts;
        }
        if let Some(seed) = self.seed {
            params.seed = seed;
        }
        if self.doublet_proportion.is_some() {
            params.doublet_proportion = self.doublet_proportion;
        }
        if let Some(threads) = self.threads {
            params.threads = threads;
        }
        Ok(params)
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let params = args.params()?;
    config::warn_non_defaults(&params);
    let counts = load_counts(&args.counts)?;
    let outs = OutputFiles::create(&args.out)?;

    let demultiplex = || genetic_demux::demultiplex(&counts, &params);
    let run = with_threads(params.threads, demultiplex)?.context("demultiplexing failed")?;
    log_events(&run.events);
    info!(
        "{} samples, {} of {} barcodes assigned",
        run.num_samples,
        run.doublets.reassigned.num_assigned(),
        counts.num_barcodes()
    );

    let sample_matches = match &args.known_genotypes {
        Some(path) => {
            let (known, field) = vcf::load_known_genotypes(path)
                .with_context(|| format!("reading known genotypes {}", path.display()))?;
            info!(
                "matching states against {} known samples using {}",
                known.samples.len(),
                field.tag()
            );
            let matches = match_states(
                &counts,
                &run.converged.model_af,
                &run.doublets.singlet_states(),
                &known,
            );
            for m in &matches {
                match (&m.sample, m.correlation) {
                    (Some(sample), Some(r)) => {
                        info!("{} matches {sample} (r = {r:.3})", run.state_label(m.state))
                    }
                    _ => info!("{} matches no known sample", run.state_label(m.state)),
                }
            }
            Some(matches)
        }
        None => None,
    };

    outputs::write_run(&outs, &counts, &run, &params, sample_matches.as_deref())?;
    info!("results written to {}", args.out.display());
    Ok(())
}

fn genotype(args: &GenotypeArgs) -> Result<()> {
    let params = config::load_params(args.params.as_deref())?;
    config::warn_non_defaults(&params);
    params.validate()?;
    let counts = load_counts(&args.counts)?;
    let result = match &args.result {
        Some(result) => result.clone(),
        None => args.p_s_c.with_file_name(RESULT_CSV),
    };
    let out = match &args.out {
        Some(out) => out.clone(),
        None => args.p_s_c.with_file_name(GENOTYPES_VCF),
    };
    let (states, records) = outputs::write_saved_genotypes(
        &counts,
        &args.p_s_c,
        &result,
        &out,
        params.genotype_error,
    )?;
    info!(
        "genotypes of {states} states over {records} variants written to {}",
        out.display()
    );
    Ok(())
}

/// Run `f` on a pool of `threads` workers, or on rayon's global pool for 0.
fn with_threads<T: Send>(threads: usize, f: impl FnOnce() -> T + Send) -> Result<T> {
    if threads == 0 {
        return Ok(f());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("building thread pool")?;
    Ok(pool.install(f))
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                buf.timestamp_seconds(),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match &cli.command {
        Command::Run(args) => run(args),
        Command::Genotype(args) => genotype(args),
    }
}
