//! Synthetic pooled count matrices for tests.
use crate::counts::{CountMatrices, Variant};
use rand::distributions::Distribution;
use rand::SeedableRng;
use rand_distr::Binomial;
use rand_xoshiro::Xoshiro256StarStar;

pub(crate) struct Synthetic {
    pub counts: CountMatrices,
    /// True state of every barcode.
    pub truth: Vec<usize>,
}

/// Barcode `c` belongs to state `c % states`. Every barcode covers every
/// variant with `depth` reads, ALT reads drawn from a binomial with the
/// state's ALT fraction `state_af[state][variant]`.
pub(crate) fn binomial_mixture(
    state_af: &[Vec<f64>],
    num_barcodes: usize,
    depth: u64,
    seed: u64,
) -> Synthetic {
    let states = state_af.len();
    let num_variants = state_af[0].len();
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let truth: Vec<usize> = (0..num_barcodes).map(|c| c % states).collect();
    let mut refs = vec![vec![0_u32; num_barcodes]; num_variants];
    let mut alts = vec![vec![0_u32; num_barcodes]; num_variants];
    for (c, &k) in truth.iter().enumerate() {
        for v in 0..num_variants {
            let alt = Binomial::new(depth, state_af[k][v])
                .unwrap()
                .sample(&mut rng);
            alts[v][c] = alt as u32;
            refs[v][c] = (depth - alt) as u32;
        }
    }
    let counts = CountMatrices::from_dense(
        (0..num_variants)
            .map(|v| Variant::new(format!("chr{}", v % 22 + 1), 1000 + v as u64))
            .collect(),
        (0..num_barcodes).map(|c| format!("AAAC{c:06}-1")).collect(),
        &refs,
        &alts,
    )
    .unwrap();
    Synthetic { counts, truth }
}

/// Per-state ALT fractions drawn uniformly from `levels`.
pub(crate) fn random_profiles(
    states: usize,
    num_variants: usize,
    levels: &[f64],
    seed: u64,
) -> Vec<Vec<f64>> {
    use rand::Rng;
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    (0..states)
        .map(|_| {
            (0..num_variants)
                .map(|_| levels[rng.gen_range(0..levels.len())])
                .collect()
        })
        .collect()
}

/// Three-state genotypes cycling through every non-constant REF/ALT
/// pattern. ALT-carrying states get 0.5 or 1.0, REF states get exactly 0.
pub(crate) fn patterned_profiles(num_variants: usize) -> Vec<Vec<f64>> {
    const PATTERNS: [[bool; 3]; 6] = [
        [true, false, false],
        [false, true, false],
        [false, false, true],
        [true, true, false],
        [true, false, true],
        [false, true, true],
    ];
    let mut profiles = vec![vec![0.0; num_variants]; 3];
    for v in 0..num_variants {
        let pattern = PATTERNS[v % PATTERNS.len()];
        let level = if (v / PATTERNS.len()) % 2 == 0 { 0.5 } else { 1.0 };
        for (k, &alt) in pattern.iter().enumerate() {
            profiles[k][v] = if alt { level } else { 0.0 };
        }
    }
    profiles
}
