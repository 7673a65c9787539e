//! stats
#![deny(missing_docs)]

mod log_space;
mod rand_index;
mod rank_sampler;
pub use log_space::{log2_normalize, log2_sum_exp2};
pub use rand_index::adjusted_rand_index;
pub use rank_sampler::RankBiasedSampler;

/// Sample mean and population variance of a sequence of numbers.
/// Returns `(NaN, NaN)` for an empty sequence.
pub fn mean_variance(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut n = 0_f64;
    let mut s = 0_f64;
    let mut s2 = 0_f64;
    for x in values {
        n += 1.0;
        s += x;
        s2 += x * x;
    }
    let mean = s / n;
    (mean, (s2 / n - mean * mean).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_variance() {
        let (mean, var) = mean_variance([1.0, 2.0, 3.0, 4.0].into_iter());
        assert!((mean - 2.5).abs() < 1e-12);
        assert!((var - 1.25).abs() < 1e-12);

        let (mean, var) = mean_variance([7.0, 7.0].into_iter());
        assert_eq!(mean, 7.0);
        assert_eq!(var, 0.0);

        let (mean, _) = mean_variance(std::iter::empty());
        assert!(mean.is_nan());
    }
}
