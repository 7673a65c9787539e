//! Base-2 log-domain arithmetic.

/// Compute `log2(Σ 2^x)` without overflow by factoring out the maximum.
///
/// Returns `f64::NEG_INFINITY` when `values` is empty or every entry is
/// `-inf`.
pub fn log2_sum_exp2(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|x| (x - max).exp2()).sum();
    max + sum.log2()
}

/// Turn base-2 log weights into probabilities in place.
///
/// The row maximum is subtracted before exponentiating, then the row is
/// renormalized. A row without any finite weight becomes uniform.
pub fn log2_normalize(values: &mut [f64]) {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        let uniform = 1.0 / values.len() as f64;
        values.iter_mut().for_each(|v| *v = uniform);
        return;
    }
    let mut total = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp2();
        total += *v;
    }
    for v in values.iter_mut() {
        *v /= total;
    }
}
