use rand::seq::SliceRandom;
use rand::Rng;
use statrs::distribution::{Beta, Continuous};
use statrs::StatsError;

/// Randomly choose a fraction of indices to discard, favouring the indices
/// with the lowest scores.
///
/// Indices are ranked by ascending score and rank position `i` of `n` is
/// given weight `pdf((i + 0.5) / n)` under a Beta distribution. With a
/// Beta(1, 10) prior most of the mass sits on the first tenth of the ranking,
/// but every index keeps a non-zero chance of being drawn.
pub struct RankBiasedSampler {
    prior: Beta,
}

impl RankBiasedSampler {
    /// Create a sampler with a Beta(`alpha`, `beta`) prior over rank.
    pub fn new(alpha: f64, beta: f64) -> Result<RankBiasedSampler, StatsError> {
        Ok(RankBiasedSampler {
            prior: Beta::new(alpha, beta)?,
        })
    }

    /// Draw `max(1, round(fraction * n))` distinct positions of `scores`
    /// without replacement. The result is sorted ascending.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        scores: &[usize],
        fraction: f64,
        rng: &mut R,
    ) -> Vec<usize> {
        let n = scores.len();
        if n == 0 {
            return Vec::new();
        }
        let amount = ((fraction * n as f64).round() as usize).clamp(1, n);

        let mut ranked: Vec<usize> = (0..n).collect();
        ranked.sort_by_key(|&i| (scores[i], i));
        let weighted: Vec<(usize, f64)> = ranked
            .iter()
            .enumerate()
            .map(|(rank, &i)| (i, self.prior.pdf((rank as f64 + 0.5) / n as f64)))
            .collect();

        let mut chosen: Vec<usize> = match weighted.choose_multiple_weighted(rng, amount, |x| x.1) {
            Ok(iter) => iter.map(|&(i, _)| i).collect(),
            // Degenerate weights, fall back to the lowest ranks.
            Err(_) => ranked[..amount].to_vec(),
        };
        chosen.sort_unstable();
        chosen
    }
}
