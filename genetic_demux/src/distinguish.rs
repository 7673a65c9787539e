//! Selection of a small set of variants that tells every pair of states apart.
//!
//! Each retained variant gets a ternary call per state from the state's
//! pooled counts. The search then works level by level. Rows that are fully
//! called and vary over the current states are grouped by pattern, the
//! group representative being the row with the most calls overall. If the
//! representatives span the state space, a successive-projection pass picks
//! the level's variants. States that are still confused are searched again
//! with one variant fewer. This is a greedy heuristic, not a proven minimum.
use crate::counts::{CountMatrices, VariantIdx};
use crate::doublet::DoubletResolved;
use crate::events::DemuxEvent;
use crate::pca::{matrix_rank, sorted_svd};
use ndarray::{Array2, Axis};
use serde::Serialize;
use std::collections::BTreeMap;

/// Residual variance treated as zero.
const RESIDUAL_EPSILON: f64 = 1e-12;

/// Ternary allele call of one variant in one state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Call {
    /// Enough REF reads and no ALT read.
    Ref,
    /// Enough ALT reads.
    Alt,
    /// Neither.
    Ambiguous,
}

impl Call {
    /// Call from pooled counts.
    pub fn from_counts(ref_count: f64, alt_count: f64, min_alt: u32, min_ref: u32) -> Call {
        if alt_count >= f64::from(min_alt) {
            Call::Alt
        } else if ref_count >= f64::from(min_ref) && alt_count == 0.0 {
            Call::Ref
        } else {
            Call::Ambiguous
        }
    }

    fn bit(self) -> Option<u8> {
        match self {
            Call::Ref => Some(0),
            Call::Alt => Some(1),
            Call::Ambiguous => None,
        }
    }

    /// `1`, `0` or `NA`.
    pub fn symbol(self) -> &'static str {
        match self {
            Call::Ref => "0",
            Call::Alt => "1",
            Call::Ambiguous => "NA",
        }
    }
}

/// Ternary calls of every autosomal variant in every singlet state.
#[derive(Clone, Debug, PartialEq)]
pub struct PresenceAbsence {
    /// Variant of each row.
    pub variants: Vec<VariantIdx>,
    /// State of each column.
    pub states: Vec<usize>,
    /// Calls, rows x columns.
    pub calls: Array2<Call>,
}

/// Build the presence/absence matrix from the reassigned membership.
/// Variants on sex and mitochondrial contigs and the doublet state are left
/// out.
pub fn presence_absence(
    counts: &CountMatrices,
    resolved: &DoubletResolved,
    min_alt: u32,
    min_ref: u32,
) -> PresenceAbsence {
    let states = resolved.singlet_states();
    let groups: Vec<Vec<usize>> = states
        .iter()
        .map(|&k| resolved.reassigned.groups[k].clone())
        .collect();
    let (ref_sums, alt_sums) = counts.group_sums(&groups);
    let variants: Vec<VariantIdx> = counts
        .variants()
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_autosomal())
        .map(|(i, _)| i)
        .collect();
    let calls = Array2::from_shape_fn((variants.len(), states.len()), |(i, j)| {
        let v = variants[i];
        Call::from_counts(ref_sums[[v, j]], alt_sums[[v, j]], min_alt, min_ref)
    });
    PresenceAbsence {
        variants,
        states,
        calls,
    }
}

/// Output of [`select_distinguishing_variants`].
#[derive(Clone, Debug, PartialEq)]
pub struct VariantsSelected {
    /// Selected variants, in selection order.
    pub selected: Vec<VariantIdx>,
    /// Calls of the selected variants, rows x `presence_absence.states`.
    pub pattern: Array2<Call>,
    /// The matrix the search ran on.
    pub presence_absence: PresenceAbsence,
    /// State pairs no selected variant separates. Empty on success.
    pub indistinguishable: Vec<(usize, usize)>,
}

impl VariantsSelected {
    /// True when every pair of states is separated.
    pub fn all_distinguishable(&self) -> bool {
        self.indistinguishable.is_empty()
    }
}

/// Column pairs not separated by any of `rows`.
fn confused_pairs(calls: &Array2<Call>, rows: &[usize]) -> Vec<(usize, usize)> {
    let n = calls.ncols();
    let mut pairs = Vec::new();
    for a in 0..n {
        for b in a + 1..n {
            let separated = rows.iter().any(|&r| {
                matches!(
                    (calls[[r, a]].bit(), calls[[r, b]].bit()),
                    (Some(x), Some(y)) if x != y
                )
            });
            if !separated {
                pairs.push((a, b));
            }
        }
    }
    pairs
}

/// One representative row per distinct pattern over `cols`, taken from the
/// fully called rows that are not constant there. Returns the
/// representatives ordered by pattern.
fn pattern_candidates(
    calls: &Array2<Call>,
    cols: &[usize],
    coverage: &[usize],
    taken: &[usize],
) -> Vec<(usize, Vec<u8>)> {
    let mut best: BTreeMap<Vec<u8>, usize> = BTreeMap::new();
    for (r, row) in calls.axis_iter(Axis(0)).enumerate() {
        if taken.contains(&r) {
            continue;
        }
        let Some(pattern) = cols
            .iter()
            .map(|&j| row[j].bit())
            .collect::<Option<Vec<u8>>>()
        else {
            continue;
        };
        if pattern.iter().all(|&b| b == pattern[0]) {
            continue;
        }
        let entry = best.entry(pattern).or_insert(r);
        if coverage[r] > coverage[*entry] {
            *entry = r;
        }
    }
    best.into_iter().map(|(pattern, r)| (r, pattern)).collect()
}

/// Variance of the part of `x` orthogonal to `basis`.
fn residual_variance(x: &[f64], basis: &[Vec<f64>]) -> f64 {
    let mut residual = x.to_vec();
    for b in basis {
        let dot: f64 = x.iter().zip(b).map(|(a, b)| a * b).sum();
        for (r, bi) in residual.iter_mut().zip(b) {
            *r -= dot * bi;
        }
    }
    stats::mean_variance(residual.into_iter()).1
}

/// Pick up to `m` rows of `x` by successive projection. Starts from the row
/// with the smallest sum; afterwards, among the rows whose residual variance
/// against the chosen rows exceeds half the largest residual variance, the
/// one with the smallest sum. The first index wins every tie.
fn successive_projection(x: &Array2<f64>, m: usize) -> Vec<usize> {
    let sums: Vec<f64> = x.outer_iter().map(|r| r.sum()).collect();
    let first_min = |pool: &mut dyn Iterator<Item = usize>| {
        pool.fold(None, |best: Option<usize>, i| match best {
            Some(b) if sums[b] <= sums[i] => Some(b),
            _ => Some(i),
        })
    };
    let Some(start) = first_min(&mut (0..x.nrows())) else {
        return Vec::new();
    };
    let mut chosen = vec![start];
    while chosen.len() < m {
        let picked = x.select(Axis(0), &chosen);
        let (values, vectors) = sorted_svd(picked.view());
        let tol = values.first().copied().unwrap_or(0.0)
            * picked.nrows().max(picked.ncols()) as f64
            * f64::EPSILON;
        let basis: Vec<Vec<f64>> = values
            .iter()
            .zip(vectors)
            .filter(|(s, _)| **s > tol)
            .map(|(_, v)| v)
            .collect();
        let residuals: Vec<(usize, f64)> = (0..x.nrows())
            .filter(|i| !chosen.contains(i))
            .map(|i| (i, residual_variance(&x.row(i).to_vec(), &basis)))
            .collect();
        let max = residuals.iter().map(|&(_, r)| r).fold(0.0, f64::max);
        if max <= RESIDUAL_EPSILON {
            break;
        }
        let mut survivors = residuals
            .iter()
            .filter(|&&(_, r)| r > 0.5 * max)
            .map(|&(i, _)| i);
        match first_min(&mut survivors) {
            Some(next) => chosen.push(next),
            None => break,
        }
    }
    chosen
}

/// Greedy level-wise search for variants that separate every pair of
/// singlet states. An exhausted search is reported through a
/// [`DemuxEvent::NotAllDistinguishable`] event and the partial selection is
/// returned.
pub fn select_distinguishing_variants(
    pa: &PresenceAbsence,
    events: &mut Vec<DemuxEvent>,
) -> VariantsSelected {
    let calls = &pa.calls;
    let num_states = calls.ncols();
    let coverage: Vec<usize> = calls
        .outer_iter()
        .map(|row| row.iter().filter(|c| **c != Call::Ambiguous).count())
        .collect();

    let mut taken: Vec<usize> = Vec::new();
    let mut cols: Vec<usize> = (0..num_states).collect();
    let mut m = num_states.saturating_sub(1);
    let mut pairs = confused_pairs(calls, &taken);
    while !pairs.is_empty() && m > 0 {
        let candidates = pattern_candidates(calls, &cols, &coverage, &taken);
        let x = Array2::from_shape_fn((candidates.len(), cols.len()), |(i, j)| {
            f64::from(candidates[i].1[j])
        });
        if candidates.is_empty() || matrix_rank(x.view()) != cols.len() {
            break;
        }
        let level: Vec<usize> = successive_projection(&x, m)
            .into_iter()
            .map(|i| candidates[i].0)
            .collect();
        events.push(DemuxEvent::SearchLevel {
            states: cols.iter().map(|&j| pa.states[j]).collect(),
            candidates: candidates.len(),
            selected: level.iter().map(|&r| pa.variants[r]).collect(),
        });
        taken.extend(level);
        pairs = confused_pairs(calls, &taken);

        let mut next: Vec<usize> = pairs.iter().flat_map(|&(a, b)| [a, b]).collect();
        next.sort_unstable();
        next.dedup();
        m = (m - 1).min(next.len().saturating_sub(1));
        cols = next;
    }

    let indistinguishable: Vec<(usize, usize)> = pairs
        .iter()
        .map(|&(a, b)| (pa.states[a], pa.states[b]))
        .collect();
    if !indistinguishable.is_empty() {
        events.push(DemuxEvent::NotAllDistinguishable {
            pairs: indistinguishable.clone(),
        });
    }
    VariantsSelected {
        selected: taken.iter().map(|&r| pa.variants[r]).collect(),
        pattern: calls.select(Axis(0), &taken),
        presence_absence: pa.clone(),
        indistinguishable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Call::{Alt as A, Ambiguous as N, Ref as R};

    fn pa(rows: Vec<Vec<Call>>) -> PresenceAbsence {
        let n = rows.len();
        let s = rows[0].len();
        PresenceAbsence {
            variants: (0..n).map(|i| i + 100).collect(),
            states: (0..s).collect(),
            calls: Array2::from_shape_vec((n, s), rows.into_iter().flatten().collect()).unwrap(),
        }
    }

    #[test]
    fn test_calls_from_counts() {
        assert_eq!(Call::from_counts(0.0, 10.0, 10, 10), Call::Alt);
        assert_eq!(Call::from_counts(50.0, 12.0, 10, 10), Call::Alt);
        assert_eq!(Call::from_counts(10.0, 0.0, 10, 10), Call::Ref);
        assert_eq!(Call::from_counts(40.0, 1.0, 10, 10), Call::Ambiguous);
        assert_eq!(Call::from_counts(9.0, 0.0, 10, 10), Call::Ambiguous);
        assert_eq!(Call::Ambiguous.symbol(), "NA");
    }

    #[test]
    fn test_three_states_need_two_variants() {
        let pa = pa(vec![
            vec![R, R, R],
            vec![A, R, R],
            vec![R, A, R],
            vec![R, R, A],
            vec![A, A, R],
            vec![A, N, A],
            vec![R, A, A],
        ]);
        let mut events = Vec::new();
        let result = select_distinguishing_variants(&pa, &mut events);
        assert_eq!(result.selected.len(), 2);
        assert!(result.all_distinguishable());
        // Smallest pattern sum first: [0, 0, 1] is row 3, then [0, 1, 0] is row 2.
        assert_eq!(result.selected, vec![103, 102]);
        assert_eq!(result.pattern.row(0).to_vec(), vec![R, R, A]);
        assert!(matches!(&events[..], [DemuxEvent::SearchLevel { candidates: 5, .. }]));
        for a in 0..3 {
            for b in a + 1..3 {
                assert!(result.pattern.column(a) != result.pattern.column(b));
            }
        }
    }

    #[test]
    fn test_coverage_breaks_pattern_ties() {
        // Rows 0 and 1 share the pattern over the first two states; row 1 has
        // an extra call in the third state.
        let calls = pa(vec![vec![A, R, N], vec![A, R, R], vec![R, A, N]]).calls;
        let coverage = vec![2, 3, 2];
        let candidates = pattern_candidates(&calls, &[0, 1], &coverage, &[]);
        assert_eq!(candidates, vec![(2, vec![0, 1]), (1, vec![1, 0])]);
    }

    #[test]
    fn test_second_level_resolves_remaining_pair() {
        // The first level picks [1, 0, 0] and [0, 1, 1], which leaves states
        // 1 and 2 together. Rows 2 and 3 separate them at the next level.
        let pa = pa(vec![
            vec![R, A, A],
            vec![A, R, R],
            vec![A, R, A],
            vec![A, A, R],
        ]);
        let mut events = Vec::new();
        let result = select_distinguishing_variants(&pa, &mut events);
        assert!(
            result.all_distinguishable(),
            "{:?}",
            result.indistinguishable
        );
        assert_eq!(result.selected, vec![101, 100, 102]);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            DemuxEvent::SearchLevel {
                states: vec![1, 2],
                candidates: 2,
                selected: vec![102],
            }
        );
    }

    #[test]
    fn test_not_all_distinguishable() {
        // After the first level only [1, 1, 0] varies over states 1 and 2,
        // which does not span both of them.
        let pa = pa(vec![vec![R, A, A], vec![A, R, R], vec![A, A, R]]);
        let mut events = Vec::new();
        let result = select_distinguishing_variants(&pa, &mut events);
        assert_eq!(result.selected, vec![101, 100]);
        assert_eq!(result.indistinguishable, vec![(1, 2)]);
        assert!(matches!(
            events.last(),
            Some(DemuxEvent::NotAllDistinguishable { pairs }) if pairs == &vec![(1, 2)]
        ));
    }

    #[test]
    fn test_identical_states_fail_rank_test() {
        let pa = pa(vec![vec![A, R, R], vec![R, A, A], vec![A, A, A]]);
        let mut events = Vec::new();
        let result = select_distinguishing_variants(&pa, &mut events);
        assert!(result.selected.is_empty());
        assert_eq!(result.indistinguishable, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_single_state_needs_nothing() {
        let pa = pa(vec![vec![A], vec![R]]);
        let mut events = Vec::new();
        let result = select_distinguishing_variants(&pa, &mut events);
        assert!(result.selected.is_empty());
        assert!(result.all_distinguishable());
        assert!(events.is_empty());
    }
}
