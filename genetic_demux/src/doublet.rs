//! Identification of the doublet state and top-up of its membership.
use crate::assign::Assignment;
use crate::counts::{BarcodeIdx, CountMatrices};
use crate::em::Converged;
use crate::events::DemuxEvent;
use crate::params::DoubletMode;
use ndarray::Array1;

/// Output of [`resolve_doublets`].
#[derive(Clone, Debug, PartialEq)]
pub struct DoubletResolved {
    /// The doublet state, `None` when doublets are excluded.
    pub doublet_state: Option<usize>,
    /// Hard assignment before reassignment.
    pub assigned: Assignment,
    /// Membership after barcodes were moved into the doublet state.
    pub reassigned: Assignment,
    /// Number of barcodes moved.
    pub moved: usize,
}

impl DoubletResolved {
    /// Non-doublet states, in index order.
    pub fn singlet_states(&self) -> Vec<usize> {
        (0..self.reassigned.groups.len())
            .filter(|&k| Some(k) != self.doublet_state)
            .collect()
    }
}

/// The state whose profile best explains every assigned group.
///
/// Entry `(i, j)` of the score matrix is the log-likelihood of group `j`'s
/// barcodes under state `i`'s profile; the doublet state maximizes the sum
/// over `j`. Ties go to the first state.
pub fn define_doublet(converged: &Converged, assignment: &Assignment) -> usize {
    let states = converged.num_states();
    let mut scores = Array1::<f64>::zeros(states);
    for group in &assignment.groups {
        for &c in group {
            scores += &converged.lp_c_s.row(c);
        }
    }
    scores
        .iter()
        .enumerate()
        .min_by(|a, b| b.1.total_cmp(a.1))
        .map_or(0, |(i, _)| i)
}

/// `Σ_v alt[v,c]·(1 - af[v,d])` for every barcode.
fn non_fit_scores(counts: &CountMatrices, converged: &Converged, doublet: usize) -> Vec<f64> {
    let mut scores = vec![0.0; counts.num_barcodes()];
    for (v, row) in counts.alt_counts().outer_iterator().enumerate() {
        let miss = 1.0 - converged.model_af[[v, doublet]];
        for (c, &x) in row.iter() {
            scores[c] += f64::from(x) * miss;
        }
    }
    scores
}

/// Move confidently assigned singlets into the doublet state until it holds
/// `floor(target * barcodes)` barcodes. Candidates are ranked by ascending
/// non-fit score, ties keeping barcode order. Returns the new membership and
/// the number of barcodes moved.
pub fn refine_doublets(
    counts: &CountMatrices,
    converged: &Converged,
    assignment: &Assignment,
    doublet: usize,
    target: f64,
    threshold: f64,
) -> (Assignment, usize) {
    let wanted = (target * counts.num_barcodes() as f64).floor() as usize;
    let lack = wanted.saturating_sub(assignment.groups[doublet].len());
    if lack == 0 {
        return (assignment.clone(), 0);
    }

    let non_fit = non_fit_scores(counts, converged, doublet);
    let mut candidates: Vec<(BarcodeIdx, usize, f64)> = Vec::new();
    for (s, group) in assignment.groups.iter().enumerate() {
        if s == doublet {
            continue;
        }
        for &c in group {
            if converged.p_s_c[[c, s]] >= threshold {
                candidates.push((c, s, non_fit[c]));
            }
        }
    }
    candidates.sort_by_key(|&(c, _, _)| c);
    candidates.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut reassigned = assignment.clone();
    let moving = &candidates[..lack.min(candidates.len())];
    for &(c, s, _) in moving {
        reassigned.groups[s].retain(|&x| x != c);
        reassigned.groups[doublet].push(c);
    }
    reassigned.groups[doublet].sort_unstable();
    (reassigned, moving.len())
}

/// Identify the doublet state and apply the requested doublet handling.
pub fn resolve_doublets(
    counts: &CountMatrices,
    converged: &Converged,
    assignment: &Assignment,
    mode: DoubletMode,
    threshold: f64,
    events: &mut Vec<DemuxEvent>,
) -> DoubletResolved {
    let passthrough = |doublet_state| DoubletResolved {
        doublet_state,
        assigned: assignment.clone(),
        reassigned: assignment.clone(),
        moved: 0,
    };
    let target = match mode {
        DoubletMode::Excluded => return passthrough(None),
        DoubletMode::Automatic => None,
        DoubletMode::Target(p) => Some(p),
    };
    let doublet = define_doublet(converged, assignment);
    events.push(DemuxEvent::DoubletStateDefined { state: doublet });
    let Some(target) = target else {
        return passthrough(Some(doublet));
    };
    let (reassigned, moved) =
        refine_doublets(counts, converged, assignment, doublet, target, threshold);
    events.push(DemuxEvent::DoubletsReassigned {
        moved,
        target: (target * counts.num_barcodes() as f64).floor() as usize,
    });
    DoubletResolved {
        doublet_state: Some(doublet),
        assigned: assignment.clone(),
        reassigned,
        moved,
    }
}
