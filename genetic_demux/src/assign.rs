//! Hard assignment of barcodes to states.
use crate::counts::BarcodeIdx;
use ndarray::Array2;

/// Barcodes confidently assigned to each state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    /// Sorted barcode indices per state.
    pub groups: Vec<Vec<BarcodeIdx>>,
    /// Barcodes that reached no state's threshold, sorted.
    pub unassigned: Vec<BarcodeIdx>,
}

impl Assignment {
    /// Number of assigned barcodes over all states.
    pub fn num_assigned(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// State of every barcode, `None` when unassigned.
    pub fn state_of(&self, num_barcodes: usize) -> Vec<Option<usize>> {
        let mut states = vec![None; num_barcodes];
        for (k, group) in self.groups.iter().enumerate() {
            for &c in group {
                states[c] = Some(k);
            }
        }
        states
    }
}

/// Assign barcodes with `p_s_c[c, k] >= threshold` to state `k`.
/// With a threshold above one half a barcode reaches at most one state.
pub fn assign_cells(p_s_c: &Array2<f64>, threshold: f64) -> Assignment {
    let mut groups = vec![Vec::new(); p_s_c.ncols()];
    let mut unassigned = Vec::new();
    for (c, row) in p_s_c.outer_iter().enumerate() {
        match row.iter().position(|&p| p >= threshold) {
            Some(k) => groups[k].push(c),
            None => unassigned.push(c),
        }
    }
    Assignment { groups, unassigned }
}
