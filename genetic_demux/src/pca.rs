//! Standardization and principal components of the initialization submatrix.
use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView2, Axis};

/// Upper bound on the number of principal components kept.
pub(crate) const MAX_PCS: usize = 20;

/// Z-score every column in place. Columns without variance become 0.
pub(crate) fn standardize_columns(x: &mut Array2<f64>) {
    for mut column in x.axis_iter_mut(Axis(1)) {
        let (mean, var) = stats::mean_variance(column.iter().copied());
        let sd = var.sqrt();
        if sd > 0.0 && sd.is_finite() {
            column.mapv_inplace(|v| (v - mean) / sd);
        } else {
            column.fill(0.0);
        }
    }
}

/// Singular value decomposition with singular values sorted descending.
/// Returns the singular values and the matching right singular vectors as
/// rows.
pub(crate) fn sorted_svd(x: ArrayView2<'_, f64>) -> (Vec<f64>, Vec<Vec<f64>>) {
    let (n, p) = x.dim();
    if n == 0 || p == 0 {
        return (Vec::new(), Vec::new());
    }
    let m = DMatrix::from_fn(n, p, |i, j| x[[i, j]]);
    let svd = m.svd(false, true);
    let Some(v_t) = svd.v_t else {
        return (Vec::new(), Vec::new());
    };
    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
    let values = order.iter().map(|&i| svd.singular_values[i]).collect();
    let vectors = order
        .iter()
        .map(|&i| v_t.row(i).iter().copied().collect())
        .collect();
    (values, vectors)
}

/// Numerical rank, using the same tolerance as numpy's `matrix_rank`.
pub(crate) fn matrix_rank(x: ArrayView2<'_, f64>) -> usize {
    let (values, _) = sorted_svd(x);
    let Some(&largest) = values.first() else {
        return 0;
    };
    let (n, p) = x.dim();
    let tol = largest * n.max(p) as f64 * f64::EPSILON;
    values.iter().filter(|&&s| s > tol).count()
}

/// Project the rows of `x` onto its leading principal axes.
/// Returns a rows x `min(max_pcs, rows, cols)` score matrix.
pub(crate) fn principal_components(x: &Array2<f64>, max_pcs: usize) -> Array2<f64> {
    let (n, p) = x.dim();
    let num_pcs = max_pcs.min(n).min(p);
    let (_, vectors) = sorted_svd(x.view());
    let num_pcs = num_pcs.min(vectors.len());
    let mut scores = Array2::<f64>::zeros((n, num_pcs));
    for (k, axis) in vectors.iter().take(num_pcs).enumerate() {
        for (i, row) in x.outer_iter().enumerate() {
            scores[[i, k]] = row.iter().zip(axis).map(|(a, b)| a * b).sum();
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standardize_columns() {
        let mut x = array![[1.0, 5.0], [3.0, 5.0]];
        standardize_columns(&mut x);
        assert_eq!(x, array![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_matrix_rank() {
        assert_eq!(
            matrix_rank(array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]].view()),
            2
        );
        assert_eq!(matrix_rank(array![[1.0, 1.0], [2.0, 2.0]].view()), 1);
        let tall = array![
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 0.0],
        ];
        assert_eq!(matrix_rank(tall.view()), 3);
        assert_eq!(matrix_rank(Array2::<f64>::zeros((2, 2)).view()), 0);
    }

    #[test]
    fn test_principal_components_separate_groups() {
        // Two groups differing along the first two columns.
        let mut x = array![
            [0.0, 1.0, 0.3],
            [0.1, 0.9, 0.5],
            [0.0, 1.0, 0.4],
            [1.0, 0.0, 0.4],
            [0.9, 0.1, 0.3],
            [1.0, 0.0, 0.5],
        ];
        standardize_columns(&mut x);
        let scores = principal_components(&x, MAX_PCS);
        assert_eq!(scores.dim(), (6, 3));
        let first = scores.column(0);
        let sign = first[0].signum();
        assert!(first.iter().take(3).all(|&s| s.signum() == sign));
        assert!(first.iter().skip(3).all(|&s| s.signum() == -sign));
    }
}
