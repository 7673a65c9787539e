use std::collections::HashMap;

fn pairs(n: u64) -> f64 {
    (n * n.saturating_sub(1)) as f64 / 2.0
}

/// Adjusted Rand index between two labelings of the same items.
/// See https://en.wikipedia.org/wiki/Rand_index#Adjusted_Rand_index
///
/// Returns 1.0 when both labelings are trivially identical (for example a
/// single cluster each), where the index is otherwise undefined.
pub fn adjusted_rand_index(truth: &[usize], predicted: &[usize]) -> f64 {
    assert_eq!(truth.len(), predicted.len());
    let mut contingency: HashMap<(usize, usize), u64> = HashMap::new();
    let mut truth_sizes: HashMap<usize, u64> = HashMap::new();
    let mut predicted_sizes: HashMap<usize, u64> = HashMap::new();
    for (&t, &p) in truth.iter().zip(predicted) {
        *contingency.entry((t, p)).or_default() += 1;
        *truth_sizes.entry(t).or_default() += 1;
        *predicted_sizes.entry(p).or_default() += 1;
    }

    let index: f64 = contingency.values().map(|&n| pairs(n)).sum();
    let truth_pairs: f64 = truth_sizes.values().map(|&n| pairs(n)).sum();
    let predicted_pairs: f64 = predicted_sizes.values().map(|&n| pairs(n)).sum();
    let total = pairs(truth.len() as u64);
    if total == 0.0 {
        return 1.0;
    }
    let expected = truth_pairs * predicted_pairs / total;
    let max_index = (truth_pairs + predicted_pairs) / 2.0;
    if max_index == expected {
        return 1.0;
    }
    (index - expected) / (max_index - expected)
}
