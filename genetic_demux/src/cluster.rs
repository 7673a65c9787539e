//! A small k-means on principal-component scores.
//! Seeded with k-means++, run several times, the lowest inertia wins.
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Seeded k-means starts per initialization.
pub(crate) const KMEANS_STARTS: usize = 10;
const MAX_LLOYD_ITERATIONS: usize = 300;

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest(point: ArrayView1<'_, f64>, centers: &Array2<f64>) -> (usize, f64) {
    centers
        .outer_iter()
        .map(|c| squared_distance(point, c))
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, f64::INFINITY))
}

fn plus_plus_centers<R: Rng + ?Sized>(
    data: ArrayView2<'_, f64>,
    k: usize,
    rng: &mut R,
) -> Array2<f64> {
    let (n, dim) = data.dim();
    let mut centers = Array2::<f64>::zeros((k, dim));
    centers.row_mut(0).assign(&data.row(rng.gen_range(0..n)));
    let mut dist: Vec<f64> = data
        .outer_iter()
        .map(|x| squared_distance(x, centers.row(0)))
        .collect();
    for j in 1..k {
        let pick = match WeightedIndex::new(&dist) {
            Ok(weights) => weights.sample(rng),
            // Every point already coincides with a center.
            Err(_) => rng.gen_range(0..n),
        };
        centers.row_mut(j).assign(&data.row(pick));
        for (d, x) in dist.iter_mut().zip(data.outer_iter()) {
            *d = d.min(squared_distance(x, centers.row(j)));
        }
    }
    centers
}

/// One Lloyd run from k-means++ centers. Returns labels and inertia.
fn lloyd<R: Rng + ?Sized>(data: ArrayView2<'_, f64>, k: usize, rng: &mut R) -> (Vec<usize>, f64) {
    let (n, dim) = data.dim();
    let mut centers = plus_plus_centers(data, k, rng);
    let mut labels = vec![usize::MAX; n];
    let mut inertia = f64::INFINITY;
    for _ in 0..MAX_LLOYD_ITERATIONS {
        let mut changed = false;
        inertia = 0.0;
        for (label, x) in labels.iter_mut().zip(data.outer_iter()) {
            let (best, d) = nearest(x, &centers);
            changed |= *label != best;
            *label = best;
            inertia += d;
        }
        if !changed {
            break;
        }
        let mut sums = Array2::<f64>::zeros((k, dim));
        let mut counts = vec![0_usize; k];
        for (&label, x) in labels.iter().zip(data.outer_iter()) {
            let mut row = sums.row_mut(label);
            row += &x;
            counts[label] += 1;
        }
        for (j, &count) in counts.iter().enumerate() {
            if count > 0 {
                let mean = sums.row(j).mapv(|s| s / count as f64);
                centers.row_mut(j).assign(&mean);
            } else {
                // Re-seed an empty cluster at the point farthest from its center.
                let far = labels
                    .iter()
                    .zip(data.outer_iter())
                    .map(|(&l, x)| squared_distance(x, centers.row(l)))
                    .enumerate()
                    .min_by(|a, b| b.1.total_cmp(&a.1))
                    .map_or(0, |(i, _)| i);
                centers.row_mut(j).assign(&data.row(far));
                labels[far] = j;
            }
        }
    }
    (labels, inertia)
}

/// Cluster the rows of `data` into `k` groups.
/// Runs `starts` seeded starts and keeps the first one with the lowest
/// inertia. Every returned group is non-empty when `data` has at least `k`
/// distinct rows.
pub(crate) fn kmeans<R: Rng + ?Sized>(
    data: ArrayView2<'_, f64>,
    k: usize,
    starts: usize,
    rng: &mut R,
) -> Vec<usize> {
    let n = data.nrows();
    if k <= 1 || n <= k {
        return (0..n).map(|i| i.min(k.saturating_sub(1))).collect();
    }
    let mut best: Option<(Vec<usize>, f64)> = None;
    for _ in 0..starts.max(1) {
        let (labels, inertia) = lloyd(data, k, rng);
        if best.as_ref().map_or(true, |(_, b)| inertia < *b) {
            best = Some((labels, inertia));
        }
    }
    best.map(|(labels, _)| labels).unwrap_or_default()
}

/// Groups of row indices per label.
pub(crate) fn groups_of(labels: &[usize], k: usize) -> Vec<Vec<usize>> {
    let mut groups = vec![Vec::new(); k];
    for (i, &label) in labels.iter().enumerate() {
        groups[label].push(i);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_distr::Normal;
    use rand_xoshiro::Xoshiro256StarStar;

    #[test]
    fn test_kmeans_separates_blobs() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(239);
        let means = [(0.0, 0.0), (5.0, 5.0), (-5.0, 5.0)];
        let per = 40;
        let mut data = Array2::<f64>::zeros((means.len() * per, 2));
        for (k, &(mx, my)) in means.iter().enumerate() {
            let nx = Normal::new(mx, 0.5).unwrap();
            let ny = Normal::new(my, 0.5).unwrap();
            for i in 0..per {
                data[[k * per + i, 0]] = nx.sample(&mut rng);
                data[[k * per + i, 1]] = ny.sample(&mut rng);
            }
        }
        let labels = kmeans(data.view(), 3, KMEANS_STARTS, &mut rng);
        for chunk in labels.chunks(per) {
            assert!(chunk.iter().all(|&l| l == chunk[0]));
        }
        let mut firsts: Vec<usize> = labels.chunks(per).map(|c| c[0]).collect();
        firsts.sort();
        assert_eq!(firsts, vec![0, 1, 2]);
    }

    #[test]
    fn test_kmeans_is_seeded() {
        let data = ndarray::array![[0.0], [0.1], [3.0], [3.2], [7.0], [7.1]];
        let run = |seed| {
            let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
            kmeans(data.view(), 3, KMEANS_STARTS, &mut rng)
        };
        assert_eq!(run(5), run(5));
        let groups = groups_of(&run(5), 3);
        assert!(groups.iter().all(|g| g.len() == 2));
    }

    #[test]
    fn test_kmeans_few_points() {
        let data = ndarray::array![[0.0], [1.0]];
        let mut rng = Xoshiro256StarStar::seed_from_u64(0);
        assert_eq!(kmeans(data.view(), 2, KMEANS_STARTS, &mut rng), vec![0, 1]);
    }
}
