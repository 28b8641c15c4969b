//! CART regression tree shared by the boosting and forest families.

use rand::rngs::StdRng;
use rand::seq::index::sample;

const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn at random per split; `None` considers all of them.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree {
    root: Node,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Fits a tree on the rows of `x` listed in `samples` (repeats allowed).
    ///
    /// `x` and `y` must have the same length. Splits minimise the summed squared error
    /// of the two children; leaves predict the mean of their targets.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        samples: &[usize],
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let mut samples = samples.to_vec();
        let root = grow(x, y, &mut samples, 0, n_features, params, rng);
        Self { root }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    node = if value <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn depth_of(node: &Node) -> usize {
            match node {
                Node::Leaf(_) => 0,
                Node::Split { left, right, .. } => 1 + depth_of(left).max(depth_of(right)),
            }
        }
        depth_of(&self.root)
    }
}

fn mean_of(y: &[f64], samples: &[usize]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&i| y[i]).sum::<f64>() / samples.len() as f64
}

fn grow(
    x: &[Vec<f64>],
    y: &[f64],
    samples: &mut [usize],
    depth: usize,
    n_features: usize,
    params: &TreeParams,
    rng: &mut StdRng,
) -> Node {
    let leaf = Node::Leaf(mean_of(y, samples));
    if depth >= params.max_depth
        || samples.len() < params.min_samples_split.max(2)
        || samples.len() < 2 * params.min_samples_leaf.max(1)
        || n_features == 0
    {
        return leaf;
    }

    let candidates: Vec<usize> = match params.max_features {
        Some(k) if k < n_features => sample(rng, n_features, k.max(1)).into_vec(),
        _ => (0..n_features).collect(),
    };

    let Some(best) = best_split(x, y, samples, &candidates, params.min_samples_leaf.max(1)) else {
        return leaf;
    };

    // Partition in place: left side holds values <= threshold.
    samples.sort_by(|&a, &b| x[a][best.feature].total_cmp(&x[b][best.feature]));
    let cut = samples.partition_point(|&i| x[i][best.feature] <= best.threshold);
    let (left_samples, right_samples) = samples.split_at_mut(cut);

    let left = grow(x, y, left_samples, depth + 1, n_features, params, rng);
    let right = grow(x, y, right_samples, depth + 1, n_features, params, rng);
    Node::Split {
        feature: best.feature,
        threshold: best.threshold,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn best_split(
    x: &[Vec<f64>],
    y: &[f64],
    samples: &[usize],
    candidates: &[usize],
    min_leaf: usize,
) -> Option<BestSplit> {
    let n = samples.len();
    let total_sum: f64 = samples.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = samples.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total_sum * total_sum / n as f64;

    let mut best: Option<BestSplit> = None;
    let mut order: Vec<usize> = samples.to_vec();
    for &feature in candidates {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for position in 0..n - 1 {
            let yi = y[order[position]];
            left_sum += yi;
            left_sq += yi * yi;

            let left_n = position + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }
            let here = x[order[position]][feature];
            let next = x[order[position + 1]][feature];
            if next <= here {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n as f64)
                + (right_sq - right_sum * right_sum / right_n as f64);
            let gain = parent_sse - sse;
            if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(BestSplit {
                    feature,
                    threshold: (here + next) / 2.0,
                    gain,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params(max_depth: usize) -> TreeParams {
        TreeParams {
            max_depth,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }

    #[test]
    fn test_learns_step_function() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 0.0]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();
        let samples: Vec<usize> = (0..20).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let tree = RegressionTree::fit(&x, &y, &samples, &params(3), &mut rng);
        assert_eq!(tree.predict(&[3.0, 0.0]), 1.0);
        assert_eq!(tree.predict(&[15.0, 0.0]), 5.0);
        assert_eq!(tree.depth(), 1, "one split separates the step perfectly");
    }

    #[test]
    fn test_constant_target_is_a_leaf() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y = vec![2.5; 10];
        let samples: Vec<usize> = (0..10).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let tree = RegressionTree::fit(&x, &y, &samples, &params(5), &mut rng);
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.predict(&[100.0]), 2.5);
    }

    #[test]
    fn test_depth_and_leaf_limits() {
        let x: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..64).map(|i| (i * i) as f64).collect();
        let samples: Vec<usize> = (0..64).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let tree = RegressionTree::fit(&x, &y, &samples, &params(2), &mut rng);
        assert!(tree.depth() <= 2);

        let strict = TreeParams {
            min_samples_leaf: 40,
            ..params(10)
        };
        let tree = RegressionTree::fit(&x, &y, &samples, &strict, &mut rng);
        assert_eq!(tree.depth(), 0, "no split can leave 40 samples on both sides");
    }
}
