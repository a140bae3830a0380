//! Isolation forest over a scaled feature matrix.
//!
//! Each tree is grown on a random subsample of at most `max_samples` rows.
//! Nodes split on a random non-constant feature at a uniform point between
//! the node's min and max, down to `ceil(log2(max_samples))` levels. Trees
//! are stored as flat node arenas so the whole forest serializes as plain
//! data.
//!
//! Anomaly score follows Liu et al.: `s(x) = 2^(-E[h(x)] / c(ψ))`, where
//! `h` is the path length (depth plus `c(leaf_size)` for unresolved leaves)
//! and `ψ` the subsample size. Higher is more anomalous.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_samples: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(data: &Array2<f64>, rows: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(data, rows, 0, height_limit, rng);
        tree
    }

    /// Appends the subtree for `rows` and returns its root index.
    fn grow_node(
        &mut self,
        data: &Array2<f64>,
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });

        if depth >= height_limit || rows.len() <= 1 {
            return idx;
        }

        let candidates: Vec<(usize, f64, f64)> = (0..data.ncols())
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    let v = data[[r, f]];
                    (lo.min(v), hi.max(v))
                });
                (lo < hi).then_some((f, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            return idx;
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[[r, feature]] <= threshold);

        let left = self.grow_node(data, left_rows, depth + 1, height_limit, rng);
        let right = self.grow_node(data, right_rows, depth + 1, height_limit, rng);
        self.nodes[idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }

    fn path_length(&self, x: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Some(Node::Leaf { size }) => return depth + average_path_length(*size),
                None => return depth,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    /// Subsample size actually used, `min(max_samples, n)`.
    sample_size: usize,
    n_features: usize,
}

impl IsolationForest {
    pub fn fit(data: &Array2<f64>, params: &ForestParams) -> Result<Self> {
        let n = data.nrows();
        if n == 0 {
            return Err(AppError::validation("batch", "at least one row", "0 rows"));
        }
        let sample_size = params.max_samples.min(n).max(1);
        let height_limit = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_estimators.max(1))
            .map(|_| {
                let rows = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
                IsolationTree::grow(data, rows, height_limit, &mut rng)
            })
            .collect::<Vec<_>>();

        debug!(
            trees = trees.len(),
            sample_size,
            height_limit,
            "Isolation forest grown"
        );

        Ok(Self {
            trees,
            sample_size,
            n_features: data.ncols(),
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Anomaly score per row in `(0, 1]`; higher means easier to isolate.
    pub fn score_samples(&self, data: &Array2<f64>) -> Result<Vec<f64>> {
        if data.ncols() != self.n_features {
            return Err(AppError::validation(
                "features",
                format!("{} columns", self.n_features),
                format!("{} columns", data.ncols()),
            ));
        }
        let norm = average_path_length(self.sample_size);
        let n_trees = self.trees.len().max(1) as f64;

        Ok(data
            .rows()
            .into_iter()
            .map(|x| {
                if norm <= 0.0 {
                    return 0.5;
                }
                let mean_path: f64 =
                    self.trees.iter().map(|t| t.path_length(x)).sum::<f64>() / n_trees;
                2f64.powf(-mean_path / norm)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params(seed: u64) -> ForestParams {
        ForestParams {
            n_estimators: 100,
            max_samples: 256,
            seed,
        }
    }

    #[test]
    fn average_path_length_known_values() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // 2 * (ln 2 + γ) - 4/3
        let expected = 2.0 * (2f64.ln() + EULER_GAMMA) - 4.0 / 3.0;
        assert!((average_path_length(3) - expected).abs() < 1e-12);
    }

    #[test]
    fn isolated_point_scores_highest() {
        let data = array![
            [0.0, 0.0],
            [0.1, 0.1],
            [0.2, 0.0],
            [0.0, 0.2],
            [0.1, 0.0],
            [0.2, 0.2],
            [10.0, 10.0]
        ];
        let forest = IsolationForest::fit(&data, &params(42)).unwrap();
        let scores = forest.score_samples(&data).unwrap();
        let top = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(top, Some(6));
        assert!(scores.iter().all(|s| *s > 0.0 && *s <= 1.0));
    }

    #[test]
    fn same_seed_same_forest() {
        let data = array![[1.0, 2.0], [2.0, 1.0], [3.0, 5.0], [8.0, 0.5]];
        let a = IsolationForest::fit(&data, &params(7)).unwrap();
        let b = IsolationForest::fit(&data, &params(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.score_samples(&data).unwrap(), b.score_samples(&data).unwrap());
    }

    #[test]
    fn constant_data_yields_leaf_only_trees() {
        let data = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let forest = IsolationForest::fit(&data, &params(1)).unwrap();
        let scores = forest.score_samples(&data).unwrap();
        assert!(scores.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let forest = IsolationForest::fit(&array![[1.0, 2.0], [3.0, 4.0]], &params(1)).unwrap();
        assert!(forest.score_samples(&array![[1.0]]).is_err());
    }
}
