//! Gradient-boosted regression trees.
//!
//! Squared-error boosting with leaf-wise (best-first) tree growth bounded by a
//! leaf count, per-tree feature subsampling and early stopping on a held-out
//! partition. Shrinkage is folded into the stored leaf values, so a forest
//! predicts `base_score + sum(tree(x))`.

use crate::config::RegressionParams;
use crate::error::{PitError, Result};
use ndarray::Array2;
use rand::{rngs::StdRng, seq::index, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const MIN_GAIN: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Rows with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn leaf_value(&self, feature: impl Fn(usize) -> f64) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature: f,
                    threshold,
                    left,
                    right,
                } => idx = if feature(*f) <= *threshold { *left } else { *right },
            }
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.leaf_value(|f| row[f])
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    pub base_score: f64,
    pub num_features: usize,
    pub trees: Vec<Tree>,
}

impl Forest {
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    fn predict_matrix_row(&self, x: &Array2<f64>, i: usize) -> f64 {
        self.base_score
            + self
                .trees
                .iter()
                .map(|t| t.leaf_value(|f| x[[i, f]]))
                .sum::<f64>()
    }

    pub fn predict_all(&self, x: &Array2<f64>) -> Vec<f64> {
        (0..x.nrows()).map(|i| self.predict_matrix_row(x, i)).collect()
    }

    /// Number of splits using each feature across the ensemble.
    pub fn split_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_features];
        for tree in &self.trees {
            for node in &tree.nodes {
                if let Node::Split { feature, .. } = node {
                    if let Some(c) = counts.get_mut(*feature) {
                        *c += 1;
                    }
                }
            }
        }
        counts
    }
}

#[derive(Debug, Clone)]
pub struct FitReport {
    /// Rounds kept in the returned forest.
    pub best_rounds: usize,
    pub rounds_run: usize,
    pub best_valid_rmse: f64,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct OpenLeaf {
    node: usize,
    rows: Vec<usize>,
    split: Option<SplitCandidate>,
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    grad: &'a [f64],
    features: &'a [usize],
    min_leaf: usize,
}

impl TreeBuilder<'_> {
    fn best_split(&self, rows: &[usize]) -> Option<SplitCandidate> {
        let n = rows.len();
        if n < 2 * self.min_leaf {
            return None;
        }
        let total: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let parent = total * total / n as f64;

        let mut best: Option<SplitCandidate> = None;
        let mut sorted = rows.to_vec();
        for &f in self.features {
            sorted.sort_by(|&a, &b| self.x[[a, f]].total_cmp(&self.x[[b, f]]));
            let mut left_sum = 0.0;
            for i in 1..n {
                left_sum += self.grad[sorted[i - 1]];
                if i < self.min_leaf || n - i < self.min_leaf {
                    continue;
                }
                let lo = self.x[[sorted[i - 1], f]];
                let hi = self.x[[sorted[i], f]];
                if lo >= hi {
                    continue;
                }
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / i as f64
                    + right_sum * right_sum / (n - i) as f64
                    - parent;
                if gain > MIN_GAIN && best.map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature: f,
                        threshold: lo + (hi - lo) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }

    fn grow(&self, num_leaves: usize, learning_rate: f64) -> Tree {
        let all_rows: Vec<usize> = (0..self.x.nrows()).collect();
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut open = vec![OpenLeaf {
            split: self.best_split(&all_rows),
            node: 0,
            rows: all_rows,
        }];
        let mut closed: Vec<OpenLeaf> = Vec::new();

        while open.len() + closed.len() < num_leaves {
            let pick = open
                .iter()
                .enumerate()
                .filter_map(|(i, l)| l.split.map(|s| (i, s.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i);
            let Some(i) = pick else { break };
            let leaf = open.swap_remove(i);
            let Some(split) = leaf.split else {
                closed.push(leaf);
                continue;
            };

            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = leaf
                .rows
                .iter()
                .partition(|&&r| self.x[[r, split.feature]] <= split.threshold);

            let left = nodes.len();
            nodes.push(Node::Leaf { value: 0.0 });
            let right = nodes.len();
            nodes.push(Node::Leaf { value: 0.0 });
            nodes[leaf.node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            open.push(OpenLeaf {
                split: self.best_split(&left_rows),
                node: left,
                rows: left_rows,
            });
            open.push(OpenLeaf {
                split: self.best_split(&right_rows),
                node: right,
                rows: right_rows,
            });
        }

        for leaf in open.into_iter().chain(closed) {
            let mean = if leaf.rows.is_empty() {
                0.0
            } else {
                leaf.rows.iter().map(|&r| self.grad[r]).sum::<f64>() / leaf.rows.len() as f64
            };
            nodes[leaf.node] = Node::Leaf {
                value: learning_rate * mean,
            };
        }
        Tree { nodes }
    }
}

fn rmse(pred: &[f64], y: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let sse: f64 = pred.iter().zip(y).map(|(p, t)| (p - t).powi(2)).sum();
    (sse / y.len() as f64).sqrt()
}

/// Fits a forest on the training partition, stopping once the validation
/// RMSE has not improved for `early_stopping_rounds` rounds. When the
/// validation partition is empty the training loss is monitored instead.
pub fn fit(
    x_train: &Array2<f64>,
    y_train: &[f64],
    x_valid: &Array2<f64>,
    y_valid: &[f64],
    params: &RegressionParams,
) -> Result<(Forest, FitReport)> {
    let n = x_train.nrows();
    let m = x_train.ncols();
    if n == 0 || m == 0 || n != y_train.len() {
        return Err(PitError::Regression(format!(
            "training matrix is {n}x{m} for {} labels",
            y_train.len()
        )));
    }
    if x_valid.nrows() != y_valid.len() || (x_valid.nrows() > 0 && x_valid.ncols() != m) {
        return Err(PitError::Regression("validation partition shape mismatch".into()));
    }

    let base_score = y_train.iter().sum::<f64>() / n as f64;
    let mut forest = Forest {
        base_score,
        num_features: m,
        trees: Vec::with_capacity(params.num_trees),
    };

    let mut rng = StdRng::seed_from_u64(params.seed);
    let per_tree = ((params.feature_fraction.clamp(0.0, 1.0) * m as f64).ceil() as usize).clamp(1, m);
    let min_leaf = params.min_samples_leaf.max(1);
    let num_leaves = params.num_leaves.max(2);

    let mut train_pred = vec![base_score; n];
    let mut valid_pred = vec![base_score; y_valid.len()];
    let monitor_train = y_valid.is_empty();

    let mut best_loss = if monitor_train {
        rmse(&train_pred, y_train)
    } else {
        rmse(&valid_pred, y_valid)
    };
    let mut best_rounds = 0;
    let mut rounds_run = 0;

    for round in 0..params.num_trees {
        let grad: Vec<f64> = y_train.iter().zip(&train_pred).map(|(y, p)| y - p).collect();
        let mut features = index::sample(&mut rng, m, per_tree).into_vec();
        features.sort_unstable();

        let builder = TreeBuilder {
            x: x_train,
            grad: &grad,
            features: &features,
            min_leaf,
        };
        let tree = builder.grow(num_leaves, params.learning_rate);

        for (i, p) in train_pred.iter_mut().enumerate() {
            *p += tree.leaf_value(|f| x_train[[i, f]]);
        }
        for (i, p) in valid_pred.iter_mut().enumerate() {
            *p += tree.leaf_value(|f| x_valid[[i, f]]);
        }
        forest.trees.push(tree);
        rounds_run = round + 1;

        let loss = if monitor_train {
            rmse(&train_pred, y_train)
        } else {
            rmse(&valid_pred, y_valid)
        };
        debug!(round = rounds_run, loss, "boosting round");

        if loss < best_loss - 1e-12 {
            best_loss = loss;
            best_rounds = rounds_run;
        } else if rounds_run - best_rounds >= params.early_stopping_rounds.max(1) {
            info!(round = rounds_run, best_rounds, "early stopping");
            break;
        }
    }

    forest.trees.truncate(best_rounds);
    Ok((
        forest,
        FitReport {
            best_rounds,
            rounds_run,
            best_valid_rmse: best_loss,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RegressionParams {
        RegressionParams {
            num_trees: 200,
            learning_rate: 0.1,
            num_leaves: 8,
            min_samples_leaf: 2,
            feature_fraction: 1.0,
            early_stopping_rounds: 10,
            validation_fraction: 0.2,
            seed: 7,
        }
    }

    fn step_data(n: usize) -> (Array2<f64>, Vec<f64>) {
        let mut x = Vec::with_capacity(n * 2);
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let a = i as f64;
            let b = (i % 7) as f64;
            x.push(a);
            x.push(b);
            y.push(if a < n as f64 / 2.0 { 10.0 } else { 30.0 } + b);
        }
        (Array2::from_shape_vec((n, 2), x).unwrap(), y)
    }

    #[test]
    fn learns_a_step_function() {
        let (x, y) = step_data(200);
        let empty = Array2::zeros((0, 2));
        let (forest, report) = fit(&x, &y, &empty, &[], &params()).unwrap();
        assert!(report.best_rounds > 0);
        assert!(report.best_valid_rmse < 1.0, "rmse {}", report.best_valid_rmse);
        assert!((forest.predict(&[10.0, 3.0]) - 13.0).abs() < 1.5);
        assert!((forest.predict(&[190.0, 3.0]) - 33.0).abs() < 1.5);
        assert!(forest.split_counts()[0] > 0);
    }

    #[test]
    fn respects_leaf_budget() {
        let (x, y) = step_data(120);
        let empty = Array2::zeros((0, 2));
        let (forest, _) = fit(&x, &y, &empty, &[], &params()).unwrap();
        assert!(forest.trees.iter().all(|t| t.num_leaves() <= 8));
    }

    #[test]
    fn constant_target_yields_no_trees() {
        let x = Array2::from_shape_vec((10, 1), (0..10).map(f64::from).collect()).unwrap();
        let y = vec![4.0; 10];
        let (forest, report) = fit(&x, &y, &x, &y, &params()).unwrap();
        assert_eq!(report.best_rounds, 0);
        assert!(forest.trees.is_empty());
        assert_eq!(forest.predict(&[3.0]), 4.0);
    }

    #[test]
    fn stops_early_when_validation_stalls() {
        let (x, y) = step_data(200);
        // validation labels unrelated to the features: loss cannot keep improving
        let xv = Array2::from_shape_vec((4, 2), vec![0.0, 0.0, 199.0, 6.0, 50.0, 1.0, 150.0, 2.0]).unwrap();
        let yv = vec![20.0, 20.0, 20.0, 20.0];
        let (forest, report) = fit(&x, &y, &xv, &yv, &params()).unwrap();
        assert!(report.rounds_run < 200);
        assert_eq!(forest.trees.len(), report.best_rounds);
    }

    #[test]
    fn empty_training_set_is_an_error() {
        let x = Array2::zeros((0, 3));
        assert!(fit(&x, &[], &x, &[], &params()).is_err());
    }

    #[test]
    fn forest_serde_preserves_predictions() {
        let (x, y) = step_data(60);
        let empty = Array2::zeros((0, 2));
        let (forest, _) = fit(&x, &y, &empty, &[], &params()).unwrap();
        let json = serde_json::to_string(&forest).unwrap();
        let back: Forest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trees.len(), forest.trees.len());
        assert!((back.predict(&[5.0, 1.0]) - forest.predict(&[5.0, 1.0])).abs() < 1e-9);
    }
}
