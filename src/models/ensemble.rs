use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::tuning::random_search;
use super::{validate_training_data, FittedModel, ModelType, Regressor, TuneContext};
use crate::utils::AnalysisError;

const LEARNING_RATE: f64 = 0.1;
/// Depth cap for bagged trees
const BAG_MAX_DEPTH: usize = 32;
/// Shallow trees for boosting
const BOOST_MAX_DEPTH: usize = 3;
const MIN_GAIN: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsembleMethod {
    Bag,
    Boosted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleHyper {
    pub method: EnsembleMethod,
    pub learners: usize,
    pub min_leaf: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// CART regression tree stored as a flat node list, root at index 0
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct TreeBuilder<'x, 'y> {
    x: ArrayView2<'x, f64>,
    y: &'y [f64],
    min_leaf: usize,
    max_depth: usize,
    nodes: Vec<Node>,
    /// Total squared-error reduction credited to each feature
    gains: Vec<f64>,
}

impl TreeBuilder<'_, '_> {
    fn grow(&mut self, rows: &[usize], depth: usize) -> usize {
        let n = rows.len();
        let mean = rows.iter().map(|&i| self.y[i]).sum::<f64>() / n.max(1) as f64;
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= self.max_depth || n < 2 * self.min_leaf {
            return id;
        }

        let Some((feature, threshold, gain)) = self.best_split(rows) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().copied().partition(|&i| self.x[[i, feature]] <= threshold);
        self.gains[feature] += gain;

        let left = self.grow(&left_rows, depth + 1);
        let right = self.grow(&right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    /// Best (feature, threshold, SSE reduction) over all columns
    fn best_split(&self, rows: &[usize]) -> Option<(usize, f64, f64)> {
        let n = rows.len();
        let total: f64 = rows.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = rows.iter().map(|&i| self.y[i] * self.y[i]).sum();
        let parent_sse = total_sq - total * total / n as f64;

        let mut best: Option<(usize, f64, f64)> = None;
        let mut sorted = rows.to_vec();

        for feature in 0..self.x.ncols() {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 0..n - 1 {
                let yi = self.y[sorted[pos]];
                left_sum += yi;
                left_sq += yi * yi;

                let left_n = pos + 1;
                let right_n = n - left_n;
                if left_n < self.min_leaf || right_n < self.min_leaf {
                    continue;
                }
                let here = self.x[[sorted[pos], feature]];
                let next = self.x[[sorted[pos + 1], feature]];
                if here == next {
                    continue;
                }

                let right_sum = total - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / left_n as f64)
                    + (right_sq - right_sum * right_sum / right_n as f64);
                let gain = parent_sse - sse;

                if gain > MIN_GAIN && best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((feature, (here + next) / 2.0, gain));
                }
            }
        }

        best
    }
}

impl RegressionTree {
    fn fit(
        x: ArrayView2<f64>,
        y: &[f64],
        rows: &[usize],
        min_leaf: usize,
        max_depth: usize,
        gains: &mut [f64],
    ) -> Self {
        let n_features = x.ncols();
        let mut builder = TreeBuilder {
            x: x.view(),
            y,
            min_leaf: min_leaf.max(1),
            max_depth,
            nodes: Vec::new(),
            gains: vec![0.0; n_features],
        };
        builder.grow(rows, 0);
        for (total, g) in gains.iter_mut().zip(builder.gains.iter()) {
            *total += g;
        }
        RegressionTree {
            nodes: builder.nodes,
        }
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes.get(id) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                }
                None => return f64::NAN,
            }
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }
}

/// Bagged or least-squares boosted regression trees
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub hyper: EnsembleHyper,
    trees: Vec<RegressionTree>,
    /// Starting prediction for boosting (target mean)
    base: f64,
    /// Impurity reduction accumulated per feature over all trees
    gains: Vec<f64>,
}

impl TreeEnsemble {
    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}

impl Regressor for TreeEnsemble {
    const KIND: ModelType = ModelType::Ensemble;
    type Hyper = EnsembleHyper;

    fn default_hyper(_x: ArrayView2<f64>, _y: ArrayView1<f64>) -> EnsembleHyper {
        EnsembleHyper {
            method: EnsembleMethod::Bag,
            learners: 100,
            min_leaf: 5,
        }
    }

    fn tune(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        ctx: &mut TuneContext,
    ) -> Result<EnsembleHyper, AnalysisError> {
        random_search::<Self, _>(x, y, ctx, |rng| EnsembleHyper {
            method: if rng.gen_bool(0.5) {
                EnsembleMethod::Bag
            } else {
                EnsembleMethod::Boosted
            },
            learners: rng.gen_range(10..=100),
            min_leaf: rng.gen_range(1..=20),
        })
    }

    fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        hyper: &EnsembleHyper,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, AnalysisError> {
        validate_training_data(x, y)?;
        if hyper.learners == 0 {
            return Err(AnalysisError::ModelError(
                "ensemble needs at least one learner".to_string(),
            ));
        }

        let n = x.nrows();
        let target = y.to_vec();
        let mut gains = vec![0.0; x.ncols()];
        let mut trees = Vec::with_capacity(hyper.learners);
        let base = target.iter().sum::<f64>() / n as f64;

        match hyper.method {
            EnsembleMethod::Bag => {
                for _ in 0..hyper.learners {
                    let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                    trees.push(RegressionTree::fit(
                        x,
                        &target,
                        &rows,
                        hyper.min_leaf,
                        BAG_MAX_DEPTH,
                        &mut gains,
                    ));
                }
            }
            EnsembleMethod::Boosted => {
                let rows: Vec<usize> = (0..n).collect();
                let mut fitted = vec![base; n];
                for _ in 0..hyper.learners {
                    let residuals: Vec<f64> =
                        target.iter().zip(fitted.iter()).map(|(t, f)| t - f).collect();
                    let tree = RegressionTree::fit(
                        x,
                        &residuals,
                        &rows,
                        hyper.min_leaf,
                        BOOST_MAX_DEPTH,
                        &mut gains,
                    );
                    for (i, f) in fitted.iter_mut().enumerate() {
                        *f += LEARNING_RATE * tree.predict_row(x.row(i));
                    }
                    trees.push(tree);
                }
            }
        }

        Ok(TreeEnsemble {
            hyper: *hyper,
            trees,
            base,
            gains,
        })
    }

    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let count = self.trees.len().max(1) as f64;
        x.rows()
            .into_iter()
            .map(|row| {
                let sum: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
                match self.hyper.method {
                    EnsembleMethod::Bag => sum / count,
                    EnsembleMethod::Boosted => self.base + LEARNING_RATE * sum,
                }
            })
            .collect()
    }

    fn importance(&self, _x: ArrayView2<f64>, _y: ArrayView1<f64>) -> Vec<f64> {
        self.gains.clone()
    }

    fn into_fitted(self) -> FittedModel {
        FittedModel::Ensemble(self)
    }
}
