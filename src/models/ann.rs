use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{validate_training_data, FittedModel, ModelType, Regressor, TuneContext};
use crate::utils::AnalysisError;

const LEARNING_RATE: f64 = 0.01;
const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;
const L2: f64 = 1e-4;
const MAX_EPOCHS: usize = 2000;
/// Epochs without validation improvement before stopping
const PATIENCE: usize = 50;
const MAX_WIDTH: usize = 20;
/// Rows needed before a validation slice is split off
const MIN_ROWS_FOR_VALIDATION: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Tanh,
}

impl Activation {
    fn apply(self, z: f64) -> f64 {
        match self {
            Activation::Relu => z.max(0.0),
            Activation::Tanh => z.tanh(),
        }
    }

    /// Derivative expressed through the activated value `a`
    fn derivative(self, a: f64) -> f64 {
        match self {
            Activation::Relu => {
                if a > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => 1.0 - a * a,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnHyper {
    pub hidden: usize,
    pub activation: Activation,
}

/// One-hidden-layer feed-forward regression network
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NeuralNet {
    pub hyper: AnnHyper,
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array1<f64>,
    b2: f64,
    pub epochs: usize,
}

struct Gradients {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array1<f64>,
    b2: f64,
}

/// Adam first/second moment estimates, shaped like the parameters
struct AdamState {
    m: Gradients,
    v: Gradients,
    t: i32,
}

impl Gradients {
    fn zeros(hidden: usize, inputs: usize) -> Self {
        Gradients {
            w1: Array2::zeros((hidden, inputs)),
            b1: Array1::zeros(hidden),
            w2: Array1::zeros(hidden),
            b2: 0.0,
        }
    }
}

impl NeuralNet {
    fn init(inputs: usize, hyper: AnnHyper, rng: &mut ChaCha8Rng) -> Self {
        let hidden = hyper.hidden.max(1);
        let limit1 = (6.0 / (inputs + hidden) as f64).sqrt();
        let limit2 = (6.0 / (hidden + 1) as f64).sqrt();
        NeuralNet {
            hyper,
            w1: Array2::from_shape_fn((hidden, inputs), |_| rng.gen_range(-limit1..limit1)),
            b1: Array1::zeros(hidden),
            w2: Array1::from_shape_fn(hidden, |_| rng.gen_range(-limit2..limit2)),
            b2: 0.0,
            epochs: 0,
        }
    }

    fn hidden_layer(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let activation = self.hyper.activation;
        (x.dot(&self.w1.t()) + &self.b1).mapv(|z| activation.apply(z))
    }

    fn mse(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> f64 {
        let pred = self.predict(x);
        pred.iter().zip(y.iter()).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / y.len().max(1) as f64
    }

    fn gradients(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Gradients {
        let n = x.nrows() as f64;
        let h = self.hidden_layer(x);
        let out = h.dot(&self.w2) + self.b2;
        let d_out = (out - &y) * (2.0 / n);

        let w2 = h.t().dot(&d_out) + &self.w2 * L2;
        let b2 = d_out.sum();

        let activation = self.hyper.activation;
        let d_hidden = Array2::from_shape_fn(h.raw_dim(), |(i, j)| {
            d_out[i] * self.w2[j] * activation.derivative(h[[i, j]])
        });
        let w1 = d_hidden.t().dot(&x) + &self.w1 * L2;
        let b1 = d_hidden.sum_axis(Axis(0));

        Gradients { w1, b1, w2, b2 }
    }

    fn adam_step(&mut self, grad: &Gradients, state: &mut AdamState) {
        state.t += 1;
        let c1 = 1.0 - BETA1.powi(state.t);
        let c2 = 1.0 - BETA2.powi(state.t);
        let step = |p: &mut f64, g: f64, m: &mut f64, v: &mut f64| {
            *m = BETA1 * *m + (1.0 - BETA1) * g;
            *v = BETA2 * *v + (1.0 - BETA2) * g * g;
            *p -= LEARNING_RATE * (*m / c1) / ((*v / c2).sqrt() + ADAM_EPS);
        };

        ndarray::Zip::from(&mut self.w1)
            .and(&grad.w1)
            .and(&mut state.m.w1)
            .and(&mut state.v.w1)
            .for_each(|p, &g, m, v| step(p, g, m, v));
        ndarray::Zip::from(&mut self.b1)
            .and(&grad.b1)
            .and(&mut state.m.b1)
            .and(&mut state.v.b1)
            .for_each(|p, &g, m, v| step(p, g, m, v));
        ndarray::Zip::from(&mut self.w2)
            .and(&grad.w2)
            .and(&mut state.m.w2)
            .and(&mut state.v.w2)
            .for_each(|p, &g, m, v| step(p, g, m, v));
        step(&mut self.b2, grad.b2, &mut state.m.b2, &mut state.v.b2);
    }

    /// Full-batch Adam; with a validation slice, stops after `PATIENCE`
    /// epochs without improvement and restores the best weights
    fn train(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        validation: Option<(ArrayView2<f64>, ArrayView1<f64>)>,
        hyper: AnnHyper,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, AnalysisError> {
        validate_training_data(x, y)?;
        let mut net = NeuralNet::init(x.ncols(), hyper, rng);
        let hidden = net.w2.len();
        let mut state = AdamState {
            m: Gradients::zeros(hidden, x.ncols()),
            v: Gradients::zeros(hidden, x.ncols()),
            t: 0,
        };

        let mut best: Option<(f64, NeuralNet)> = None;
        let mut stale = 0;

        for epoch in 0..MAX_EPOCHS {
            let grad = net.gradients(x, y);
            net.adam_step(&grad, &mut state);
            net.epochs = epoch + 1;

            if let Some((xv, yv)) = validation {
                let loss = net.mse(xv, yv);
                let improved = best.as_ref().map_or(true, |(best_loss, _)| loss < *best_loss);
                if improved {
                    best = Some((loss, net.clone()));
                    stale = 0;
                } else {
                    stale += 1;
                    if stale >= PATIENCE {
                        break;
                    }
                }
            }
        }

        let net = match best {
            Some((_, best_net)) => best_net,
            None => net,
        };

        if !net.b2.is_finite() || net.w2.iter().any(|w| !w.is_finite()) {
            return Err(AnalysisError::ModelError(
                "neural network training diverged".to_string(),
            ));
        }
        debug!(hidden, epochs = net.epochs, "neural network trained");
        Ok(net)
    }
}

/// Shuffle row indices and cut them into consecutive slices of the given
/// fractions; the last slice takes the remainder
fn split_rows(n: usize, fractions: &[f64], rng: &mut ChaCha8Rng) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);

    let mut slices = Vec::with_capacity(fractions.len() + 1);
    let mut start = 0;
    for fraction in fractions {
        let len = ((n as f64 * fraction).round() as usize).max(1).min(n - start);
        slices.push(order[start..start + len].to_vec());
        start += len;
    }
    slices.push(order[start..].to_vec());
    slices
}

impl Regressor for NeuralNet {
    const KIND: ModelType = ModelType::Ann;
    type Hyper = AnnHyper;

    fn default_hyper(_x: ArrayView2<f64>, _y: ArrayView1<f64>) -> AnnHyper {
        AnnHyper {
            hidden: 10,
            activation: Activation::Tanh,
        }
    }

    /// Search width and activation on a fixed 70/15/15 train/validation/test
    /// split, scoring each candidate by its test-slice MSE
    fn tune(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        ctx: &mut TuneContext,
    ) -> Result<AnnHyper, AnalysisError> {
        let n = x.nrows();
        let default = Self::default_hyper(x, y);
        if n < MIN_ROWS_FOR_VALIDATION {
            return Ok(default);
        }

        let slices = split_rows(n, &[0.70, 0.15], &mut ctx.rng);
        if slices.iter().any(|s| s.is_empty()) {
            return Ok(default);
        }
        let (xtr, ytr) = (x.select(Axis(0), &slices[0]), y.select(Axis(0), &slices[0]));
        let (xv, yv) = (x.select(Axis(0), &slices[1]), y.select(Axis(0), &slices[1]));
        let (xte, yte) = (x.select(Axis(0), &slices[2]), y.select(Axis(0), &slices[2]));

        let mut candidates: Vec<AnnHyper> = (1..=MAX_WIDTH)
            .flat_map(|hidden| {
                [Activation::Relu, Activation::Tanh]
                    .into_iter()
                    .map(move |activation| AnnHyper { hidden, activation })
            })
            .collect();
        candidates.shuffle(&mut ctx.rng);
        candidates.truncate(ctx.evaluations.max(1));

        let mut best = (f64::INFINITY, default);
        for candidate in candidates {
            ctx.cancel.check("hyperparameter search")?;
            let net = match NeuralNet::train(
                xtr.view(),
                ytr.view(),
                Some((xv.view(), yv.view())),
                candidate,
                &mut ctx.rng,
            ) {
                Ok(net) => net,
                Err(_) => continue,
            };
            let loss = net.mse(xte.view(), yte.view());
            if loss < best.0 {
                best = (loss, candidate);
            }
        }

        Ok(best.1)
    }

    fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        hyper: &AnnHyper,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, AnalysisError> {
        validate_training_data(x, y)?;
        let n = x.nrows();
        if n < MIN_ROWS_FOR_VALIDATION {
            return NeuralNet::train(x, y, None, *hyper, rng);
        }

        let slices = split_rows(n, &[0.85], rng);
        let (xtr, ytr) = (x.select(Axis(0), &slices[0]), y.select(Axis(0), &slices[0]));
        let (xv, yv) = (x.select(Axis(0), &slices[1]), y.select(Axis(0), &slices[1]));
        NeuralNet::train(xtr.view(), ytr.view(), Some((xv.view(), yv.view())), *hyper, rng)
    }

    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.hidden_layer(x).dot(&self.w2) + self.b2
    }

    fn into_fitted(self) -> FittedModel {
        FittedModel::Ann(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::CancellationToken;
    use rand::SeedableRng;

    fn sine_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 1), |(i, _)| -2.0 + 4.0 * i as f64 / (n - 1) as f64);
        let y = x.column(0).mapv(|v| v.sin());
        (x, y)
    }

    #[test]
    fn test_learns_smooth_function() {
        let (x, y) = sine_data(40);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let hyper = AnnHyper {
            hidden: 10,
            activation: Activation::Tanh,
        };
        let net = NeuralNet::train(x.view(), y.view(), None, hyper, &mut rng).unwrap();
        assert!(net.mse(x.view(), y.view()) < 0.02);
        assert_eq!(net.epochs, MAX_EPOCHS);
    }

    #[test]
    fn test_same_seed_same_network() {
        let (x, y) = sine_data(20);
        let hyper = AnnHyper {
            hidden: 4,
            activation: Activation::Relu,
        };
        let a = NeuralNet::fit(x.view(), y.view(), &hyper, &mut ChaCha8Rng::seed_from_u64(2)).unwrap();
        let b = NeuralNet::fit(x.view(), y.view(), &hyper, &mut ChaCha8Rng::seed_from_u64(2)).unwrap();
        assert_eq!(a.predict(x.view()), b.predict(x.view()));
    }

    #[test]
    fn test_split_rows_partitions_everything() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let slices = split_rows(20, &[0.70, 0.15], &mut rng);
        assert_eq!(slices[0].len(), 14);
        assert_eq!(slices[1].len(), 3);
        assert_eq!(slices[2].len(), 3);
        let mut all: Vec<usize> = slices.concat();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_tune_picks_valid_width() {
        let (x, y) = sine_data(30);
        let mut ctx = TuneContext::new(ChaCha8Rng::seed_from_u64(9), 3, CancellationToken::new());
        let hyper = NeuralNet::tune(x.view(), y.view(), &mut ctx).unwrap();
        assert!((1..=MAX_WIDTH).contains(&hyper.hidden));
    }

    #[test]
    fn test_small_sample_trains_without_validation() {
        let (x, y) = sine_data(5);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let net = NeuralNet::fit(x.view(), y.view(), &NeuralNet::default_hyper(x.view(), y.view()), &mut rng).unwrap();
        assert_eq!(net.predict(x.view()).len(), 5);
    }
}
