//! Seeded random hyperparameter search scored by inner k-fold MSE.

use ndarray::{ArrayView1, ArrayView2, Axis};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::Regressor;
use crate::training::partition::{complement, kfold_test_sets};
use crate::utils::{AnalysisError, CancellationToken};

pub const INNER_FOLDS: usize = 3;

/// Per-task search state: RNG stream, evaluation budget, cancellation
#[derive(Clone, Debug)]
pub struct TuneContext {
    pub rng: ChaCha8Rng,
    pub evaluations: usize,
    pub cancel: CancellationToken,
}

impl TuneContext {
    pub fn new(rng: ChaCha8Rng, evaluations: usize, cancel: CancellationToken) -> Self {
        Self {
            rng,
            evaluations,
            cancel,
        }
    }
}

/// Evaluate the default plus `evaluations - 1` sampled candidates; keep the
/// lowest inner-CV MSE
///
/// Falls back to the defaults when there are too few rows for the inner
/// folds.
pub fn random_search<R, S>(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    ctx: &mut TuneContext,
    mut sample: S,
) -> Result<R::Hyper, AnalysisError>
where
    R: Regressor,
    S: FnMut(&mut ChaCha8Rng) -> R::Hyper,
{
    let default = R::default_hyper(x, y);
    if x.nrows() < 2 * INNER_FOLDS {
        debug!(family = %R::KIND, rows = x.nrows(), "too few rows to search, using defaults");
        return Ok(default);
    }

    let folds = kfold_test_sets(x.nrows(), INNER_FOLDS, &mut ctx.rng);
    let mut best_loss = cv_loss::<R>(x, y, &default, &folds, &mut ctx.rng);
    let mut best = default;

    for evaluation in 1..ctx.evaluations {
        ctx.cancel.check("hyperparameter search")?;
        let candidate = sample(&mut ctx.rng);
        let loss = cv_loss::<R>(x, y, &candidate, &folds, &mut ctx.rng);
        if loss < best_loss || (!best_loss.is_finite() && loss.is_finite()) {
            debug!(family = %R::KIND, evaluation, loss, "search: new best");
            best_loss = loss;
            best = candidate;
        }
    }

    Ok(best)
}

/// Pooled mean squared error over the given held-out sets
///
/// A candidate that fails to fit on any fold scores infinity.
pub fn cv_loss<R: Regressor>(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    hyper: &R::Hyper,
    folds: &[Vec<usize>],
    rng: &mut ChaCha8Rng,
) -> f64 {
    let mut sse = 0.0;
    let mut count = 0usize;

    for test in folds {
        let train = complement(x.nrows(), test);
        let xtr = x.select(Axis(0), &train);
        let ytr = y.select(Axis(0), &train);
        let model = match R::fit(xtr.view(), ytr.view(), hyper, rng) {
            Ok(model) => model,
            Err(_) => return f64::INFINITY,
        };

        let xte = x.select(Axis(0), test);
        let pred = model.predict(xte.view());
        for (&i, p) in test.iter().zip(pred.iter()) {
            sse += (p - y[i]).powi(2);
            count += 1;
        }
    }

    if count == 0 || !sse.is_finite() {
        return f64::INFINITY;
    }
    sse / count as f64
}

/// Uniform draw on a log10 scale between `10^lo` and `10^hi`
pub fn log_uniform(rng: &mut ChaCha8Rng, lo: f64, hi: f64) -> f64 {
    use rand::Rng;
    10f64.powf(rng.gen_range(lo..hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LinearHyper, LinearModel};
    use ndarray::{arr1, arr2};
    use rand::SeedableRng;

    #[test]
    fn test_log_uniform_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..200 {
            let v = log_uniform(&mut rng, -3.0, 3.0);
            assert!((1e-3..=1e3).contains(&v));
        }
    }

    #[test]
    fn test_cv_loss_zero_for_exact_model() {
        let x = arr2(&[[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]]);
        let y = arr1(&[2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let folds = kfold_test_sets(6, 3, &mut rng);
        let loss = cv_loss::<LinearModel>(x.view(), y.view(), &LinearHyper::default(), &folds, &mut rng);
        assert!(loss < 1e-16);
    }

    #[test]
    fn test_search_with_few_rows_returns_default() {
        let x = arr2(&[[1.0], [2.0], [3.0]]);
        let y = arr1(&[1.0, 2.0, 3.0]);
        let mut ctx = TuneContext::new(ChaCha8Rng::seed_from_u64(0), 10, CancellationToken::new());
        let hyper = random_search::<LinearModel, _>(x.view(), y.view(), &mut ctx, |_| LinearHyper {
            stepwise: true,
        })
        .unwrap();
        assert!(!hyper.stepwise);
    }

    #[test]
    fn test_search_honours_cancellation() {
        let x = arr2(&[[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0]]);
        let y = arr1(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut ctx = TuneContext::new(ChaCha8Rng::seed_from_u64(0), 10, cancel);
        let result = random_search::<LinearModel, _>(x.view(), y.view(), &mut ctx, |_| LinearHyper::default());
        assert!(matches!(result, Err(AnalysisError::Cancelled(_))));
    }
}
