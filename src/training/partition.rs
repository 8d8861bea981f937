//! Cross-validation partitions: seeded k-fold and holdout splits.

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::{validate_level, AnalysisError, Diagnostics, WarningKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMethod {
    #[default]
    KFold,
    Holdout,
}

impl fmt::Display for ValidationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMethod::KFold => f.write_str("kfold"),
            ValidationMethod::Holdout => f.write_str("holdout"),
        }
    }
}

impl FromStr for ValidationMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kfold" | "k-fold" => Ok(ValidationMethod::KFold),
            "holdout" => Ok(ValidationMethod::Holdout),
            other => Err(AnalysisError::ArgumentError(format!(
                "unknown validation method '{}'",
                other
            ))),
        }
    }
}

/// Held-out row sets over `n` rows; fold `i` trains on the complement of
/// `test_sets[i]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub method: ValidationMethod,
    pub n: usize,
    pub test_sets: Vec<Vec<usize>>,
}

impl Partition {
    /// Build the partition for `n` rows, adjusting out-of-range parameters
    /// with a warning
    ///
    /// k-fold clamps `k` to `[2, n]`. Holdout requires a fraction in (0, 1)
    /// and keeps at least one row on each side.
    pub fn build(
        method: ValidationMethod,
        param: f64,
        n: usize,
        rng: &mut ChaCha8Rng,
        diag: &mut Diagnostics,
    ) -> Result<Self, AnalysisError> {
        if n < 2 {
            return Err(AnalysisError::ArgumentError(format!(
                "need at least 2 rows to partition, got {}",
                n
            )));
        }

        match method {
            ValidationMethod::KFold => {
                let requested = if param.is_finite() && param >= 0.0 {
                    param.round() as usize
                } else {
                    0
                };
                let k = requested.clamp(2, n);
                if k != requested {
                    diag.warn(
                        WarningKind::ValidationAdjusted,
                        format!("k-fold k={} adjusted to {} for {} rows", requested, k, n),
                    );
                }
                Ok(Self::kfold(n, k, rng))
            }
            ValidationMethod::Holdout => {
                validate_level("holdout fraction", param)?;
                Ok(Self::holdout(n, param, rng))
            }
        }
    }

    pub fn kfold(n: usize, k: usize, rng: &mut ChaCha8Rng) -> Self {
        Partition {
            method: ValidationMethod::KFold,
            n,
            test_sets: kfold_test_sets(n, k, rng),
        }
    }

    /// Single split holding out `round(fraction * n)` rows, at least one and
    /// at most `n - 1`
    pub fn holdout(n: usize, fraction: f64, rng: &mut ChaCha8Rng) -> Self {
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);
        let size = ((n as f64 * fraction).round() as usize).clamp(1, n.saturating_sub(1).max(1));
        let mut test = order[..size].to_vec();
        test.sort_unstable();
        Partition {
            method: ValidationMethod::Holdout,
            n,
            test_sets: vec![test],
        }
    }

    pub fn num_folds(&self) -> usize {
        self.test_sets.len()
    }

    /// `(train, test)` row indices for one fold
    pub fn split(&self, fold: usize) -> (Vec<usize>, Vec<usize>) {
        let test = self.test_sets.get(fold).cloned().unwrap_or_default();
        (complement(self.n, &test), test)
    }
}

/// Shuffled k-fold assignment; fold sizes differ by at most one
pub fn kfold_test_sets(n: usize, k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<usize>> {
    let k = k.clamp(1, n.max(1));
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);

    let mut folds = vec![Vec::with_capacity(n / k + 1); k];
    for (pos, idx) in order.into_iter().enumerate() {
        folds[pos % k].push(idx);
    }
    for fold in folds.iter_mut() {
        fold.sort_unstable();
    }
    folds
}

/// Rows of `0..n` not listed in `held_out`
pub fn complement(n: usize, held_out: &[usize]) -> Vec<usize> {
    let mut mask = vec![true; n];
    for &i in held_out {
        if let Some(m) = mask.get_mut(i) {
            *m = false;
        }
    }
    (0..n).filter(|&i| mask[i]).collect()
}
