//! # Expected-Return Ensemble
//!
//! $$
//! \mu^\* = \omega_0\,\mu_{\text{shrink}} + \omega_1\,\hat y_{\text{bag}} + \omega_2\,\hat y_{\text{gbt}},\quad \omega \ge 0,\ \textstyle\sum \omega = 1
//! $$
//!
//! Shrink-to-zero baseline, bagged linear forecasts and boosted trees stacked by
//! non-negative ridge weights calibrated on time-ordered folds.

use std::ops::Range;

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray::concatenate;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::debug;

use super::trees::BoostingConfig;
use super::trees::GradientBoosting;
use crate::error::Error;
use crate::error::Result;
use crate::linalg;
use crate::numeric;
use crate::rng;

/// Minimum history before the learned forecasters are used.
pub const MIN_ENSEMBLE_OBS: usize = 5;

const N_BAGS: usize = 8;
const BAG_FRACTION: f64 = 0.8;
const STACK_ALPHA: f64 = 1.0;

/// Sample mean shrunk toward zero with intensity `min(1, N/T)`.
pub fn shrink_to_zero(returns: ArrayView2<f64>) -> Result<Array1<f64>> {
  let (t, n) = returns.dim();
  if t == 0 || n == 0 {
    return Err(Error::EmptySample("returns for mean shrinkage".into()));
  }
  let intensity = (n as f64 / t as f64).min(1.0);
  let mean = returns
    .mean_axis(Axis(0))
    .ok_or_else(|| Error::EmptySample("returns for mean shrinkage".into()))?;
  Ok(mean * (1.0 - intensity))
}

fn lag_one(x: ArrayView2<f64>) -> Array2<f64> {
  let (t, k) = x.dim();
  Array2::from_shape_fn((t, k), |(i, j)| {
    if i == 0 {
      0.0
    } else {
      let v = x[[i - 1, j]];
      if v.is_finite() { v } else { 0.0 }
    }
  })
}

/// Lagged returns plus lagged macro columns; a constant bias column when both are empty.
pub fn lagged_features(returns: ArrayView2<f64>, macro_features: Option<&Array2<f64>>) -> Array2<f64> {
  let t = returns.nrows();
  let mut blocks = Vec::new();
  if returns.ncols() > 0 {
    blocks.push(lag_one(returns));
  }
  if let Some(m) = macro_features.filter(|m| m.nrows() == t && m.ncols() > 0) {
    blocks.push(lag_one(m.view()));
  }
  if blocks.is_empty() {
    return Array2::zeros((t, 1));
  }
  let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
  concatenate(Axis(1), &views).unwrap_or_else(|_| Array2::zeros((t, 1)))
}

/// Ordinary least squares with intercept, solved through the pseudo-inverse.
#[derive(Clone, Debug)]
pub struct LinearFit {
  pub intercept: f64,
  pub coef: Array1<f64>,
}

impl LinearFit {
  pub fn fit(x: &Array2<f64>, y: &[f64]) -> Result<Self> {
    let (t, k) = x.dim();
    if t == 0 || y.len() != t {
      return Err(Error::shape("linear fit targets", t, y.len()));
    }
    let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(k));
    let y_mean = numeric::mean(y);
    let xc = x - &x_mean;
    let yc = Array1::from_iter(y.iter().map(|v| v - y_mean));
    let gram = xc.t().dot(&xc);
    let coef = linalg::pinv(&gram)?.dot(&xc.t().dot(&yc));
    Ok(Self {
      intercept: y_mean - x_mean.dot(&coef),
      coef,
    })
  }

  pub fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
    (x.dot(&self.coef) + self.intercept).to_vec()
  }
}

fn select_rows(x: &Array2<f64>, rows: &[usize]) -> Array2<f64> {
  x.select(Axis(0), rows)
}

/// Average of linear fits on bootstrap resamples of the training rows.
pub fn bagging_linear_predict<R: Rng>(
  x_train: &Array2<f64>,
  y_train: &[f64],
  x_eval: &Array2<f64>,
  rng: &mut R,
) -> Result<Vec<f64>> {
  let n = y_train.len();
  if n == 0 {
    return Ok(vec![0.0; x_eval.nrows()]);
  }
  let draw = ((BAG_FRACTION * n as f64) as usize).max(1);
  let mut acc = vec![0.0; x_eval.nrows()];
  for _ in 0..N_BAGS {
    let idx: Vec<usize> = (0..draw).map(|_| rng.gen_range(0..n)).collect();
    let xb = select_rows(x_train, &idx);
    let yb: Vec<f64> = idx.iter().map(|&i| y_train[i]).collect();
    let fit = LinearFit::fit(&xb, &yb)?;
    for (a, p) in acc.iter_mut().zip(fit.predict(x_eval)) {
      *a += p;
    }
  }
  Ok(acc.into_iter().map(|a| a / N_BAGS as f64).collect())
}

/// Boosted-tree forecast for `x_eval` trained on `(x_train, y_train)`.
pub fn boosting_predict<R: Rng>(
  x_train: &Array2<f64>,
  y_train: &[f64],
  x_eval: &Array2<f64>,
  rng: &mut R,
) -> Vec<f64> {
  if y_train.is_empty() {
    return vec![0.0; x_eval.nrows()];
  }
  let model = GradientBoosting::fit(x_train.view(), y_train, &BoostingConfig::default(), rng);
  model.predict(x_eval)
}

/// Expanding-window folds: each test block follows all of its training rows.
pub fn time_series_splits(n: usize, n_splits: usize) -> Vec<(Range<usize>, Range<usize>)> {
  if n_splits == 0 || n < n_splits + 1 {
    return Vec::new();
  }
  let test_size = n / (n_splits + 1);
  let first = n - n_splits * test_size;
  (0..n_splits)
    .map(|k| {
      let start = first + k * test_size;
      (0..start, start..start + test_size)
    })
    .collect()
}

/// Non-negative ridge without intercept via cyclic coordinate descent.
pub fn nonneg_ridge(x: &Array2<f64>, y: &[f64], alpha: f64) -> Vec<f64> {
  let k = x.ncols();
  let mut w = vec![0.0; k];
  let mut resid: Vec<f64> = y.to_vec();
  let norms: Vec<f64> = (0..k).map(|j| x.column(j).iter().map(|v| v * v).sum()).collect();
  for _ in 0..1000 {
    let mut max_step = 0.0_f64;
    for j in 0..k {
      let col = x.column(j);
      let rho: f64 = col.iter().zip(&resid).map(|(a, r)| a * r).sum::<f64>() + norms[j] * w[j];
      let updated = (rho / (norms[j] + alpha)).max(0.0);
      let delta = updated - w[j];
      if delta != 0.0 {
        for (r, a) in resid.iter_mut().zip(col.iter()) {
          *r -= a * delta;
        }
      }
      max_step = max_step.max(delta.abs());
      w[j] = updated;
    }
    if max_step < 1e-12 {
      break;
    }
  }
  w
}

/// Stacking weights over base forecasts, normalised to the simplex.
///
/// Falls back to equal weights when the fitted weights sum to (almost) zero.
pub fn stack_weights(base_preds: &[Vec<f64>], target: &[f64]) -> Vec<f64> {
  let k = base_preds.len().max(1);
  if base_preds.is_empty() || target.is_empty() {
    return vec![1.0 / k as f64; k];
  }
  let m = target.len();
  let x = Array2::from_shape_fn((m, base_preds.len()), |(i, j)| {
    base_preds[j].get(i).copied().unwrap_or(0.0)
  });
  let w = nonneg_ridge(&x, target, STACK_ALPHA);
  let total: f64 = w.iter().sum();
  if total <= 1e-12 {
    vec![1.0 / k as f64; k]
  } else {
    w.into_iter().map(|v| v / total).collect()
  }
}

fn asset_forecast(
  features: &Array2<f64>,
  y: &[f64],
  shrink: f64,
  cv_splits: usize,
  rng: &mut StdRng,
) -> Result<f64> {
  let n_obs = y.len();
  if n_obs < MIN_ENSEMBLE_OBS {
    return Ok(shrink);
  }

  let splits = time_series_splits(n_obs, cv_splits.min(n_obs - 1));
  let mut mean_cv = Vec::new();
  let mut bag_cv = Vec::new();
  let mut gbt_cv = Vec::new();
  let mut target_cv = Vec::new();
  if splits.len() >= 2 {
    for (train, test) in &splits {
      let train_rows: Vec<usize> = train.clone().collect();
      let test_rows: Vec<usize> = test.clone().collect();
      let x_train = select_rows(features, &train_rows);
      let x_test = select_rows(features, &test_rows);
      let y_train = &y[train.clone()];
      let mut bag_rng = StdRng::seed_from_u64(rng.gen());
      let mut gbt_rng = StdRng::seed_from_u64(rng.gen());
      bag_cv.extend(bagging_linear_predict(&x_train, y_train, &x_test, &mut bag_rng)?);
      gbt_cv.extend(boosting_predict(&x_train, y_train, &x_test, &mut gbt_rng));
      mean_cv.extend(std::iter::repeat_n(numeric::mean(y_train), test.len()));
      target_cv.extend_from_slice(&y[test.clone()]);
    }
  }

  let weights = if target_cv.is_empty() {
    vec![1.0, 0.0, 0.0]
  } else {
    stack_weights(&[mean_cv, bag_cv, gbt_cv], &target_cv)
  };

  let last = select_rows(features, &[n_obs - 1]);
  let mut bag_rng = StdRng::seed_from_u64(rng.gen());
  let mut gbt_rng = StdRng::seed_from_u64(rng.gen());
  let bag_next = bagging_linear_predict(features, y, &last, &mut bag_rng)?[0];
  let gbt_next = boosting_predict(features, y, &last, &mut gbt_rng)[0];
  let base = [shrink, bag_next, gbt_next];
  Ok(weights.iter().zip(base.iter()).map(|(w, b)| w * b).sum())
}

/// Ensemble expected return per column of `returns`.
///
/// Assets are processed in parallel, each on its own child stream of
/// `seed`/`mu-ensemble`, so the result is independent of thread scheduling.
pub fn estimate_mu_ensemble(
  returns: ArrayView2<f64>,
  macro_features: Option<&Array2<f64>>,
  cv_splits: usize,
  seed: u64,
) -> Result<Array1<f64>> {
  if returns.iter().any(|v| !v.is_finite()) {
    return Err(Error::InvalidInput("mu ensemble returns contain NaN or inf".into()));
  }
  let mu_shrink = shrink_to_zero(returns)?;
  let features = lagged_features(returns, macro_features);
  let n = returns.ncols();

  let values: Result<Vec<f64>> = (0..n)
    .into_par_iter()
    .map(|j| {
      let y = returns.column(j).to_vec();
      let mut asset_rng = rng::child_rng(seed, "mu-ensemble", j as u64);
      asset_forecast(&features, &y, mu_shrink[j], cv_splits, &mut asset_rng)
    })
    .collect();
  let mu = Array1::from(values?);
  debug!(assets = n, "mu ensemble estimated");
  Ok(mu)
}
