//! # Meta-Learner
//!
//! $$
//! \max_{\alpha \in \Delta}\ \hat\mu^\top\alpha - \tfrac12\alpha^\top(\hat C + 10^{-6}I)\alpha
//! - \lambda_{TO}\,\tfrac12\lVert\alpha - b\rVert_1 - \lambda_{TE}\sqrt{\operatorname{tr}\Sigma}\,\lVert\alpha - b\rVert_2
//! $$
//!
//! Simplex blend of generator return streams with turnover and tracking penalties.

use argmin::core::CostFunction;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray::s;

use super::objectives::minimize_on_simplex;
use super::objectives::quad_form;
use super::objectives::softmax;
use crate::error::Error;
use crate::error::Result;
use crate::linalg;

/// Penalty settings for [`fit_meta_weights`].
#[derive(Clone, Copy, Debug)]
pub struct MetaPenalties {
  /// Maximum number of generators blended; the first `j_max` columns are used.
  pub j_max: usize,
  pub penalty_to: f64,
  pub penalty_te: f64,
  /// Column index of the baseline generator.
  pub baseline_idx: usize,
}

struct MetaCost {
  mu_hat: Vec<f64>,
  cov_hat: Array2<f64>,
  baseline: Vec<f64>,
  penalty_to: f64,
  penalty_te: f64,
}

impl CostFunction for MetaCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let a = softmax(x);
    let ret: f64 = a.iter().zip(&self.mu_hat).map(|(x, m)| x * m).sum();
    let risk = 0.5 * quad_form(&a, &self.cov_hat);
    let l1: f64 = a.iter().zip(&self.baseline).map(|(x, b)| (x - b).abs()).sum();
    let l2: f64 = a
      .iter()
      .zip(&self.baseline)
      .map(|(x, b)| (x - b).powi(2))
      .sum::<f64>()
      .sqrt();
    Ok(-(ret - risk - self.penalty_to * 0.5 * l1 - self.penalty_te * l2))
  }
}

/// Fit non-negative blend weights over generator return columns (`T x J`).
///
/// Deterministic: the solver starts from a fixed simplex and uses no randomness.
pub fn fit_meta_weights(
  returns_by_gen: ArrayView2<f64>,
  sigma: &Array2<f64>,
  penalties: &MetaPenalties,
) -> Result<Array1<f64>> {
  let (t, j) = returns_by_gen.dim();
  if j == 0 {
    return Ok(Array1::zeros(0));
  }
  if penalties.penalty_to < 0.0 || penalties.penalty_te < 0.0 {
    return Err(Error::InvalidInput("meta penalties must be non-negative".into()));
  }
  let k = j.min(penalties.j_max.max(1));
  let r = returns_by_gen.slice(s![.., ..k]);

  let sample_cov = if t > 1 {
    linalg::sample_covariance(r, 1)?
  } else {
    Array2::eye(k)
  };
  let cov_hat = sample_cov + Array2::<f64>::eye(k) * 1e-6;
  let mu_hat = r
    .mean_axis(Axis(0))
    .map(|m| m.to_vec())
    .unwrap_or_else(|| vec![0.0; k]);
  let mut baseline = vec![0.0; k];
  baseline[penalties.baseline_idx.min(k - 1)] = 1.0;

  let scale_te = if sigma.is_empty() {
    1.0
  } else {
    sigma.diag().sum().max(0.0).sqrt()
  };

  let cost = MetaCost {
    mu_hat,
    cov_hat,
    baseline,
    penalty_to: penalties.penalty_to,
    penalty_te: penalties.penalty_te * scale_te,
  };
  let alpha = Array1::from(minimize_on_simplex(cost, k, 5000));
  let clipped = alpha.mapv(|v| v.max(0.0));
  let total = clipped.sum();
  Ok(if total > 0.0 {
    clipped / total
  } else {
    Array1::from_elem(k, 1.0 / k as f64)
  })
}

/// Per-scenario generator returns `R W^T` for a `T x N` scenario matrix and `J x N` weights.
pub fn returns_by_generator(scenarios: ArrayView2<f64>, weights: &Array2<f64>) -> Result<Array2<f64>> {
  if scenarios.ncols() != weights.ncols() {
    return Err(Error::shape(
      "generator returns",
      format!("{} columns", weights.ncols()),
      format!("{} columns", scenarios.ncols()),
    ));
  }
  Ok(scenarios.dot(&weights.t()))
}
