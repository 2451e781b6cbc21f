//! # Tracking-Error Budgets
//!
//! $$
//! \mathrm{TE}(w, b) = \sqrt{(w-b)^\top\Sigma(w-b)},\qquad
//! w' = b + \frac{\kappa}{\mathrm{TE}(w,b)}(w - b)
//! $$
//!
//! Per-factor exposure bands and the portfolio-level shrink toward the baseline.

use ndarray::Array1;
use ndarray::Array2;

use crate::error::Error;
use crate::error::Result;
use crate::linalg;

pub fn tracking_error(weights: &Array1<f64>, baseline: &Array1<f64>, sigma: &Array2<f64>) -> Result<f64> {
  let n = linalg::ensure_square(sigma, "tracking error sigma")?;
  if weights.len() != n || baseline.len() != n {
    return Err(Error::shape(
      "tracking error",
      format!("{n} weights"),
      format!("{} and {}", weights.len(), baseline.len()),
    ));
  }
  let diff = weights - baseline;
  Ok(diff.dot(&sigma.dot(&diff)).max(0.0).sqrt())
}

/// Shrink `weights` toward `baseline` so that the tracking error equals `cap`.
///
/// Returned unchanged when already within the cap. The shrunk vector is rescaled to sum to one
/// when its sum is non-zero.
pub fn enforce_portfolio_te_budget(
  weights: &Array1<f64>,
  baseline: &Array1<f64>,
  sigma: &Array2<f64>,
  cap: f64,
) -> Result<Array1<f64>> {
  if !(cap >= 0.0) {
    return Err(Error::InvalidInput("tracking error cap must be non-negative".into()));
  }
  let te = tracking_error(weights, baseline, sigma)?;
  if te <= cap || te == 0.0 {
    return Ok(weights.clone());
  }
  let adjusted = baseline + &((weights - baseline) * (cap / te));
  let total = adjusted.sum();
  Ok(if total != 0.0 { adjusted / total } else { adjusted })
}

/// Clamp each factor exposure to within `te_factor_max` of its target.
pub fn enforce_te_budget(exposures: &Array1<f64>, target: &Array1<f64>, te_factor_max: f64) -> Result<Array1<f64>> {
  if !(te_factor_max >= 0.0) {
    return Err(Error::InvalidInput("te_factor_max must be non-negative".into()));
  }
  if exposures.len() != target.len() {
    return Err(Error::shape("factor exposures", target.len(), exposures.len()));
  }
  Ok(
    exposures
      .iter()
      .zip(target)
      .map(|(e, t)| {
        let e = if e.is_finite() { *e } else { 0.0 };
        t + (e - t).clamp(-te_factor_max, te_factor_max)
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn te_of_identical_weights_is_zero() {
    let w = array![0.3, 0.7];
    assert_eq!(tracking_error(&w, &w, &Array2::eye(2)).unwrap(), 0.0);
    assert!(tracking_error(&w, &array![1.0], &Array2::eye(2)).is_err());
  }

  #[test]
  fn portfolio_shrink_hits_the_cap() {
    let sigma = Array2::from_diag(&array![0.04, 0.01, 0.02]);
    let w = array![0.6, 0.2, 0.2];
    let b = array![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0];
    let cap = 0.02;
    assert!(tracking_error(&w, &b, &sigma).unwrap() > cap);
    let out = enforce_portfolio_te_budget(&w, &b, &sigma, cap).unwrap();
    assert_abs_diff_eq!(out.sum(), 1.0, epsilon = 1e-12);
    assert!(tracking_error(&out, &b, &sigma).unwrap() <= cap + 1e-12);
  }

  #[test]
  fn weights_within_budget_are_untouched() {
    let sigma = Array2::eye(2) * 1e-4;
    let w = array![0.55, 0.45];
    let b = array![0.5, 0.5];
    assert_eq!(enforce_portfolio_te_budget(&w, &b, &sigma, 0.02).unwrap(), w);
  }

  #[test]
  fn factor_exposures_are_clamped() {
    let out = enforce_te_budget(&array![0.5, 0.2, f64::NAN], &array![0.3, 0.21, 0.0], 0.02).unwrap();
    assert_abs_diff_eq!(out[0], 0.32, epsilon = 1e-12);
    assert_abs_diff_eq!(out[1], 0.2, epsilon = 1e-12);
    assert_eq!(out[2], 0.0);
    assert!(enforce_te_budget(&array![0.1], &array![0.1], -1.0).is_err());
  }
}
