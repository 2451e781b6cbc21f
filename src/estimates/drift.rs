//! # Covariance Drift
//!
//! $$
//! d_F(\Sigma_t, \Sigma_{t-1}) = \frac{\lVert \Sigma_t - \Sigma_{t-1} \rVert_F}{\max(10^{-12}, \lVert \Sigma_{t-1} \rVert_F)}
//! $$
//!
//! Structural-break diagnostics between consecutive covariance estimates.

use ndarray::Array2;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;
use crate::linalg;

fn same_shape(a: &Array2<f64>, b: &Array2<f64>, context: &str) -> Result<()> {
  if a.dim() != b.dim() {
    return Err(Error::shape(
      context,
      format!("{}x{}", b.nrows(), b.ncols()),
      format!("{}x{}", a.nrows(), a.ncols()),
    ));
  }
  Ok(())
}

/// Relative Frobenius change. Not symmetric: the denominator is the previous matrix.
pub fn frobenius_relative_drift(sigma_t: &Array2<f64>, sigma_prev: &Array2<f64>) -> Result<f64> {
  same_shape(sigma_t, sigma_prev, "frobenius drift")?;
  let num = linalg::frobenius_norm(&(sigma_t - sigma_prev));
  let den = linalg::frobenius_norm(sigma_prev).max(1e-12);
  Ok(num / den)
}

/// Largest absolute change in any pairwise correlation.
///
/// Both covariances are converted to correlation form first, which fails on a
/// non-positive variance.
pub fn max_corr_drift(sigma_t: &Array2<f64>, sigma_prev: &Array2<f64>) -> Result<f64> {
  same_shape(sigma_t, sigma_prev, "correlation drift")?;
  let corr_t = linalg::corr_from_cov(sigma_t, "sigma_t")?;
  let corr_prev = linalg::corr_from_cov(sigma_prev, "sigma_prev")?;
  Ok(
    corr_t
      .iter()
      .zip(corr_prev.iter())
      .map(|(a, b)| (a - b).abs())
      .fold(0.0, f64::max),
  )
}

/// One row of the drift log.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct DriftRecord {
  pub frobenius_relative: f64,
  pub max_corr_drift: f64,
}

impl DriftRecord {
  pub fn between(sigma_t: &Array2<f64>, sigma_prev: &Array2<f64>) -> Result<Self> {
    Ok(Self {
      frobenius_relative: frobenius_relative_drift(sigma_t, sigma_prev)?,
      max_corr_drift: max_corr_drift(sigma_t, sigma_prev)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn relative_drift_uses_previous_norm() {
    let a = array![[2.0, 0.0], [0.0, 2.0]];
    let b = array![[1.0, 0.0], [0.0, 1.0]];
    let ab = frobenius_relative_drift(&a, &b).unwrap();
    let ba = frobenius_relative_drift(&b, &a).unwrap();
    assert_abs_diff_eq!(ab, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(ba, 0.5, epsilon = 1e-12);
  }

  #[test]
  fn zero_previous_uses_floor() {
    let a = array![[1e-12]];
    let b = array![[0.0]];
    assert_abs_diff_eq!(frobenius_relative_drift(&a, &b).unwrap(), 1.0, epsilon = 1e-9);
  }

  #[test]
  fn correlation_drift_ignores_scale() {
    let a = array![[1.0, 0.5], [0.5, 1.0]];
    let b = array![[4.0, 1.2], [1.2, 1.0]];
    assert_abs_diff_eq!(max_corr_drift(&a, &b).unwrap(), 0.1, epsilon = 1e-12);
  }

  #[test]
  fn correlation_drift_rejects_zero_variance() {
    let a = array![[1.0, 0.0], [0.0, 0.0]];
    let b = array![[1.0, 0.0], [0.0, 1.0]];
    assert!(matches!(
      max_corr_drift(&a, &b),
      Err(Error::NonPositiveVariance { .. })
    ));
    assert!(frobenius_relative_drift(&a, &array![[1.0]]).is_err());
  }
}
