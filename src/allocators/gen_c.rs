//! # Generator C
//!
//! $$
//! w \propto \Big[\tfrac{1}{\gamma}\,(\Sigma + \max(\rho, 10^{-6}) I)^{+}\mu\Big]_+
//! $$
//!
//! Closed-form DRO allocation used as the fast fallback.

use ndarray::Array1;
use ndarray::Array2;

use crate::error::Error;
use crate::error::Result;
use crate::linalg;

/// Ridge-regularised closed form, clipped to long-only and normalised.
///
/// Returns equal weights when the raw solution vanishes or nothing survives the clip.
pub fn dro_closed_form(mu: &Array1<f64>, sigma: &Array2<f64>, gamma: f64, rho: f64) -> Result<Array1<f64>> {
  let n = linalg::ensure_square(sigma, "generator C sigma")?;
  if mu.len() != n {
    return Err(Error::shape("generator C mu", n, mu.len()));
  }
  let equal = Array1::from_elem(n, 1.0 / n as f64);
  let reg = linalg::symmetrize(sigma) + Array2::<f64>::eye(n) * rho.max(1e-6);
  let raw = linalg::pinv(&reg)?.dot(mu);
  if raw.iter().all(|v| v.abs() <= 1e-8) {
    return Ok(equal);
  }
  let scaled = raw.mapv(|v| (v / gamma.max(1e-6)).max(0.0));
  let total = scaled.sum();
  Ok(if total > 0.0 { scaled / total } else { equal })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn identity_sigma_is_proportional_to_positive_mu() {
    let w = dro_closed_form(&array![0.03, 0.01, -0.02], &Array2::eye(3), 1.0, 0.05).unwrap();
    assert_abs_diff_eq!(w[0], 0.75, epsilon = 1e-9);
    assert_abs_diff_eq!(w[1], 0.25, epsilon = 1e-9);
    assert_eq!(w[2], 0.0);
  }

  #[test]
  fn zero_mu_gives_equal_weights() {
    let w = dro_closed_form(&array![0.0, 0.0], &Array2::eye(2), 1.0, 0.05).unwrap();
    assert_eq!(w, array![0.5, 0.5]);
  }

  #[test]
  fn all_negative_mu_gives_equal_weights() {
    let w = dro_closed_form(&array![-0.01, -0.02], &Array2::eye(2), 1.0, 0.05).unwrap();
    assert_eq!(w, array![0.5, 0.5]);
  }
}
