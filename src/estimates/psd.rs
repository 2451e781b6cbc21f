//! # PSD Projection
//!
//! $$
//! \Pi_{\mathbb{S}_+}(A) = V\,\operatorname{diag}\big(\max(\lambda_i, \varepsilon)\big)\,V^\top
//! $$
//!
//! Nearest positive semi-definite matrix in Frobenius norm.

use ndarray::Array2;

use crate::error::Error;
use crate::error::Result;
use crate::linalg;

/// Default eigenvalue floor: a small multiple of machine epsilon scaled by the spectral norm.
pub fn default_eps(a: &Array2<f64>) -> f64 {
  let n = a.nrows().max(1) as f64;
  n * f64::EPSILON * linalg::spectral_norm(a)
}

/// Projects `matrix` onto the PSD cone.
///
/// The input is symmetrised first; eigenvalues below `max(eps, 0)` are raised to it.
/// Idempotent on PSD input up to the floor.
pub fn project_to_psd(matrix: &Array2<f64>, eps: Option<f64>) -> Result<Array2<f64>> {
  linalg::ensure_square(matrix, "psd projection")?;
  if matrix.iter().any(|v| !v.is_finite()) {
    return Err(Error::InvalidInput(
      "psd projection input contains non-finite entries".into(),
    ));
  }
  if matrix.is_empty() {
    return Ok(matrix.clone());
  }

  let floor = eps.unwrap_or_else(|| default_eps(matrix)).max(0.0);
  let (values, vectors) = linalg::sym_eigen(matrix);
  let clipped: Vec<f64> = values.iter().map(|&v| v.max(floor)).collect();
  Ok(linalg::symmetrize(&linalg::from_eigen(&clipped, &vectors)))
}

/// Smallest eigenvalue of the symmetric part.
pub fn min_eigenvalue(a: &Array2<f64>) -> f64 {
  let (values, _) = linalg::sym_eigen(a);
  values.first().copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::Array2;
  use ndarray::array;

  use super::*;

  fn rotation() -> Array2<f64> {
    // orthonormal basis built from a Householder reflection
    let v = array![1.0, 2.0, 2.0] / 3.0;
    let mut q = Array2::eye(3);
    for i in 0..3 {
      for j in 0..3 {
        q[[i, j]] -= 2.0 * v[i] * v[j];
      }
    }
    q
  }

  #[test]
  fn clamps_negative_eigenvalue_to_closed_form() {
    let q = rotation();
    let a = linalg::from_eigen(&[2.0, 0.5, -0.1], &q);
    let projected = project_to_psd(&a, Some(0.0)).unwrap();
    let expected = linalg::from_eigen(&[2.0, 0.5, 0.0], &q);

    for (x, y) in projected.iter().zip(expected.iter()) {
      assert_abs_diff_eq!(x, y, epsilon = 1e-10);
    }
    assert!(min_eigenvalue(&projected) >= -1e-12);

    // distance equals the clipped negative mass
    let dist = linalg::frobenius_norm(&(&projected - &a));
    assert_abs_diff_eq!(dist, 0.1, epsilon = 1e-10);

    // any other PSD candidate is further away
    let other = linalg::from_eigen(&[2.0, 0.5, 0.05], &q);
    assert!(linalg::frobenius_norm(&(&other - &a)) > dist);
  }

  #[test]
  fn already_psd_is_fixed_point() {
    let a = array![[0.04, 0.01], [0.01, 0.09]];
    let once = project_to_psd(&a, None).unwrap();
    let twice = project_to_psd(&once, None).unwrap();
    for ((x, y), z) in once.iter().zip(a.iter()).zip(twice.iter()) {
      assert_abs_diff_eq!(x, y, epsilon = 1e-14);
      assert_abs_diff_eq!(x, z, epsilon = 1e-14);
    }
  }

  #[test]
  fn asymmetric_input_is_symmetrised() {
    let a = array![[1.0, 0.4], [0.0, 1.0]];
    let p = project_to_psd(&a, None).unwrap();
    assert_abs_diff_eq!(p[[0, 1]], p[[1, 0]], epsilon = 1e-15);
    assert_abs_diff_eq!(p[[0, 1]], 0.2, epsilon = 1e-12);
  }

  #[test]
  fn rejects_non_square() {
    let a = Array2::<f64>::zeros((2, 3));
    assert!(matches!(
      project_to_psd(&a, None),
      Err(Error::ShapeMismatch { .. })
    ));
  }
}
