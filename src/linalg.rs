//! # Linear Algebra
//!
//! $$
//! f(A) = V\,\operatorname{diag}\big(f(\lambda_i)\big)\,V^\top
//! $$
//!
//! Symmetric eigen maps, covariance helpers and ndarray/nalgebra bridges.

use nalgebra::DMatrix;
use nalgebra::SymmetricEigen;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;

use crate::error::Error;
use crate::error::Result;

pub fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
  let (r, c) = a.dim();
  DMatrix::from_fn(r, c, |i, j| a[[i, j]])
}

pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
  Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Returns the dimension of a square matrix or a shape error naming `context`.
pub fn ensure_square(a: &Array2<f64>, context: &str) -> Result<usize> {
  let (r, c) = a.dim();
  if r != c {
    return Err(Error::shape(context, "square matrix", format!("{r}x{c}")));
  }
  Ok(r)
}

pub fn symmetrize(a: &Array2<f64>) -> Array2<f64> {
  (a + &a.t()) * 0.5
}

/// Eigen-decomposition of the symmetric part, eigenvalues ascending.
pub fn sym_eigen(a: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
  let n = a.nrows();
  let eig = SymmetricEigen::new(to_dmatrix(&symmetrize(a)));
  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by(|&i, &j| {
    eig.eigenvalues[i]
      .partial_cmp(&eig.eigenvalues[j])
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  let values: Vec<f64> = order.iter().map(|&k| eig.eigenvalues[k]).collect();
  let vectors = Array2::from_shape_fn((n, n), |(i, j)| eig.eigenvectors[(i, order[j])]);
  (values, vectors)
}

/// Rebuilds `V diag(values) V^T`.
pub fn from_eigen(values: &[f64], vectors: &Array2<f64>) -> Array2<f64> {
  let mut scaled = vectors.clone();
  for (mut col, &v) in scaled.axis_iter_mut(Axis(1)).zip(values.iter()) {
    col *= v;
  }
  scaled.dot(&vectors.t())
}

/// Applies `f` to the eigenvalues (floored at 1e-12) of the symmetric part.
pub fn eigen_map<F: Fn(f64) -> f64>(a: &Array2<f64>, f: F) -> Array2<f64> {
  let (values, vectors) = sym_eigen(a);
  let mapped: Vec<f64> = values.iter().map(|&v| f(v.max(1e-12))).collect();
  symmetrize(&from_eigen(&mapped, &vectors))
}

pub fn matrix_power(a: &Array2<f64>, power: f64) -> Array2<f64> {
  eigen_map(a, |v| v.powf(power))
}

pub fn matrix_log(a: &Array2<f64>) -> Array2<f64> {
  eigen_map(a, f64::ln)
}

pub fn matrix_exp(a: &Array2<f64>) -> Array2<f64> {
  let (values, vectors) = sym_eigen(a);
  let mapped: Vec<f64> = values.iter().map(|v| v.exp()).collect();
  symmetrize(&from_eigen(&mapped, &vectors))
}

/// Clips eigenvalues from below at `min_eig`.
pub fn ensure_spd(a: &Array2<f64>, min_eig: f64) -> Array2<f64> {
  let (values, vectors) = sym_eigen(a);
  let clipped: Vec<f64> = values.iter().map(|v| v.max(min_eig)).collect();
  symmetrize(&from_eigen(&clipped, &vectors))
}

pub fn frobenius_norm(a: &Array2<f64>) -> f64 {
  a.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Largest absolute eigenvalue of the symmetric part.
pub fn spectral_norm(a: &Array2<f64>) -> f64 {
  if a.is_empty() {
    return 0.0;
  }
  let (values, _) = sym_eigen(a);
  values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

/// Covariance of a `T x N` sample with columns as variables.
pub fn sample_covariance(x: ArrayView2<f64>, ddof: usize) -> Result<Array2<f64>> {
  let (t, n) = x.dim();
  if t == 0 || n == 0 {
    return Err(Error::EmptySample("covariance sample has no rows or columns".into()));
  }
  if t <= ddof {
    return Err(Error::InvalidInput(format!(
      "covariance needs more than {ddof} observations, got {t}"
    )));
  }
  let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n));
  let centered = &x - &mean;
  Ok(centered.t().dot(&centered) / (t - ddof) as f64)
}

/// Correlation form of a covariance. Fails on non-positive variance.
pub fn corr_from_cov(cov: &Array2<f64>, name: &str) -> Result<Array2<f64>> {
  let n = ensure_square(cov, name)?;
  let mut sd = Vec::with_capacity(n);
  for i in 0..n {
    let v = cov[[i, i]];
    if !v.is_finite() || v <= 0.0 {
      return Err(Error::NonPositiveVariance {
        matrix: name.to_string(),
        index: i,
        value: v,
      });
    }
    sd.push(v.sqrt());
  }
  Ok(Array2::from_shape_fn((n, n), |(i, j)| {
    if i == j {
      1.0
    } else {
      cov[[i, j]] / (sd[i] * sd[j])
    }
  }))
}

/// Correlation form that clips tiny variances instead of failing.
pub fn corr_from_cov_clipped(cov: &Array2<f64>) -> Array2<f64> {
  let n = cov.nrows();
  let sd: Vec<f64> = (0..n).map(|i| cov[[i, i]].max(1e-12).sqrt()).collect();
  Array2::from_shape_fn((n, n), |(i, j)| {
    if i == j {
      1.0
    } else {
      cov[[i, j]] / (sd[i] * sd[j])
    }
  })
}

pub fn inverse(a: &Array2<f64>) -> Option<Array2<f64>> {
  to_dmatrix(a).try_inverse().map(|m| from_dmatrix(&m))
}

pub fn pinv(a: &Array2<f64>) -> Result<Array2<f64>> {
  to_dmatrix(a)
    .pseudo_inverse(1e-12)
    .map(|m| from_dmatrix(&m))
    .map_err(|e| Error::InvalidInput(format!("pseudo-inverse failed: {e}")))
}

/// Solves `A X = B`, falling back to the pseudo-inverse for singular `A`.
pub fn solve(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
  let am = to_dmatrix(a);
  let bm = to_dmatrix(b);
  if let Some(x) = am.clone().lu().solve(&bm) {
    if x.iter().all(|v| v.is_finite()) {
      return Ok(from_dmatrix(&x));
    }
  }
  Ok(pinv(a)?.dot(b))
}

/// `ln det A` through a Cholesky factor; `None` when `A` is not positive definite.
pub fn log_det_spd(a: &Array2<f64>) -> Option<f64> {
  let chol = to_dmatrix(a).cholesky()?;
  let l = chol.l();
  Some(2.0 * (0..l.nrows()).map(|i| l[(i, i)].ln()).sum::<f64>())
}

/// Two-norm condition number from singular values.
pub fn condition_number(a: &Array2<f64>) -> f64 {
  let sv = to_dmatrix(a).singular_values();
  let max = sv.iter().cloned().fold(0.0_f64, f64::max);
  let min = sv.iter().cloned().fold(f64::INFINITY, f64::min);
  if min <= 0.0 {
    f64::INFINITY
  } else {
    max / min
  }
}
