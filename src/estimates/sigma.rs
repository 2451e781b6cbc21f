//! # Covariance Estimators
//!
//! $$
//! \hat\Sigma_{\mathrm{LW}} = (1-\delta^\*)\,S + \delta^\*\,\frac{\operatorname{tr} S}{N} I
//! $$
//!
//! Shrinkage, sparse-precision and factor candidates, their robust aggregation
//! and EWMA blending. Every output is routed through [`project_to_psd`].

use std::fmt;

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::psd::project_to_psd;
use crate::config::EstimateThresholds;
use crate::config::SigmaMode;
use crate::error::Error;
use crate::error::Result;
use crate::linalg;
use crate::numeric;

const GLASSO_MAX_ITER: usize = 200;
const GLASSO_TOL: f64 = 1e-4;
const LASSO_MAX_ITER: usize = 500;
const LASSO_TOL: f64 = 1e-8;

/// Closed set of covariance estimators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceEstimator {
  LedoitWolf,
  FactorShrink,
  SparsePrecision,
  /// Element-wise median of the base candidates.
  Median,
  /// Affine-invariant geometric median of the base candidates.
  GeometricMedian,
}

/// Result of a single candidate estimator that may fail softly.
#[derive(Clone, Debug)]
pub enum CandidateOutcome {
  Ok(Array2<f64>),
  Failed(String),
}

impl CandidateOutcome {
  pub fn matrix(&self) -> Option<&Array2<f64>> {
    match self {
      CandidateOutcome::Ok(m) => Some(m),
      CandidateOutcome::Failed(_) => None,
    }
  }
}

impl fmt::Display for CovarianceEstimator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      CovarianceEstimator::LedoitWolf => "ledoit_wolf",
      CovarianceEstimator::FactorShrink => "factor_shrink",
      CovarianceEstimator::SparsePrecision => "sparse_precision",
      CovarianceEstimator::Median => "median",
      CovarianceEstimator::GeometricMedian => "geometric_median",
    };
    write!(f, "{name}")
  }
}

impl CovarianceEstimator {
  /// Base candidates fed to the aggregators.
  pub const CANDIDATES: [CovarianceEstimator; 3] = [
    CovarianceEstimator::LedoitWolf,
    CovarianceEstimator::SparsePrecision,
    CovarianceEstimator::FactorShrink,
  ];

  /// Runs the estimator on a `T x N` sample.
  ///
  /// Input validation problems are returned as `Err`; a candidate that merely
  /// could not be computed is `Ok(CandidateOutcome::Failed)`.
  pub fn estimate(
    &self,
    sample: ArrayView2<f64>,
    params: &EstimateThresholds,
  ) -> Result<CandidateOutcome> {
    validate_sample(sample)?;
    match self {
      CovarianceEstimator::LedoitWolf => ledoit_wolf(sample).map(CandidateOutcome::Ok),
      CovarianceEstimator::FactorShrink => factor_shrink(sample, None).map(CandidateOutcome::Ok),
      CovarianceEstimator::SparsePrecision => {
        match graphical_lasso_bic(sample, &params.glasso_lambdas) {
          Ok(fit) => Ok(CandidateOutcome::Ok(fit.covariance)),
          Err(Error::Convergence { reason, .. }) => Ok(CandidateOutcome::Failed(reason)),
          Err(e) => Err(e),
        }
      }
      CovarianceEstimator::Median | CovarianceEstimator::GeometricMedian => {
        let mode = if *self == CovarianceEstimator::Median {
          SigmaMode::Consensus
        } else {
          SigmaMode::GeometricMedian
        };
        let candidates = estimate_candidates(sample, params)?;
        aggregate_candidates(&candidates, mode, params).map(CandidateOutcome::Ok)
      }
    }
  }
}

fn validate_sample(sample: ArrayView2<f64>) -> Result<()> {
  let (t, n) = sample.dim();
  if t == 0 || n == 0 {
    return Err(Error::EmptySample("covariance sample".into()));
  }
  if t < 2 {
    return Err(Error::InvalidInput(
      "covariance estimation needs at least two observations".into(),
    ));
  }
  if sample.iter().any(|v| !v.is_finite()) {
    return Err(Error::InvalidInput("covariance sample contains NaN or inf".into()));
  }
  Ok(())
}

fn centered(sample: ArrayView2<f64>) -> Array2<f64> {
  let mean = sample
    .mean_axis(Axis(0))
    .unwrap_or_else(|| Array1::zeros(sample.ncols()));
  &sample - &mean
}

/// Ledoit-Wolf shrinkage intensity and the biased sample covariance it shrinks.
pub fn ledoit_wolf_shrinkage(sample: ArrayView2<f64>) -> Result<(f64, Array2<f64>)> {
  validate_sample(sample)?;
  let x = centered(sample);
  let (t, p) = x.dim();
  let nf = t as f64;
  let emp_cov = x.t().dot(&x) / nf;
  if p == 1 {
    return Ok((0.0, emp_cov));
  }

  let x2 = x.mapv(|v| v * v);
  let emp_cov_trace: f64 = x2.sum() / nf;
  let mu = emp_cov_trace / p as f64;
  let beta_ = x2.t().dot(&x2).sum();
  let delta_ = emp_cov.mapv(|v| v * v).sum();

  let beta = (beta_ / nf - delta_) / (p as f64 * nf);
  let delta = (delta_ - 2.0 * mu * emp_cov_trace + p as f64 * mu * mu) / p as f64;
  let beta = beta.min(delta);
  let shrinkage = if beta <= 0.0 || delta <= 0.0 {
    0.0
  } else {
    beta / delta
  };
  Ok((shrinkage, emp_cov))
}

/// Ledoit-Wolf covariance shrunk toward `tr(S)/N * I`.
pub fn ledoit_wolf(sample: ArrayView2<f64>) -> Result<Array2<f64>> {
  let (shrinkage, emp_cov) = ledoit_wolf_shrinkage(sample)?;
  let p = emp_cov.nrows();
  let mu = emp_cov.diag().sum() / p as f64;
  let target = Array2::<f64>::eye(p) * mu;
  let shrunk = &emp_cov * (1.0 - shrinkage) + &target * shrinkage;
  debug!(shrinkage, "ledoit-wolf");
  project_to_psd(&shrunk, None)
}

/// Top-k eigen reconstruction plus a floored idiosyncratic diagonal.
pub fn factor_shrink(sample: ArrayView2<f64>, n_factors: Option<usize>) -> Result<Array2<f64>> {
  validate_sample(sample)?;
  let (t, n) = sample.dim();
  let s = linalg::sample_covariance(sample, 1)?;
  let k = n_factors
    .unwrap_or_else(|| 5.min(n).min(t - 1).max(1))
    .min(n);

  let (values, vectors) = linalg::sym_eigen(&s);
  let mut factor_cov = Array2::<f64>::zeros((n, n));
  for idx in (0..n).rev().take(k) {
    let lambda = values[idx].max(0.0);
    let v = vectors.column(idx);
    for i in 0..n {
      for j in 0..n {
        factor_cov[[i, j]] += lambda * v[i] * v[j];
      }
    }
  }
  for i in 0..n {
    let specific = (s[[i, i]] - factor_cov[[i, i]]).max(1e-8);
    factor_cov[[i, i]] += specific;
  }
  project_to_psd(&factor_cov, None)
}

/// One fitted point on the sparse-precision penalty grid.
#[derive(Clone, Debug)]
pub struct GraphicalLassoFit {
  pub covariance: Array2<f64>,
  pub precision: Array2<f64>,
  pub lambda: f64,
  pub bic: f64,
}

fn soft_threshold(x: f64, lambda: f64) -> f64 {
  x.signum() * (x.abs() - lambda).max(0.0)
}

/// Coordinate descent for `min 0.5 b'Wb - s'b + alpha |b|_1`.
fn lasso_cd(w: &Array2<f64>, s: &Array1<f64>, alpha: f64, beta: &mut Array1<f64>) {
  let m = s.len();
  for _ in 0..LASSO_MAX_ITER {
    let mut max_step = 0.0_f64;
    for j in 0..m {
      let mut r = s[j];
      for k in 0..m {
        if k != j {
          r -= w[[j, k]] * beta[k];
        }
      }
      let wjj = w[[j, j]].max(1e-12);
      let updated = soft_threshold(r, alpha) / wjj;
      max_step = max_step.max((updated - beta[j]).abs());
      beta[j] = updated;
    }
    if max_step < LASSO_TOL {
      break;
    }
  }
}

fn drop_index(a: &Array2<f64>, idx: usize) -> Array2<f64> {
  let n = a.nrows();
  let keep: Vec<usize> = (0..n).filter(|&i| i != idx).collect();
  Array2::from_shape_fn((n - 1, n - 1), |(i, j)| a[[keep[i], keep[j]]])
}

/// Block coordinate descent graphical lasso at a single penalty.
pub fn graphical_lasso(emp_cov: &Array2<f64>, alpha: f64) -> Result<GraphicalLassoFit> {
  let n = linalg::ensure_square(emp_cov, "graphical lasso")?;
  let fail = |reason: String| Error::Convergence {
    estimator: "sparse_precision".into(),
    reason,
  };
  if n == 1 {
    let v = emp_cov[[0, 0]];
    if v <= 0.0 {
      return Err(fail(format!("lambda {alpha}: zero variance")));
    }
    return Ok(GraphicalLassoFit {
      covariance: emp_cov.clone(),
      precision: Array2::from_elem((1, 1), 1.0 / v),
      lambda: alpha,
      bic: f64::NAN,
    });
  }

  let mut w = emp_cov * 0.95;
  for i in 0..n {
    w[[i, i]] = emp_cov[[i, i]];
  }
  let mut betas = vec![Array1::<f64>::zeros(n - 1); n];
  let mut precision = Array2::<f64>::zeros((n, n));
  let mut converged = false;

  for _ in 0..GLASSO_MAX_ITER {
    for idx in 0..n {
      let w11 = drop_index(&w, idx);
      let s12: Array1<f64> = (0..n).filter(|&k| k != idx).map(|k| emp_cov[[idx, k]]).collect();
      lasso_cd(&w11, &s12, alpha, &mut betas[idx]);
      let w12 = w11.dot(&betas[idx]);
      for (pos, k) in (0..n).filter(|&k| k != idx).enumerate() {
        w[[idx, k]] = w12[pos];
        w[[k, idx]] = w12[pos];
      }
    }

    for idx in 0..n {
      let others: Vec<usize> = (0..n).filter(|&k| k != idx).collect();
      let w12: f64 = others
        .iter()
        .enumerate()
        .map(|(pos, &k)| w[[idx, k]] * betas[idx][pos])
        .sum();
      let theta_ii = 1.0 / (w[[idx, idx]] - w12);
      precision[[idx, idx]] = theta_ii;
      for (pos, &k) in others.iter().enumerate() {
        precision[[k, idx]] = -theta_ii * betas[idx][pos];
      }
    }
    precision = linalg::symmetrize(&precision);

    let off_l1: f64 = precision.iter().map(|v| v.abs()).sum::<f64>()
      - precision.diag().iter().map(|v| v.abs()).sum::<f64>();
    let gap = (emp_cov * &precision).sum() - n as f64 + alpha * off_l1;
    if !gap.is_finite() {
      return Err(fail(format!("lambda {alpha}: non-finite duality gap")));
    }
    if gap.abs() < GLASSO_TOL {
      converged = true;
      break;
    }
  }

  if !converged {
    return Err(fail(format!(
      "lambda {alpha}: no convergence within {GLASSO_MAX_ITER} sweeps"
    )));
  }
  if w.iter().chain(precision.iter()).any(|v| !v.is_finite()) {
    return Err(fail(format!("lambda {alpha}: non-finite estimate")));
  }
  Ok(GraphicalLassoFit {
    covariance: linalg::symmetrize(&w),
    precision,
    lambda: alpha,
    bic: f64::NAN,
  })
}

/// Fits every penalty on the grid and keeps the lowest BIC.
///
/// Returns `Error::Convergence` when no grid point yields a finite positive-definite fit.
pub fn graphical_lasso_bic(sample: ArrayView2<f64>, lambdas: &[f64]) -> Result<GraphicalLassoFit> {
  validate_sample(sample)?;
  let t = sample.nrows();
  let emp_cov = linalg::sample_covariance(sample, 1)?;
  let ln_n = (t as f64).ln();

  let mut best: Option<GraphicalLassoFit> = None;
  let mut reasons = Vec::new();
  for &lambda in lambdas.iter().filter(|l| **l > 0.0) {
    let mut fit = match graphical_lasso(&emp_cov, lambda) {
      Ok(fit) => fit,
      Err(e) => {
        reasons.push(e.to_string());
        continue;
      }
    };
    let Some(logdet) = linalg::log_det_spd(&fit.precision) else {
      reasons.push(format!("lambda {lambda}: precision not positive definite"));
      continue;
    };
    let trace = emp_cov.dot(&fit.precision).diag().sum();
    let log_likelihood = t as f64 * (logdet - trace);
    let n = fit.precision.nrows();
    let non_zero = (0..n)
      .flat_map(|i| (i..n).map(move |j| (i, j)))
      .filter(|&(i, j)| fit.precision[[i, j]].abs() > 1e-12)
      .count();
    fit.bic = -2.0 * log_likelihood + non_zero as f64 * ln_n;
    if !fit.bic.is_finite() {
      reasons.push(format!("lambda {lambda}: non-finite BIC"));
      continue;
    }
    if best.as_ref().is_none_or(|b| fit.bic < b.bic) {
      best = Some(fit);
    }
  }

  match best {
    Some(mut fit) => {
      debug!(lambda = fit.lambda, bic = fit.bic, "sparse precision selected");
      fit.covariance = project_to_psd(&fit.covariance, None)?;
      Ok(fit)
    }
    None => Err(Error::Convergence {
      estimator: "sparse_precision".into(),
      reason: if reasons.is_empty() {
        "empty penalty grid".into()
      } else {
        reasons.join("; ")
      },
    }),
  }
}

fn ensure_same_shape(covs: &[Array2<f64>]) -> Result<usize> {
  let first = covs
    .first()
    .ok_or_else(|| Error::EmptySample("at least one covariance matrix is required".into()))?;
  let n = linalg::ensure_square(first, "covariance candidates")?;
  for c in covs.iter().skip(1) {
    if c.dim() != (n, n) {
      return Err(Error::shape(
        "covariance candidates",
        format!("{n}x{n}"),
        format!("{}x{}", c.nrows(), c.ncols()),
      ));
    }
  }
  Ok(n)
}

/// Element-wise median across candidates, then PSD projection.
pub fn median_of_covariances(covs: &[Array2<f64>]) -> Result<Array2<f64>> {
  let n = ensure_same_shape(covs)?;
  let mut median = Array2::<f64>::zeros((n, n));
  let mut buf = Vec::with_capacity(covs.len());
  for i in 0..n {
    for j in 0..n {
      buf.clear();
      buf.extend(covs.iter().map(|c| 0.5 * (c[[i, j]] + c[[j, i]])));
      median[[i, j]] = numeric::median(&buf);
    }
  }
  project_to_psd(&median, None)
}

/// Affine-invariant geometric median via Riemannian Weiszfeld iterations.
///
/// Starts from the element-wise consensus. Falls back to that consensus with a
/// warning when the iteration budget is exhausted; never fails on non-convergence.
pub fn sigma_spd_median(covs: &[Array2<f64>], max_iter: usize, tol: f64) -> Result<Array2<f64>> {
  let consensus = median_of_covariances(covs)?;
  let points: Vec<Array2<f64>> = covs.iter().map(|c| linalg::ensure_spd(c, 1e-8)).collect();
  let mut current = linalg::ensure_spd(&consensus, 1e-8);

  for iteration in 0..max_iter {
    let sqrt = linalg::matrix_power(&current, 0.5);
    let inv_sqrt = linalg::matrix_power(&current, -0.5);

    let mut tangent = Array2::<f64>::zeros(current.dim());
    let mut weight_sum = 0.0;
    for p in &points {
      let log_map = linalg::matrix_log(&inv_sqrt.dot(p).dot(&inv_sqrt));
      let dist = linalg::frobenius_norm(&log_map);
      if dist < 1e-12 {
        continue;
      }
      tangent = tangent + log_map / dist;
      weight_sum += 1.0 / dist;
    }
    if weight_sum == 0.0 {
      return Ok(current);
    }
    tangent /= weight_sum;

    let step = linalg::frobenius_norm(&tangent);
    if !step.is_finite() {
      break;
    }
    current = linalg::symmetrize(&sqrt.dot(&linalg::matrix_exp(&tangent)).dot(&sqrt));
    if step <= tol {
      debug!(iterations = iteration + 1, "geometric median converged");
      return project_to_psd(&current, None);
    }
  }

  warn!(
    max_iter,
    "geometric median did not converge; falling back to element-wise median"
  );
  Ok(consensus)
}

/// `lambda * prev + (1 - lambda) * candidate`, re-projected to PSD.
pub fn ewma_regime(prev: &Array2<f64>, candidate: &Array2<f64>, lambda: f64) -> Result<Array2<f64>> {
  if !(0.0..=1.0).contains(&lambda) {
    return Err(Error::InvalidInput(format!(
      "ewma lambda must lie in [0, 1], got {lambda}"
    )));
  }
  if prev.dim() != candidate.dim() {
    return Err(Error::shape(
      "ewma blend",
      format!("{}x{}", prev.nrows(), prev.ncols()),
      format!("{}x{}", candidate.nrows(), candidate.ncols()),
    ));
  }
  let blended = prev * lambda + candidate * (1.0 - lambda);
  project_to_psd(&blended, None)
}

/// Runs every base candidate on the sample.
pub fn estimate_candidates(
  sample: ArrayView2<f64>,
  params: &EstimateThresholds,
) -> Result<Vec<(CovarianceEstimator, CandidateOutcome)>> {
  CovarianceEstimator::CANDIDATES
    .iter()
    .map(|est| est.estimate(sample, params).map(|o| (*est, o)))
    .collect()
}

/// Drops failed candidates (with a warning) and aggregates the rest.
pub fn aggregate_candidates(
  candidates: &[(CovarianceEstimator, CandidateOutcome)],
  mode: SigmaMode,
  params: &EstimateThresholds,
) -> Result<Array2<f64>> {
  let mut kept = Vec::with_capacity(candidates.len());
  for (est, outcome) in candidates {
    match outcome {
      CandidateOutcome::Ok(m) => kept.push(m.clone()),
      CandidateOutcome::Failed(reason) => {
        warn!(estimator = %est, %reason, "dropping covariance candidate");
      }
    }
  }
  if kept.is_empty() {
    return Err(Error::Convergence {
      estimator: "covariance consensus".into(),
      reason: "every candidate failed".into(),
    });
  }
  match mode {
    SigmaMode::Consensus => median_of_covariances(&kept),
    SigmaMode::GeometricMedian => sigma_spd_median(&kept, params.spd_max_iter, params.spd_tol),
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::Array2;
  use ndarray::array;
  use rand::Rng;
  use rand_distr::Distribution;
  use rand_distr::Normal;
  use tracing_test::traced_test;

  use super::*;
  use crate::estimates::psd::min_eigenvalue;
  use crate::rng::stream_rng;

  fn gaussian_sample(t: usize, n: usize, seed: u64) -> Array2<f64> {
    let mut rng = stream_rng(seed, "test.sample");
    let normal = Normal::new(0.0, 0.01).unwrap();
    let common: Vec<f64> = (0..t).map(|_| normal.sample(&mut rng)).collect();
    Array2::from_shape_fn((t, n), |(i, j)| {
      common[i] * (1.0 + j as f64 * 0.1) + normal.sample(&mut rng) * 0.5 + rng.gen_range(-1e-4..1e-4)
    })
  }

  #[test]
  fn ledoit_wolf_is_between_sample_and_target() {
    let x = gaussian_sample(60, 4, 1);
    let (shrinkage, emp) = ledoit_wolf_shrinkage(x.view()).unwrap();
    assert!((0.0..=1.0).contains(&shrinkage));
    let lw = ledoit_wolf(x.view()).unwrap();
    let mu = emp.diag().sum() / 4.0;
    let expected = emp[[0, 1]] * (1.0 - shrinkage);
    assert_abs_diff_eq!(lw[[0, 1]], expected, epsilon = 1e-12);
    assert_abs_diff_eq!(
      lw[[0, 0]],
      emp[[0, 0]] * (1.0 - shrinkage) + mu * shrinkage,
      epsilon = 1e-12
    );
    assert!(min_eigenvalue(&lw) >= 0.0);
  }

  #[test]
  fn factor_shrink_keeps_positive_diagonal() {
    let x = gaussian_sample(40, 6, 2);
    let f = factor_shrink(x.view(), Some(2)).unwrap();
    assert!(f.diag().iter().all(|v| *v > 0.0));
    assert!(min_eigenvalue(&f) >= -1e-12);
  }

  #[test]
  fn graphical_lasso_selects_finite_bic() {
    let x = gaussian_sample(120, 4, 3) * 100.0;
    let lambdas = EstimateThresholds::default().glasso_lambdas;
    let fit = graphical_lasso_bic(x.view(), &lambdas).unwrap();
    assert!(fit.bic.is_finite());
    assert!(min_eigenvalue(&fit.covariance) >= 0.0);
  }

  #[test]
  fn graphical_lasso_exhausted_grid_is_distinguishable() {
    let x = gaussian_sample(30, 3, 4);
    let err = graphical_lasso_bic(x.view(), &[]).unwrap_err();
    assert!(matches!(err, Error::Convergence { .. }));
    let params = EstimateThresholds {
      glasso_lambdas: vec![-1.0],
      ..EstimateThresholds::default()
    };
    let outcome = CovarianceEstimator::SparsePrecision
      .estimate(x.view(), &params)
      .unwrap();
    assert!(matches!(outcome, CandidateOutcome::Failed(_)));
  }

  #[test]
  fn median_is_elementwise() {
    let a = array![[1.0, 0.1], [0.1, 1.0]];
    let b = array![[2.0, 0.2], [0.2, 2.0]];
    let c = array![[3.0, 0.0], [0.0, 3.0]];
    let m = median_of_covariances(&[a, b, c]).unwrap();
    assert_abs_diff_eq!(m[[0, 0]], 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(m[[0, 1]], 0.1, epsilon = 1e-12);
  }

  #[test]
  fn geometric_median_of_commuting_pair_is_between() {
    let a = array![[1.0, 0.0], [0.0, 1.0]];
    let b = array![[4.0, 0.0], [0.0, 4.0]];
    let c = array![[2.0, 0.0], [0.0, 2.0]];
    let g = sigma_spd_median(&[a, b, c], 200, 1e-9).unwrap();
    assert_abs_diff_eq!(g[[0, 0]], 2.0, epsilon = 1e-6);
    assert_abs_diff_eq!(g[[0, 1]], 0.0, epsilon = 1e-9);
  }

  #[test]
  #[traced_test]
  fn geometric_median_falls_back_with_warning() {
    let a = array![[1.0, 0.3], [0.3, 1.0]];
    let b = array![[3.0, -0.2], [-0.2, 0.5]];
    let c = array![[0.7, 0.0], [0.0, 2.0]];
    let consensus = median_of_covariances(&[a.clone(), b.clone(), c.clone()]).unwrap();
    let g = sigma_spd_median(&[a, b, c], 1, 1e-300).unwrap();
    for (x, y) in g.iter().zip(consensus.iter()) {
      assert_abs_diff_eq!(x, y, epsilon = 1e-15);
    }
    assert!(logs_contain("falling back to element-wise median"));
  }

  #[test]
  fn ewma_stays_psd_and_rejects_bad_lambda() {
    let prev = array![[0.04, 0.03], [0.03, 0.04]];
    let cand = array![[0.04, -0.035], [-0.035, 0.04]];
    let blended = ewma_regime(&prev, &cand, 0.5).unwrap();
    assert!(min_eigenvalue(&blended) >= 0.0);
    assert!(ewma_regime(&prev, &cand, 1.5).is_err());
  }

  #[test]
  #[traced_test]
  fn aggregation_drops_failed_candidates() {
    let good = array![[1.0, 0.0], [0.0, 1.0]];
    let candidates = vec![
      (CovarianceEstimator::LedoitWolf, CandidateOutcome::Ok(good.clone())),
      (
        CovarianceEstimator::SparsePrecision,
        CandidateOutcome::Failed("no convergence".into()),
      ),
    ];
    let out =
      aggregate_candidates(&candidates, SigmaMode::Consensus, &EstimateThresholds::default())
        .unwrap();
    assert_abs_diff_eq!(out[[0, 0]], 1.0, epsilon = 1e-12);
    assert!(logs_contain("dropping covariance candidate"));
  }
}
