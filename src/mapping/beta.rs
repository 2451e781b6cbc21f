//! # Rolling Ridge Betas
//!
//! $$
//! \hat B_t = \big(\tilde F_t^\top \tilde F_t + \lambda I\big)^{-1}\tilde F_t^\top \tilde R_t
//! $$
//!
//! Windowed ridge loadings of instrument returns on factor returns, with sign priors and
//! bootstrap confidence bands.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray::s;
use rand::Rng;
use rayon::prelude::*;
use tracing::debug;
use tracing::info;

use crate::error::Error;
use crate::error::Result;
use crate::linalg;
use crate::numeric;
use crate::rng::child_rng;

const BOOTSTRAP_STREAM: &str = "mapping.beta_bootstrap";

/// Loadings of every full window, `assets x factors` each.
#[derive(Clone, Debug)]
pub struct RollingBetas {
  pub window: usize,
  pub lambda_beta: f64,
  /// Expected sign per factor: `1`, `-1`, or `0` for unconstrained.
  pub signs: Vec<i8>,
  /// Last row (in the cleaned sample) of each window.
  pub ends: Vec<usize>,
  pub betas: Vec<Array2<f64>>,
}

impl RollingBetas {
  pub fn latest(&self) -> Option<&Array2<f64>> {
    self.betas.last()
  }
}

/// Per-window lower and upper bounds, aligned with [`RollingBetas::ends`].
#[derive(Clone, Debug)]
pub struct BetaCi {
  pub alpha: f64,
  pub ends: Vec<usize>,
  pub lower: Vec<Array2<f64>>,
  pub upper: Vec<Array2<f64>>,
}

impl BetaCi {
  /// Widest band of each instrument across windows and factors.
  pub fn max_width_per_instrument(&self) -> Vec<f64> {
    let n = self.lower.first().map_or(0, |l| l.nrows());
    (0..n)
      .map(|i| {
        self
          .lower
          .iter()
          .zip(&self.upper)
          .flat_map(|(lo, hi)| lo.row(i).iter().zip(hi.row(i)).map(|(a, b)| (b - a).abs()).collect::<Vec<_>>())
          .fold(0.0_f64, f64::max)
      })
      .collect()
  }
}

/// Rows where both panels are finite, as owned matrices.
fn aligned_rows(returns: ArrayView2<f64>, factors: ArrayView2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
  if returns.nrows() != factors.nrows() {
    return Err(Error::shape(
      "beta alignment",
      format!("{} factor rows", returns.nrows()),
      factors.nrows(),
    ));
  }
  let keep: Vec<usize> = (0..returns.nrows())
    .filter(|&t| returns.row(t).iter().chain(factors.row(t)).all(|x| x.is_finite()))
    .collect();
  if keep.is_empty() {
    return Err(Error::EmptySample("returns and factors share no finite rows".into()));
  }
  Ok((returns.select(Axis(0), &keep), factors.select(Axis(0), &keep)))
}

fn centered(x: ArrayView2<f64>) -> Array2<f64> {
  let mean = x
    .mean_axis(Axis(0))
    .unwrap_or_else(|| Array1::zeros(x.ncols()));
  &x - &mean
}

fn apply_signs(beta: &mut Array2<f64>, signs: &[i8]) {
  for (k, mut row) in beta.axis_iter_mut(Axis(0)).enumerate() {
    match signs.get(k) {
      Some(1) => row.mapv_inplace(|b| b.max(0.0)),
      Some(-1) => row.mapv_inplace(|b| b.min(0.0)),
      _ => {}
    }
  }
}

/// Ridge solution `factors x assets` for centred inputs.
fn ridge_fit(f: &Array2<f64>, r: &Array2<f64>, lambda: f64, signs: &[i8]) -> Result<Array2<f64>> {
  let k = f.ncols();
  let xtx = f.t().dot(f) + Array2::<f64>::eye(k) * lambda;
  let xty = f.t().dot(r);
  let mut beta = linalg::solve(&xtx, &xty)?;
  apply_signs(&mut beta, signs);
  Ok(beta)
}

fn check_signs(signs: &[i8], k: usize) -> Result<()> {
  if !signs.is_empty() && signs.len() != k {
    return Err(Error::shape("sign priors", format!("{k} factors"), signs.len()));
  }
  if signs.iter().any(|v| !matches!(*v, -1..=1)) {
    return Err(Error::InvalidInput("sign priors must be -1, 0 or 1".into()));
  }
  Ok(())
}

/// Ridge betas of `returns` (`T x N`) on `factors` (`T x K`) over every full window.
///
/// Rows with a non-finite value in either panel are dropped first. Sign priors clip loadings
/// of a factor to its expected sign.
pub fn rolling_beta_ridge(
  returns: ArrayView2<f64>,
  factors: ArrayView2<f64>,
  window: usize,
  lambda_beta: f64,
  signs: &[i8],
) -> Result<RollingBetas> {
  if window <= 1 {
    return Err(Error::InvalidInput("beta window must be greater than one".into()));
  }
  if !(lambda_beta >= 0.0) {
    return Err(Error::InvalidInput("lambda_beta must be non-negative".into()));
  }
  check_signs(signs, factors.ncols())?;
  let (ret, fac) = aligned_rows(returns, factors)?;
  let n_obs = ret.nrows();
  if n_obs < window {
    return Err(Error::InvalidInput(format!(
      "beta window {window} exceeds {n_obs} aligned observations"
    )));
  }

  let ends: Vec<usize> = (window - 1..n_obs).collect();
  let betas = ends
    .par_iter()
    .map(|&end| {
      let rows = end + 1 - window..end + 1;
      let f = centered(fac.slice(s![rows.clone(), ..]));
      let r = centered(ret.slice(s![rows, ..]));
      ridge_fit(&f, &r, lambda_beta, signs).map(|b| b.reversed_axes())
    })
    .collect::<Result<Vec<_>>>()?;
  debug!(windows = betas.len(), window, lambda_beta, "rolling betas estimated");

  Ok(RollingBetas {
    window,
    lambda_beta,
    signs: signs.to_vec(),
    ends,
    betas,
  })
}

/// Pairs bootstrap of every window of `betas`, giving a two-sided `1 - alpha` band.
///
/// Window `t` draws from its own sub-stream of `seed`, so bands are identical however the
/// windows are scheduled.
pub fn beta_ci_bootstrap(
  returns: ArrayView2<f64>,
  factors: ArrayView2<f64>,
  betas: &RollingBetas,
  draws: usize,
  alpha: f64,
  seed: u64,
) -> Result<BetaCi> {
  if draws == 0 {
    return Err(Error::InvalidInput("bootstrap draws must be positive".into()));
  }
  if !(alpha > 0.0 && alpha < 1.0) {
    return Err(Error::InvalidInput(format!("CI alpha must lie in (0, 1), got {alpha}")));
  }
  if betas.betas.is_empty() {
    return Err(Error::EmptySample("no rolling betas to bootstrap".into()));
  }
  let (ret, fac) = aligned_rows(returns, factors)?;
  let window = betas.window;
  let (n_assets, n_factors) = (ret.ncols(), fac.ncols());

  let bands = betas
    .ends
    .par_iter()
    .map(|&end| {
      if end + 1 < window || end >= ret.nrows() {
        return Err(Error::InvalidInput(format!("beta window ending at {end} is outside the sample")));
      }
      let rows = end + 1 - window..end + 1;
      let f = centered(fac.slice(s![rows.clone(), ..]));
      let r = centered(ret.slice(s![rows, ..]));
      let mut rng = child_rng(seed, BOOTSTRAP_STREAM, end as u64);

      let mut samples = Vec::with_capacity(draws);
      for _ in 0..draws {
        let picks: Vec<usize> = (0..window).map(|_| rng.gen_range(0..window)).collect();
        let fs = f.select(Axis(0), &picks);
        let rs = r.select(Axis(0), &picks);
        samples.push(ridge_fit(&fs, &rs, betas.lambda_beta, &betas.signs)?.reversed_axes());
      }

      let mut lower = Array2::zeros((n_assets, n_factors));
      let mut upper = Array2::zeros((n_assets, n_factors));
      for i in 0..n_assets {
        for k in 0..n_factors {
          let values: Vec<f64> = samples.iter().map(|m| m[[i, k]]).collect();
          let sorted = numeric::sorted(&values);
          lower[[i, k]] = numeric::quantile_sorted(&sorted, alpha / 2.0);
          upper[[i, k]] = numeric::quantile_sorted(&sorted, 1.0 - alpha / 2.0);
        }
      }
      Ok((lower, upper))
    })
    .collect::<Result<Vec<_>>>()?;

  let (lower, upper): (Vec<_>, Vec<_>) = bands.into_iter().unzip();
  info!(windows = lower.len(), draws, alpha, "beta confidence bands done");
  Ok(BetaCi {
    alpha,
    ends: betas.ends.clone(),
    lower,
    upper,
  })
}

/// Shrink instruments whose widest band exceeds `tau_beta` by `tau_beta / width`, then renormalise.
pub fn cap_weights_by_beta_ci(weights: &Array1<f64>, ci: &BetaCi, tau_beta: f64) -> Result<Array1<f64>> {
  if !(tau_beta > 0.0) {
    return Err(Error::InvalidInput("tau_beta must be positive".into()));
  }
  if weights.is_empty() || ci.lower.is_empty() {
    return Ok(weights.clone());
  }
  let widths = ci.max_width_per_instrument();
  if widths.len() != weights.len() {
    return Err(Error::shape("beta CI capping", weights.len(), widths.len()));
  }
  let mut scaled = weights.clone();
  for (w, width) in scaled.iter_mut().zip(&widths) {
    if *width > tau_beta {
      *w *= tau_beta / width;
    }
  }
  let total = scaled.sum();
  if total > 0.0 {
    scaled /= total;
  }
  Ok(scaled)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use rand::SeedableRng;
  use rand::rngs::StdRng;
  use rand_distr::Distribution;
  use rand_distr::Normal;

  use super::*;

  /// Two factors, three instruments with loadings `[[1, 0], [0, 2], [0.5, -0.5]]` plus noise.
  fn panels(t: usize, noise: f64) -> (Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(9);
    let n = Normal::new(0.0, 0.01).unwrap();
    let e = Normal::new(0.0, noise.max(1e-12)).unwrap();
    let f = Array2::from_shape_fn((t, 2), |_| n.sample(&mut rng));
    let load = array![[1.0, 0.0, 0.5], [0.0, 2.0, -0.5]];
    let r = f.dot(&load) + Array2::from_shape_fn((t, 3), |_| e.sample(&mut rng));
    (r, f)
  }

  #[test]
  fn recovers_loadings_with_small_ridge() {
    let (r, f) = panels(200, 1e-4);
    let b = rolling_beta_ridge(r.view(), f.view(), 120, 1e-8, &[]).unwrap();
    assert_eq!(b.betas.len(), 81);
    let last = b.latest().unwrap();
    assert_eq!(last.dim(), (3, 2));
    assert_abs_diff_eq!(last[[1, 1]], 2.0, epsilon = 0.05);
    assert_abs_diff_eq!(last[[2, 1]], -0.5, epsilon = 0.05);
  }

  #[test]
  fn sign_priors_clip_loadings() {
    let (r, f) = panels(80, 1e-4);
    let b = rolling_beta_ridge(r.view(), f.view(), 40, 1e-8, &[0, 1]).unwrap();
    // instrument 2 loads negatively on factor 1, clipped to zero
    assert!(b.betas.iter().all(|m| m[[2, 1]] == 0.0));
    assert!(rolling_beta_ridge(r.view(), f.view(), 40, 1e-8, &[2, 0]).is_err());
  }

  #[test]
  fn rejects_bad_windows() {
    let (r, f) = panels(30, 1e-3);
    assert!(rolling_beta_ridge(r.view(), f.view(), 1, 1.0, &[]).is_err());
    assert!(rolling_beta_ridge(r.view(), f.view(), 31, 1.0, &[]).is_err());
    assert!(rolling_beta_ridge(r.view(), f.view(), 10, -1.0, &[]).is_err());
  }

  #[test]
  fn non_finite_rows_are_dropped() {
    let (mut r, f) = panels(50, 1e-3);
    r[[10, 0]] = f64::NAN;
    let b = rolling_beta_ridge(r.view(), f.view(), 49, 1.0, &[]).unwrap();
    assert_eq!(b.betas.len(), 1);
  }

  #[test]
  fn bands_contain_estimate_and_widen_with_noise() {
    let (r, f) = panels(60, 1e-4);
    let b = rolling_beta_ridge(r.view(), f.view(), 40, 1e-8, &[]).unwrap();
    let ci = beta_ci_bootstrap(r.view(), f.view(), &b, 100, 0.2, 3).unwrap();
    assert_eq!(ci.lower.len(), b.betas.len());
    let last = b.latest().unwrap();
    let (lo, hi) = (ci.lower.last().unwrap(), ci.upper.last().unwrap());
    for i in 0..3 {
      for k in 0..2 {
        assert!(lo[[i, k]] <= hi[[i, k]]);
        assert!(lo[[i, k]] - 1e-3 <= last[[i, k]] && last[[i, k]] <= hi[[i, k]] + 1e-3);
      }
    }

    let (rn, fnoisy) = panels(60, 0.05);
    let bn = rolling_beta_ridge(rn.view(), fnoisy.view(), 40, 1e-8, &[]).unwrap();
    let cin = beta_ci_bootstrap(rn.view(), fnoisy.view(), &bn, 100, 0.2, 3).unwrap();
    let quiet = ci.max_width_per_instrument();
    let noisy = cin.max_width_per_instrument();
    assert!(noisy.iter().zip(&quiet).all(|(n, q)| n > q));
  }

  #[test]
  fn bootstrap_is_reproducible() {
    let (r, f) = panels(50, 1e-2);
    let b = rolling_beta_ridge(r.view(), f.view(), 45, 1.0e-4, &[]).unwrap();
    let a = beta_ci_bootstrap(r.view(), f.view(), &b, 50, 0.2, 17).unwrap();
    let c = beta_ci_bootstrap(r.view(), f.view(), &b, 50, 0.2, 17).unwrap();
    assert_eq!(a.lower, c.lower);
    assert_eq!(a.upper, c.upper);
  }

  #[test]
  fn wide_bands_shrink_weights() {
    let ci = BetaCi {
      alpha: 0.2,
      ends: vec![0],
      lower: vec![array![[0.0], [0.0]]],
      upper: vec![array![[0.1], [1.0]]],
    };
    let w = cap_weights_by_beta_ci(&array![0.5, 0.5], &ci, 0.25).unwrap();
    // second instrument scaled by 0.25 before renormalising
    assert_abs_diff_eq!(w[0], 0.5 / 0.625, epsilon = 1e-12);
    assert_abs_diff_eq!(w[1], 0.125 / 0.625, epsilon = 1e-12);
    assert!(cap_weights_by_beta_ci(&array![0.5, 0.5], &ci, 0.0).is_err());
  }
}
