//! # Factor Validation
//!
//! $$
//! \widehat{DSR} = \Phi\!\left(\frac{\hat{SR} - (\gamma_3 \hat{SR} + \tfrac12 \kappa \hat{SR}^2)/n}
//! {\sqrt{(1 - \gamma_3 \hat{SR} + \tfrac12 \kappa \hat{SR}^2)/n}}\right)
//! $$
//!
//! Sharpe, deflated Sharpe, permutation reality check, BH false discovery control and
//! information coefficients over cross-purged folds.

use std::ops::Range;

use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::Serialize;
use statrs::function::erf::erf;
use tracing::info;

use super::definitions::default_definitions;
use super::library::FactorSet;
use crate::config::FactorThresholds;
use crate::error::Error;
use crate::error::Result;
use crate::numeric;
use crate::rng::child_rng;

pub const VALIDATION_STREAM: &str = "factors.validation";
pub const PERIODS_PER_YEAR: f64 = 252.0;
/// Below this many observations the statistics are not informative.
const MIN_OBS: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FactorValidation {
  pub name: String,
  pub sharpe: f64,
  pub dsr: f64,
  pub p_value: f64,
  pub ic_mean: f64,
  pub ic_std: f64,
  /// Whether the sample mean agrees with the expected sign; `None` for unnamed factors.
  pub sign_consistent: Option<bool>,
  pub passed_fdr: bool,
}

#[derive(Clone, Debug)]
pub struct ValidationParams {
  pub n_splits: usize,
  pub embargo: usize,
  pub alpha: f64,
  pub permutations: usize,
}

impl Default for ValidationParams {
  fn default() -> Self {
    Self {
      n_splits: 5,
      embargo: 5,
      alpha: 0.1,
      permutations: 200,
    }
  }
}

impl From<&FactorThresholds> for ValidationParams {
  fn from(t: &FactorThresholds) -> Self {
    Self {
      n_splits: t.n_splits,
      embargo: t.embargo,
      alpha: t.fdr_alpha,
      permutations: t.permutations,
    }
  }
}

fn finite(xs: &[f64]) -> Vec<f64> {
  xs.iter().copied().filter(|x| x.is_finite()).collect()
}

/// Annualised Sharpe ratio (sample std); zero for empty or flat series.
pub fn sharpe_ratio(xs: &[f64]) -> f64 {
  let clean = finite(xs);
  if clean.is_empty() {
    return 0.0;
  }
  let sd = numeric::std_dev(&clean, 1);
  if sd == 0.0 {
    return 0.0;
  }
  numeric::mean(&clean) / sd * PERIODS_PER_YEAR.sqrt()
}

/// Probability that the true Sharpe is positive after skew and fat-tail adjustment.
pub fn deflated_sharpe_ratio(xs: &[f64]) -> f64 {
  let clean = finite(xs);
  let n = clean.len();
  if n < MIN_OBS {
    return 0.0;
  }
  let sr = sharpe_ratio(&clean);
  let skew = numeric::skewness(&clean);
  let kurt = numeric::excess_kurtosis(&clean);
  let n = n as f64;
  let tail = 0.5 * kurt * sr * sr;
  let numerator = sr - (skew * sr + tail) / n;
  let denominator = ((1.0 - skew * sr + tail) / n).max(1e-12).sqrt();
  let z = numerator / denominator;
  0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Share of random permutations whose Sharpe reaches the observed one, with the +1 correction.
pub fn white_reality_check_pvalue(xs: &[f64], permutations: usize, seed: u64, stream_index: u64) -> f64 {
  let mut clean = finite(xs);
  if clean.len() < MIN_OBS {
    return 1.0;
  }
  let observed = sharpe_ratio(&clean);
  let mut rng = child_rng(seed, VALIDATION_STREAM, stream_index);
  let mut exceed = 0usize;
  for _ in 0..permutations {
    clean.shuffle(&mut rng);
    if sharpe_ratio(&clean) >= observed {
      exceed += 1;
    }
  }
  (exceed + 1) as f64 / (permutations + 1) as f64
}

/// Benjamini-Hochberg rejection mask at level `alpha`, in input order.
pub fn fdr_bh(p_values: &[f64], alpha: f64) -> Vec<bool> {
  let n = p_values.len();
  if n == 0 {
    return Vec::new();
  }
  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));
  let cutoff = order
    .iter()
    .enumerate()
    .filter(|&(rank, &i)| p_values[i] <= alpha * (rank + 1) as f64 / n as f64)
    .map(|(rank, _)| rank)
    .last();
  let mut mask = vec![false; n];
  if let Some(last) = cutoff {
    for &i in &order[..=last] {
      mask[i] = true;
    }
  }
  mask
}

/// Contiguous test folds; training rows exclude the fold widened by `embargo` on both sides.
pub fn cross_purged_splits(n_obs: usize, n_splits: usize, embargo: usize) -> Result<Vec<(Vec<usize>, Range<usize>)>> {
  if n_splits < 2 {
    return Err(Error::config("factors.n_splits", "must be at least 2"));
  }
  if n_obs < n_splits {
    return Err(Error::InvalidInput(format!(
      "{n_obs} observations cannot fill {n_splits} folds"
    )));
  }
  let base = n_obs / n_splits;
  let extra = n_obs % n_splits;
  let mut start = 0;
  let mut splits = Vec::with_capacity(n_splits);
  for fold in 0..n_splits {
    let stop = start + base + usize::from(fold < extra);
    let lo = start.saturating_sub(embargo);
    let hi = (stop + embargo).min(n_obs);
    let train: Vec<usize> = (0..n_obs).filter(|&i| i < lo || i >= hi).collect();
    splits.push((train, start..stop));
    start = stop;
  }
  Ok(splits)
}

fn information_coefficients(factor: &[f64], target: &[f64], folds: &[(Vec<usize>, Range<usize>)]) -> Vec<f64> {
  folds
    .iter()
    .map(|(_, test)| {
      let f = &factor[test.clone()];
      if numeric::std_dev(f, 0) == 0.0 {
        return 0.0;
      }
      let ic = numeric::correlation(f, &target[test.clone()]);
      if ic.is_finite() { ic } else { 0.0 }
    })
    .collect()
}

/// Validate every factor against `target` (the cross-sectional mean asset return).
pub fn validate_factor_set(
  set: &FactorSet,
  target: &[f64],
  params: &ValidationParams,
  seed: u64,
) -> Result<Vec<FactorValidation>> {
  if target.len() != set.n_obs() {
    return Err(Error::shape("validation target", set.n_obs(), target.len()));
  }
  let target: Vec<f64> = target.iter().map(|x| if x.is_finite() { *x } else { 0.0 }).collect();
  let folds = cross_purged_splits(set.n_obs(), params.n_splits, params.embargo)?;
  let definitions = default_definitions();

  let mut results: Vec<FactorValidation> = set
    .names
    .par_iter()
    .enumerate()
    .map(|(k, name)| {
      let series = set.values.column(k).to_vec();
      let ics = information_coefficients(&series, &target, &folds);
      let sign_consistent = definitions
        .iter()
        .find(|d| &d.name == name)
        .map(|d| numeric::mean(&finite(&series)) * d.expected_sign as f64 >= 0.0);
      FactorValidation {
        name: name.clone(),
        sharpe: sharpe_ratio(&series),
        dsr: deflated_sharpe_ratio(&series),
        p_value: white_reality_check_pvalue(&series, params.permutations, seed, k as u64),
        ic_mean: numeric::mean(&ics),
        ic_std: numeric::std_dev(&ics, 0),
        sign_consistent,
        passed_fdr: false,
      }
    })
    .collect();

  let p_values: Vec<f64> = results.iter().map(|r| r.p_value).collect();
  for (r, passed) in results.iter_mut().zip(fdr_bh(&p_values, params.alpha)) {
    r.passed_fdr = passed;
  }
  info!(
    factors = results.len(),
    passed = results.iter().filter(|r| r.passed_fdr).count(),
    "factor validation done"
  );
  Ok(results)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::NaiveDate;
  use ndarray::Array2;

  use super::*;

  #[test]
  fn sharpe_is_annualised_and_flat_is_zero() {
    let xs = [0.01, -0.01, 0.02, 0.0];
    let expected = numeric::mean(&xs) / numeric::std_dev(&xs, 1) * 252f64.sqrt();
    assert_abs_diff_eq!(sharpe_ratio(&xs), expected, epsilon = 1e-12);
    assert_eq!(sharpe_ratio(&[0.0; 10]), 0.0);
    assert_eq!(sharpe_ratio(&[]), 0.0);
  }

  #[test]
  fn dsr_is_a_probability() {
    let xs: Vec<f64> = (0..100).map(|i| 0.001 + 0.01 * ((i * 37 % 11) as f64 / 11.0 - 0.5)).collect();
    let dsr = deflated_sharpe_ratio(&xs);
    assert!((0.0..=1.0).contains(&dsr));
    assert_eq!(deflated_sharpe_ratio(&[0.1, 0.2]), 0.0);
  }

  #[test]
  fn reality_check_is_reproducible_and_bounded() {
    let xs: Vec<f64> = (0..60).map(|i| 0.002 + 0.01 * ((i * 13 % 7) as f64 - 3.0) / 3.0).collect();
    let a = white_reality_check_pvalue(&xs, 50, 9, 0);
    let b = white_reality_check_pvalue(&xs, 50, 9, 0);
    assert_eq!(a, b);
    assert!(a > 0.0 && a <= 1.0);
    assert_eq!(white_reality_check_pvalue(&[0.1; 3], 50, 9, 0), 1.0);
  }

  #[test]
  fn bh_rejects_up_to_the_largest_passing_rank() {
    // thresholds at alpha 0.1 with n = 4: 0.025, 0.05, 0.075, 0.1
    let mask = fdr_bh(&[0.04, 0.001, 0.3, 0.07], 0.1);
    assert_eq!(mask, vec![true, true, false, true]);
    assert_eq!(fdr_bh(&[0.5, 0.9], 0.1), vec![false, false]);
    assert!(fdr_bh(&[], 0.1).is_empty());
  }

  #[test]
  fn purged_folds_respect_embargo() {
    let splits = cross_purged_splits(23, 5, 2).unwrap();
    assert_eq!(splits.len(), 5);
    assert_eq!(splits[0].1, 0..5);
    assert_eq!(splits[4].1, 19..23);
    let (train, test) = &splits[2];
    assert_eq!(*test, 10..15);
    assert!(train.iter().all(|&i| i < 8 || i >= 17));
    assert!(cross_purged_splits(10, 1, 0).is_err());
    assert!(cross_purged_splits(3, 5, 0).is_err());
  }

  #[test]
  fn validation_covers_each_factor() {
    let t = 120;
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let dates = (0..t).map(|i| start + chrono::Days::new(i as u64)).collect();
    let target: Vec<f64> = (0..t).map(|i| 0.01 * (((i * 17) % 13) as f64 / 13.0 - 0.5)).collect();
    let values = Array2::from_shape_fn((t, 2), |(i, k)| if k == 0 { target[i] + 0.001 } else { 0.0 });
    let set = FactorSet::new(dates, vec!["global_mkt".into(), "custom".into()], values).unwrap();
    let out = validate_factor_set(&set, &target, &ValidationParams::default(), 5).unwrap();
    assert_eq!(out.len(), 2);
    assert_abs_diff_eq!(out[0].ic_mean, 1.0, epsilon = 1e-9);
    assert_eq!(out[0].sign_consistent, Some(true));
    assert_eq!(out[1].ic_mean, 0.0);
    assert_eq!(out[1].sign_consistent, None);
    assert!(validate_factor_set(&set, &target[1..], &ValidationParams::default(), 5).is_err());
  }
}
