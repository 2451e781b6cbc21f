//! # Factor Orthogonality
//!
//! $$
//! \tilde F = (F - \bar F)\,V\,\operatorname{diag}(\sigma_k)^{-1},\qquad \operatorname{cov}(F) = V \Lambda V^\top
//! $$
//!
//! Merges near-duplicate premia and whitens the set when its correlation matrix is ill-conditioned.

use std::collections::BTreeMap;

use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use super::library::FactorSet;
use crate::error::Error;
use crate::error::Result;
use crate::linalg;
use crate::numeric;

pub const DEFAULT_CORR_THRESHOLD: f64 = 0.9;
pub const DEFAULT_COND_THRESHOLD: f64 = 50.0;
/// Components below this share of the top eigenvalue carry no signal and are not whitened.
const RANK_TOLERANCE: f64 = 1e-12;

/// Surviving column name -> the original factors averaged into it.
pub type MergeMap = BTreeMap<String, Vec<String>>;

#[derive(Clone, Debug, Serialize)]
pub struct DroppedFactor {
  pub name: String,
  pub reason: String,
}

#[derive(Clone, Debug)]
pub struct OrthogonalizationResult {
  pub factors: FactorSet,
  pub merged: MergeMap,
  /// `inputs x outputs` loadings; the identity when no rotation was needed.
  pub loadings: Array2<f64>,
  pub loading_inputs: Vec<String>,
  pub condition_number: f64,
  pub dropped: Vec<DroppedFactor>,
}

fn columns(x: ArrayView2<f64>) -> Vec<Vec<f64>> {
  x.axis_iter(Axis(1)).map(|c| c.to_vec()).collect()
}

/// Pearson correlation of the columns; zero-variance pairs correlate at zero.
pub fn correlation_matrix(x: ArrayView2<f64>) -> Array2<f64> {
  let cols = columns(x);
  let k = cols.len();
  Array2::from_shape_fn((k, k), |(i, j)| {
    if i == j {
      1.0
    } else {
      numeric::correlation(&cols[i], &cols[j])
    }
  })
}

/// Condition number of the factors' correlation matrix.
pub fn condition_number(x: ArrayView2<f64>) -> f64 {
  linalg::condition_number(&correlation_matrix(x))
}

/// Most correlated pair `(i, j, rho)`, first in row-major order on ties.
fn strongest_pair(x: ArrayView2<f64>) -> Option<(usize, usize, f64)> {
  let corr = correlation_matrix(x);
  let k = corr.nrows();
  let mut best: Option<(usize, usize, f64)> = None;
  for i in 0..k {
    for j in 0..k {
      if i == j {
        continue;
      }
      let c = corr[[i, j]];
      if best.map_or(true, |(_, _, b)| c.abs() > b.abs()) {
        best = Some((i, j, c));
      }
    }
  }
  best
}

/// Repeatedly average the most correlated pair while `|rho| > threshold`.
///
/// The pair's first column keeps its name and absorbs the second, sign-aligned so that
/// mirror-image premia reinforce rather than cancel.
pub fn merge_correlated_factors(set: &FactorSet, threshold: f64) -> Result<(FactorSet, MergeMap)> {
  if !(threshold > 0.0 && threshold < 1.0) {
    return Err(Error::config("factors.corr_threshold", "must lie in (0, 1)"));
  }
  let mut names = set.names.clone();
  let mut cols = columns(set.view());
  let mut merged: MergeMap = names.iter().map(|n| (n.clone(), vec![n.clone()])).collect();

  while cols.len() > 1 {
    let x = Array2::from_shape_fn((set.n_obs(), cols.len()), |(t, k)| cols[k][t]);
    let Some((i, j, rho)) = strongest_pair(x.view()) else {
      break;
    };
    if rho.abs() <= threshold {
      break;
    }
    let sign = rho.signum();
    let absorbed = cols.remove(j);
    let absorbed_name = names.remove(j);
    let keep = if j < i { i - 1 } else { i };
    for (a, b) in cols[keep].iter_mut().zip(absorbed.iter()) {
      *a = 0.5 * (*a + sign * b);
    }
    let mut members = merged.remove(&absorbed_name).unwrap_or_default();
    merged.entry(names[keep].clone()).or_default().append(&mut members);
    info!(kept = %names[keep], absorbed = %absorbed_name, rho, "merged correlated factors");
  }

  let values = Array2::from_shape_fn((set.n_obs(), cols.len()), |(t, k)| cols[k][t]);
  Ok((FactorSet::new(set.dates.clone(), names, values)?, merged))
}

/// Merge duplicates, drop flat columns and whiten when `cond(corr) > cond_threshold`.
///
/// The whitened outputs are named `pc_1..pc_k` in decreasing variance order.
pub fn enforce_orthogonality(
  set: &FactorSet,
  corr_threshold: f64,
  cond_threshold: f64,
) -> Result<OrthogonalizationResult> {
  if set.n_factors() == 0 || set.n_obs() == 0 {
    return Err(Error::EmptySample("no factors to orthogonalise".into()));
  }
  let (merged_set, merged) = merge_correlated_factors(set, corr_threshold)?;

  let mut keep = Vec::new();
  let mut dropped = Vec::new();
  for (k, name) in merged_set.names.iter().enumerate() {
    let col = merged_set.values.column(k).to_vec();
    if numeric::std_dev(&col, 0) > 0.0 {
      keep.push(k);
    } else {
      warn!(factor = %name, "zero-variance factor dropped");
      dropped.push(DroppedFactor {
        name: name.clone(),
        reason: "zero variance".into(),
      });
    }
  }
  if keep.is_empty() {
    return Err(Error::DegenerateSeries {
      name: "factors".into(),
      reason: "every factor is flat after merging".into(),
    });
  }
  let names: Vec<String> = keep.iter().map(|&k| merged_set.names[k].clone()).collect();
  let clean = merged_set.values.select(Axis(1), &keep);
  let cond = condition_number(clean.view());

  if cond <= cond_threshold {
    let k = names.len();
    return Ok(OrthogonalizationResult {
      factors: FactorSet::new(set.dates.clone(), names.clone(), clean)?,
      merged,
      loadings: Array2::eye(k),
      loading_inputs: names,
      condition_number: cond,
      dropped,
    });
  }

  let mean = clean.mean_axis(Axis(0)).ok_or_else(|| Error::EmptySample("factor means".into()))?;
  let centered = &clean - &mean;
  let cov = linalg::sample_covariance(clean.view(), 1)?;
  let (values, vectors) = linalg::sym_eigen(&cov);
  let top = values.last().copied().unwrap_or(0.0).max(0.0);
  let order: Vec<usize> = (0..values.len())
    .rev()
    .filter(|&k| values[k] > RANK_TOLERANCE * top)
    .collect();
  let loadings = vectors.select(Axis(1), &order);
  let mut transformed = centered.dot(&loadings);
  for mut col in transformed.axis_iter_mut(Axis(1)) {
    let sd = numeric::std_dev(&col.to_vec(), 0).max(1e-12);
    col /= sd;
  }
  let pc_names: Vec<String> = (1..=order.len()).map(|k| format!("pc_{k}")).collect();
  let cond_new = condition_number(transformed.view());
  info!(cond_before = cond, cond_after = cond_new, components = order.len(), "factors whitened");

  Ok(OrthogonalizationResult {
    factors: FactorSet::new(set.dates.clone(), pc_names, transformed)?,
    merged,
    loadings,
    loading_inputs: names,
    condition_number: cond_new,
    dropped,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::NaiveDate;
  use rand::Rng;
  use rand::SeedableRng;
  use rand::rngs::StdRng;
  use rand_distr::StandardNormal;

  use super::*;

  fn set(columns: Vec<(&str, Vec<f64>)>) -> FactorSet {
    let t = columns[0].1.len();
    let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    let dates = (0..t).map(|i| start + chrono::Days::new(i as u64)).collect();
    let names = columns.iter().map(|c| c.0.to_string()).collect();
    let values = Array2::from_shape_fn((t, columns.len()), |(i, k)| columns[k].1[i]);
    FactorSet::new(dates, names, values).unwrap()
  }

  fn noise(rng: &mut StdRng, t: usize) -> Vec<f64> {
    (0..t).map(|_| rng.sample::<f64, _>(StandardNormal)).collect()
  }

  #[test]
  fn near_duplicates_are_merged() {
    let mut rng = StdRng::seed_from_u64(1);
    let a = noise(&mut rng, 200);
    let b = noise(&mut rng, 200);
    let c: Vec<f64> = a.iter().zip(noise(&mut rng, 200)).map(|(x, e)| 2.0 * x + 0.01 * e).collect();
    let (out, merged) = merge_correlated_factors(&set(vec![("a", a), ("b", b), ("c", c)]), 0.9).unwrap();
    assert_eq!(out.names, vec!["a", "b"]);
    assert_eq!(merged["a"], vec!["a", "c"]);
    assert_eq!(merged["b"], vec!["b"]);
    assert!(!merged.contains_key("c"));
  }

  #[test]
  fn mirror_images_merge_without_cancelling() {
    let mut rng = StdRng::seed_from_u64(5);
    let a = noise(&mut rng, 150);
    let neg: Vec<f64> = a.iter().map(|x| -x).collect();
    let (out, merged) = merge_correlated_factors(&set(vec![("a", a.clone()), ("neg", neg)]), 0.9).unwrap();
    assert_eq!(merged["a"], vec!["a", "neg"]);
    for (x, y) in out.values.column(0).iter().zip(a.iter()) {
      assert_abs_diff_eq!(*x, *y, epsilon = 1e-15);
    }
  }

  #[test]
  fn threshold_outside_unit_interval_is_rejected() {
    let s = set(vec![("a", vec![1.0, 2.0, 3.0])]);
    assert!(merge_correlated_factors(&s, 1.0).is_err());
    assert!(merge_correlated_factors(&s, 0.0).is_err());
  }

  #[test]
  fn well_conditioned_set_is_untouched() {
    let mut rng = StdRng::seed_from_u64(2);
    let s = set(vec![("a", noise(&mut rng, 300)), ("b", noise(&mut rng, 300))]);
    let out = enforce_orthogonality(&s, 0.9, 50.0).unwrap();
    assert_eq!(out.factors.names, vec!["a", "b"]);
    assert_eq!(out.loadings, Array2::<f64>::eye(2));
    assert_eq!(out.factors.values, s.values);
  }

  #[test]
  fn ill_conditioned_set_is_whitened() {
    let mut rng = StdRng::seed_from_u64(3);
    let a = noise(&mut rng, 400);
    let b = noise(&mut rng, 400);
    let c: Vec<f64> = a
      .iter()
      .zip(b.iter())
      .zip(noise(&mut rng, 400))
      .map(|((x, y), e)| x + y + 0.02 * e)
      .collect();
    let s = set(vec![("a", a), ("b", b), ("c", c)]);
    assert!(condition_number(s.view()) > 50.0);

    let out = enforce_orthogonality(&s, 0.9, 50.0).unwrap();
    assert_eq!(out.factors.names, vec!["pc_1", "pc_2", "pc_3"]);
    assert_eq!(out.loadings.dim(), (3, 3));
    assert_abs_diff_eq!(out.condition_number, 1.0, epsilon = 1e-6);
    for col in out.factors.values.columns() {
      assert_abs_diff_eq!(numeric::std_dev(&col.to_vec(), 0), 1.0, epsilon = 1e-9);
    }
  }

  #[test]
  fn flat_factors_are_dropped_and_reported() {
    let mut rng = StdRng::seed_from_u64(4);
    let s = set(vec![("a", noise(&mut rng, 100)), ("flat", vec![0.0; 100])]);
    let out = enforce_orthogonality(&s, 0.9, 50.0).unwrap();
    assert_eq!(out.factors.names, vec!["a"]);
    assert_eq!(out.dropped.len(), 1);
    assert_eq!(out.dropped[0].name, "flat");

    let all_flat = set(vec![("x", vec![1.0; 10]), ("y", vec![0.0; 10])]);
    assert!(matches!(
      enforce_orthogonality(&all_flat, 0.9, 50.0),
      Err(Error::DegenerateSeries { .. })
    ));
  }
}
