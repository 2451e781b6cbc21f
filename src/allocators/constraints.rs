//! # Allocation Constraints
//!
//! $$
//! w \ge 0,\quad \mathbf{1}^\top w = 1,\quad \tfrac12\lVert w - w_{\text{prev}} \rVert_1 \le \tau_{\text{TO}},\quad \lVert w \rVert_1 \le L
//! $$
//!
//! Constraint bundle shared by the generators and the exact turnover projection.

use ndarray::Array1;
use ndarray::Array2;

use super::objectives::turnover;
use crate::config::AllocationThresholds;
use crate::error::Error;
use crate::error::InfeasibleConstraint;
use crate::error::Result;

/// Caps, scenarios and cluster taxonomy handed to every generator.
#[derive(Clone, Debug)]
pub struct Constraints {
  /// Previous weights; the turnover cap only binds when present.
  pub w_prev: Option<Array1<f64>>,
  /// `T x N` scenario returns for CVaR and EDaR.
  pub scenarios: Option<Array2<f64>>,
  /// Index groups balanced by the ERC post-solve.
  pub clusters: Vec<Vec<usize>>,
  pub turnover_cap: f64,
  pub gross_leverage_cap: f64,
  pub cvar_cap: f64,
  pub cvar_alpha: f64,
  pub edar_cap: f64,
  pub edar_alpha: f64,
  pub rc_tol: f64,
  pub erc_max_iter: usize,
  pub dro_rho: f64,
  pub risk_aversion: f64,
}

impl Constraints {
  /// Constraints for `n` assets with contiguous clusters taken from the thresholds.
  pub fn from_thresholds(params: &AllocationThresholds, n: usize) -> Self {
    Self {
      w_prev: None,
      scenarios: None,
      clusters: contiguous_clusters(n, params.n_clusters),
      turnover_cap: params.turnover_cap,
      gross_leverage_cap: params.gross_leverage_cap,
      cvar_cap: params.cvar_cap,
      cvar_alpha: params.cvar_alpha,
      edar_cap: params.edar_cap,
      edar_alpha: params.edar_alpha,
      rc_tol: params.rc_tol,
      erc_max_iter: params.erc_max_iter,
      dro_rho: params.dro_rho,
      risk_aversion: params.risk_aversion,
    }
  }

  pub fn with_previous(mut self, w_prev: Array1<f64>) -> Self {
    self.w_prev = Some(w_prev);
    self
  }

  pub fn with_scenarios(mut self, scenarios: Array2<f64>) -> Self {
    self.scenarios = Some(scenarios);
    self
  }

  pub fn with_clusters(mut self, clusters: Vec<Vec<usize>>) -> Self {
    self.clusters = clusters;
    self
  }

  /// Shape checks against an `n`-asset problem.
  pub fn validate(&self, n: usize) -> Result<()> {
    if let Some(prev) = &self.w_prev {
      if prev.len() != n {
        return Err(Error::shape("previous weights", n, prev.len()));
      }
      if prev.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(Error::InvalidInput(
          "previous weights must be finite and non-negative".into(),
        ));
      }
    }
    if let Some(s) = &self.scenarios {
      if s.ncols() != n {
        return Err(Error::shape("scenario returns", format!("T x {n}"), format!("{}x{}", s.nrows(), s.ncols())));
      }
    }
    for (k, cluster) in self.clusters.iter().enumerate() {
      if let Some(&bad) = cluster.iter().find(|&&i| i >= n) {
        return Err(Error::InvalidInput(format!(
          "cluster {k} references asset {bad} outside 0..{n}"
        )));
      }
    }
    Ok(())
  }
}

/// Split `0..n` into `min(k, n)` contiguous groups, larger groups first.
pub fn contiguous_clusters(n: usize, k: usize) -> Vec<Vec<usize>> {
  let k = k.clamp(1, n.max(1));
  if n == 0 {
    return Vec::new();
  }
  let base = n / k;
  let extra = n % k;
  let mut start = 0;
  (0..k)
    .map(|g| {
      let len = base + usize::from(g < extra);
      let group: Vec<usize> = (start..start + len).collect();
      start += len;
      group
    })
    .filter(|g| !g.is_empty())
    .collect()
}

/// Move `w` toward `w_prev` until half-L1 turnover is within `cap`.
///
/// The path runs from the closest unit-sum long-only anchor to `w_prev` up to `w`, and the
/// largest admissible step is found by bisection. When even the anchor breaks the cap, which
/// happens whenever `|1 - sum(w_prev)| / 2 > cap`, the call is infeasible.
pub fn project_turnover(w: &Array1<f64>, w_prev: &Array1<f64>, cap: f64, generator: &str) -> Result<Array1<f64>> {
  if w.len() != w_prev.len() {
    return Err(Error::shape("turnover projection", w.len(), w_prev.len()));
  }
  if turnover(w, w_prev) <= cap + 1e-12 {
    return Ok(w.clone());
  }

  let s = w_prev.sum();
  let min_turnover = 0.5 * (1.0 - s).abs();
  if min_turnover > cap + 1e-12 {
    return Err(Error::Infeasible {
      generator: generator.to_string(),
      constraint: InfeasibleConstraint::Turnover,
      detail: format!("minimum turnover {min_turnover:.4} exceeds cap {cap:.4}"),
    });
  }

  let anchor = if s <= 1.0 {
    w_prev + &(w * (1.0 - s))
  } else {
    w_prev / s
  };

  let mut lo = 0.0;
  let mut hi = 1.0;
  for _ in 0..60 {
    let mid = 0.5 * (lo + hi);
    let candidate = &anchor + &((w - &anchor) * mid);
    if turnover(&candidate, w_prev) <= cap {
      lo = mid;
    } else {
      hi = mid;
    }
  }
  Ok(&anchor + &((w - &anchor) * lo))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn clusters_follow_array_split() {
    assert_eq!(
      contiguous_clusters(7, 3),
      vec![vec![0, 1, 2], vec![3, 4], vec![5, 6]]
    );
    assert_eq!(contiguous_clusters(2, 3), vec![vec![0], vec![1]]);
    assert!(contiguous_clusters(0, 3).is_empty());
  }

  #[test]
  fn projection_lands_on_cap() {
    let w = array![1.0, 0.0, 0.0];
    let prev = array![0.2, 0.4, 0.4];
    let out = project_turnover(&w, &prev, 0.3, "A").unwrap();
    assert_abs_diff_eq!(turnover(&out, &prev), 0.3, epsilon = 1e-9);
    assert_abs_diff_eq!(out.sum(), 1.0, epsilon = 1e-12);
    assert!(out.iter().all(|v| *v >= 0.0));
  }

  #[test]
  fn zero_previous_weights_cannot_meet_small_cap() {
    let err = project_turnover(&array![0.5, 0.5], &array![0.0, 0.0], 0.1, "A").unwrap_err();
    assert!(matches!(
      err,
      Error::Infeasible {
        constraint: InfeasibleConstraint::Turnover,
        ..
      }
    ));
  }

  #[test]
  fn validate_rejects_out_of_range_cluster() {
    let c = Constraints::from_thresholds(&AllocationThresholds::default(), 3).with_clusters(vec![vec![0, 5]]);
    assert!(c.validate(3).is_err());
  }
}
