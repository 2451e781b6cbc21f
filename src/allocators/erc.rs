//! # Equal Risk Contribution
//!
//! $$
//! RC_i = \frac{w_i (\Sigma w)_i}{w^\top \Sigma w},\quad
//! \max_k \Big|\sum_{i \in C_k} RC_i - \overline{RC}\Big| \le \tau_{rc}
//! $$
//!
//! Risk contributions and the cluster balancing post-solve.

use ndarray::Array1;
use ndarray::Array2;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;
use crate::linalg;

/// Outcome of the cluster balancing loop.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ErcReport {
  pub converged: bool,
  pub iterations: usize,
  /// Largest absolute gap between a cluster's risk share and the mean share.
  pub max_deviation: f64,
}

impl ErcReport {
  /// Re-measure the cluster deviation on weights moved after balancing.
  pub fn remeasure(self, w: &Array1<f64>, sigma: &Array2<f64>, clusters: &[Vec<usize>], tol: f64) -> Result<Self> {
    let violation = erc_cluster_violation(w, sigma, clusters, tol)?;
    Ok(Self {
      converged: violation <= 0.0,
      iterations: self.iterations,
      max_deviation: violation + tol,
    })
  }
}

/// Share of portfolio variance attributed to each asset.
pub fn risk_contributions(w: &Array1<f64>, sigma: &Array2<f64>) -> Result<Array1<f64>> {
  let n = linalg::ensure_square(sigma, "risk contributions sigma")?;
  if w.len() != n {
    return Err(Error::shape("risk contributions weights", n, w.len()));
  }
  let m = sigma.dot(w);
  let total = w.dot(&m) + 1e-16;
  Ok(w * &m / total)
}

fn cluster_totals(rc: &Array1<f64>, clusters: &[Vec<usize>]) -> Vec<f64> {
  clusters
    .iter()
    .map(|idx| idx.iter().map(|&i| rc[i]).sum())
    .collect()
}

fn max_deviation(totals: &[f64]) -> (f64, f64) {
  if totals.is_empty() {
    return (0.0, 0.0);
  }
  let target = totals.iter().sum::<f64>() / totals.len() as f64;
  let dev = totals
    .iter()
    .map(|t| (t - target).abs())
    .fold(0.0, f64::max);
  (target, dev)
}

fn check_clusters(clusters: &[Vec<usize>], n: usize) -> Result<()> {
  for (k, idx) in clusters.iter().enumerate() {
    if let Some(&bad) = idx.iter().find(|&&i| i >= n) {
      return Err(Error::InvalidInput(format!(
        "cluster {k} references asset {bad} outside 0..{n}"
      )));
    }
  }
  Ok(())
}

/// Rescale clusters until their risk shares sit within `tol` of the mean share.
///
/// Each pass multiplies a cluster by `sqrt(target / total)` and renormalises. Clusters with
/// no weight are reseeded with a small equal weight so they can take on risk. When the budget
/// runs out the last iterate is returned with `converged = false` and a warning.
pub fn balance_clusters(
  w: &Array1<f64>,
  sigma: &Array2<f64>,
  clusters: &[Vec<usize>],
  tol: f64,
  max_iter: usize,
) -> Result<(Array1<f64>, ErcReport)> {
  let n = linalg::ensure_square(sigma, "ERC sigma")?;
  if w.len() != n {
    return Err(Error::shape("ERC weights", n, w.len()));
  }
  check_clusters(clusters, n)?;
  let mut w_adj = w.mapv(|v| v.max(0.0));
  if clusters.is_empty() {
    return Ok((
      w_adj,
      ErcReport {
        converged: true,
        iterations: 0,
        max_deviation: 0.0,
      },
    ));
  }

  for iteration in 0..max_iter {
    let rc = risk_contributions(&w_adj, sigma)?;
    let totals = cluster_totals(&rc, clusters);
    let (target, dev) = max_deviation(&totals);
    if target == 0.0 || dev <= tol {
      debug!(iteration, max_deviation = dev, "ERC balanced");
      return Ok((
        w_adj,
        ErcReport {
          converged: true,
          iterations: iteration,
          max_deviation: dev,
        },
      ));
    }

    for (idx, &total) in clusters.iter().zip(&totals) {
      if idx.is_empty() {
        continue;
      }
      let mass: f64 = idx.iter().map(|&i| w_adj[i]).sum();
      if mass <= 1e-12 {
        for &i in idx {
          w_adj[i] = 1e-3 / idx.len() as f64;
        }
        continue;
      }
      if total > 0.0 {
        let scale = (target / total).sqrt();
        for &i in idx {
          w_adj[i] *= scale;
        }
      }
    }
    let s = w_adj.sum();
    if s > 0.0 {
      w_adj /= s;
    }
  }

  let rc = risk_contributions(&w_adj, sigma)?;
  let (_, dev) = max_deviation(&cluster_totals(&rc, clusters));
  let converged = dev <= tol;
  if !converged {
    warn!(max_deviation = dev, tol, max_iter, "ERC cluster balancing did not converge");
  }
  Ok((
    w_adj,
    ErcReport {
      converged,
      iterations: max_iter,
      max_deviation: dev,
    },
  ))
}

/// Largest cluster deviation minus the tolerance; non-positive means the budget holds.
pub fn erc_cluster_violation(
  w: &Array1<f64>,
  sigma: &Array2<f64>,
  clusters: &[Vec<usize>],
  tol: f64,
) -> Result<f64> {
  if clusters.is_empty() {
    return Ok(-tol);
  }
  let n = linalg::ensure_square(sigma, "ERC sigma")?;
  check_clusters(clusters, n)?;
  let rc = risk_contributions(w, sigma)?;
  let (_, dev) = max_deviation(&cluster_totals(&rc, clusters));
  Ok(dev - tol)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use tracing_test::traced_test;

  use super::*;

  #[test]
  fn contributions_sum_to_one() {
    let sigma = array![[0.04, 0.01, 0.0], [0.01, 0.09, 0.02], [0.0, 0.02, 0.16]];
    let rc = risk_contributions(&array![0.5, 0.3, 0.2], &sigma).unwrap();
    assert_abs_diff_eq!(rc.sum(), 1.0, epsilon = 1e-12);
  }

  #[test]
  fn balancing_equalises_cluster_shares() {
    let sigma = array![
      [0.04, 0.0, 0.0, 0.0],
      [0.0, 0.04, 0.0, 0.0],
      [0.0, 0.0, 0.25, 0.0],
      [0.0, 0.0, 0.0, 0.25]
    ];
    let w = array![0.25, 0.25, 0.25, 0.25];
    let clusters = vec![vec![0, 1], vec![2, 3]];
    let (out, report) = balance_clusters(&w, &sigma, &clusters, 0.02, 50).unwrap();
    assert!(report.converged);
    assert!(report.max_deviation <= 0.02);
    assert_abs_diff_eq!(out.sum(), 1.0, epsilon = 1e-12);
    assert!(out[0] > out[2]);
    assert!(erc_cluster_violation(&out, &sigma, &clusters, 0.02).unwrap() <= 0.0);
  }

  #[test]
  #[traced_test]
  fn exhausted_budget_is_reported() {
    let sigma = array![[0.04, 0.03, 0.0], [0.03, 0.09, 0.05], [0.0, 0.05, 0.16]];
    let w = Array1::from_elem(3, 1.0 / 3.0);
    let (_, report) = balance_clusters(&w, &sigma, &[vec![0, 1], vec![2]], 1e-9, 1).unwrap();
    assert!(!report.converged);
    assert!(logs_contain("did not converge"));
  }

  #[test]
  fn remeasured_report_describes_the_moved_weights() {
    let sigma = array![
      [0.04, 0.0, 0.0, 0.0],
      [0.0, 0.04, 0.0, 0.0],
      [0.0, 0.0, 0.25, 0.0],
      [0.0, 0.0, 0.0, 0.25]
    ];
    let clusters = vec![vec![0, 1], vec![2, 3]];
    let (_, report) = balance_clusters(&Array1::from_elem(4, 0.25), &sigma, &clusters, 0.02, 50).unwrap();
    assert!(report.converged);

    let moved = array![0.1, 0.1, 0.4, 0.4];
    let after = report.remeasure(&moved, &sigma, &clusters, 0.02).unwrap();
    let violation = erc_cluster_violation(&moved, &sigma, &clusters, 0.02).unwrap();
    assert!(!after.converged);
    assert_eq!(after.iterations, report.iterations);
    assert_abs_diff_eq!(after.max_deviation, violation + 0.02, epsilon = 1e-15);
  }

  #[test]
  fn empty_cluster_list_is_a_no_op() {
    let sigma = Array2::<f64>::eye(2);
    assert_eq!(
      erc_cluster_violation(&array![0.5, 0.5], &sigma, &[], 0.02).unwrap(),
      -0.02
    );
    let (out, report) = balance_clusters(&array![0.7, 0.3], &sigma, &[], 0.02, 50).unwrap();
    assert_eq!(out, array![0.7, 0.3]);
    assert!(report.converged);
  }
}
