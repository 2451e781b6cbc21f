//! # Generator A
//!
//! $$
//! \max_{w \in \Delta}\ \mu^\top w - \rho \lVert w \rVert_2 - \gamma\, w^\top \Sigma w
//! \quad \text{s.t.}\ \mathrm{CVaR}_\alpha(w) \le c,\ \mathrm{EDaR}_\beta(w) \le e
//! $$
//!
//! DRO-penalised mean-variance allocation with scenario risk caps.

use argmin::core::CostFunction;
use ndarray::Array1;
use ndarray::Array2;
use tracing::debug;

use super::constraints::Constraints;
use super::constraints::project_turnover;
use super::erc::balance_clusters;
use super::generator::Allocation;
use super::objectives::CAP_PENALTY;
use super::objectives::empirical_cvar;
use super::objectives::empirical_edar;
use super::objectives::minimize_on_simplex;
use super::objectives::quad_form;
use super::objectives::scenario_returns;
use super::objectives::softmax;
use crate::error::Error;
use crate::error::InfeasibleConstraint;
use crate::error::Result;
use crate::linalg;

const NAME: &str = "A";

struct DroCost {
  mu: Vec<f64>,
  sigma: Array2<f64>,
  scenarios: Option<Array2<f64>>,
  dro_rho: f64,
  risk_aversion: f64,
  cvar_cap: f64,
  cvar_alpha: f64,
  edar_cap: f64,
  edar_alpha: f64,
}

impl CostFunction for DroCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let w = softmax(x);
    let ret: f64 = w.iter().zip(&self.mu).map(|(a, b)| a * b).sum();
    let l2 = w.iter().map(|v| v * v).sum::<f64>().sqrt();
    let var = quad_form(&w, &self.sigma);
    let mut penalty = 0.0;
    if let Some(s) = &self.scenarios {
      let r = scenario_returns(s.view(), &w);
      penalty += (empirical_cvar(&r, self.cvar_alpha) - self.cvar_cap).max(0.0);
      penalty += (empirical_edar(&r, self.edar_alpha) - self.edar_cap).max(0.0);
    }
    Ok(-(ret - self.dro_rho * l2 - self.risk_aversion * var) + CAP_PENALTY * penalty)
  }
}

pub(crate) fn infeasible(generator: &str, constraint: InfeasibleConstraint, detail: String) -> Error {
  Error::Infeasible {
    generator: generator.to_string(),
    constraint,
    detail,
  }
}

/// Solve, balance clusters, project onto the turnover cap and re-check the scenario caps.
///
/// Every infeasibility is returned as [`Error::Infeasible`] so the caller can fall back.
pub fn generator_a(mu: &Array1<f64>, sigma: &Array2<f64>, constraints: &Constraints) -> Result<Allocation> {
  let n = linalg::ensure_square(sigma, "generator A sigma")?;
  if mu.len() != n {
    return Err(Error::shape("generator A mu", n, mu.len()));
  }
  constraints.validate(n)?;

  // Long-only unit-sum weights have gross leverage exactly one.
  if constraints.gross_leverage_cap < 1.0 {
    return Err(infeasible(
      NAME,
      InfeasibleConstraint::GrossLeverage,
      format!("cap {:.4} is below the unit budget", constraints.gross_leverage_cap),
    ));
  }

  let sigma = linalg::symmetrize(sigma);
  let cost = DroCost {
    mu: mu.to_vec(),
    sigma: sigma.clone(),
    scenarios: constraints.scenarios.clone(),
    dro_rho: constraints.dro_rho,
    risk_aversion: constraints.risk_aversion,
    cvar_cap: constraints.cvar_cap,
    cvar_alpha: constraints.cvar_alpha,
    edar_cap: constraints.edar_cap,
    edar_alpha: constraints.edar_alpha,
  };
  let raw = Array1::from(minimize_on_simplex(cost, n, 5000));

  let (mut weights, mut erc) = balance_clusters(
    &raw,
    &sigma,
    &constraints.clusters,
    constraints.rc_tol,
    constraints.erc_max_iter,
  )?;

  if let Some(prev) = &constraints.w_prev {
    weights = project_turnover(&weights, prev, constraints.turnover_cap, NAME)?;
    erc = erc.remeasure(&weights, &sigma, &constraints.clusters, constraints.rc_tol)?;
  }

  if let Some(s) = &constraints.scenarios {
    let r = scenario_returns(s.view(), &weights.to_vec());
    let cvar = empirical_cvar(&r, constraints.cvar_alpha);
    if cvar > constraints.cvar_cap + 1e-9 {
      return Err(infeasible(
        NAME,
        InfeasibleConstraint::Cvar,
        format!("CVaR {cvar:.4} exceeds cap {:.4}", constraints.cvar_cap),
      ));
    }
    let edar = empirical_edar(&r, constraints.edar_alpha);
    if edar > constraints.edar_cap + 1e-9 {
      return Err(infeasible(
        NAME,
        InfeasibleConstraint::Edar,
        format!("EDaR {edar:.4} exceeds cap {:.4}", constraints.edar_cap),
      ));
    }
  }

  debug!(generator = NAME, erc_converged = erc.converged, "generator solved");
  Ok(Allocation { weights, erc })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;
  use crate::allocators::erc::erc_cluster_violation;
  use crate::allocators::objectives::turnover;
  use crate::config::AllocationThresholds;

  fn constraints(n: usize) -> Constraints {
    Constraints::from_thresholds(&AllocationThresholds::default(), n)
  }

  #[test]
  fn prefers_higher_return_asset() {
    let mu = array![0.08, 0.05];
    let sigma = Array2::<f64>::eye(2) * 0.04;
    let c = constraints(2).with_clusters(Vec::new());
    let out = generator_a(&mu, &sigma, &c).unwrap();
    assert_abs_diff_eq!(out.weights.sum(), 1.0, epsilon = 1e-9);
    assert!(out.weights[0] > out.weights[1]);
  }

  #[test]
  fn zero_start_with_tight_turnover_is_infeasible() {
    let mu = array![0.08, 0.05];
    let sigma = Array2::<f64>::eye(2) * 0.04;
    let mut c = constraints(2).with_previous(array![0.0, 0.0]);
    c.turnover_cap = 0.1;
    let err = generator_a(&mu, &sigma, &c).unwrap_err();
    assert!(matches!(
      err,
      Error::Infeasible {
        constraint: InfeasibleConstraint::Turnover,
        ..
      }
    ));
  }

  #[test]
  fn turnover_cap_binds_against_previous_weights() {
    let mu = array![0.08, 0.05];
    let sigma = Array2::<f64>::eye(2) * 0.04;
    let mut c = constraints(2).with_previous(array![0.2, 0.8]).with_clusters(Vec::new());
    c.turnover_cap = 0.1;
    let out = generator_a(&mu, &sigma, &c).unwrap();
    let prev = array![0.2, 0.8];
    assert!(turnover(&out.weights, &prev) <= 0.1 + 1e-9);
    assert!(out.weights.iter().zip(&prev).all(|(w, p)| (w - p).abs() <= 0.1 + 1e-9));
  }

  #[test]
  fn erc_report_matches_projected_weights() {
    let mu = array![0.08, 0.05, 0.04, 0.03];
    let sigma = Array2::<f64>::eye(4) * 0.04;
    let prev = array![0.7, 0.1, 0.1, 0.1];
    let clusters = vec![vec![0, 1], vec![2, 3]];
    let mut c = constraints(4).with_previous(prev.clone()).with_clusters(clusters.clone());
    c.turnover_cap = 0.05;
    let out = generator_a(&mu, &sigma, &c).unwrap();
    assert!(turnover(&out.weights, &prev) <= 0.05 + 1e-9);
    let violation = erc_cluster_violation(&out.weights, &sigma, &clusters, c.rc_tol).unwrap();
    assert_abs_diff_eq!(out.erc.max_deviation, violation + c.rc_tol, epsilon = 1e-12);
    assert_eq!(out.erc.converged, violation <= 0.0);
  }

  #[test]
  fn gross_cap_below_one_is_infeasible() {
    let mut c = constraints(2);
    c.gross_leverage_cap = 0.5;
    let err = generator_a(&array![0.01, 0.02], &Array2::eye(2), &c).unwrap_err();
    assert!(err.is_infeasible());
  }

  #[test]
  fn unattainable_cvar_cap_is_infeasible() {
    let scenarios = Array2::from_elem((20, 2), -0.2);
    let mut c = constraints(2).with_scenarios(scenarios);
    c.cvar_cap = 0.05;
    let err = generator_a(&array![0.01, 0.02], &(Array2::eye(2) * 0.04), &c).unwrap_err();
    assert!(matches!(
      err,
      Error::Infeasible {
        constraint: InfeasibleConstraint::Cvar,
        ..
      }
    ));
  }
}
