//! # Generator D
//!
//! $$
//! \min_{w \in \Delta}\ \mathrm{CVaR}_\alpha(Rw)\quad \text{then ERC cluster balancing}
//! $$
//!
//! Scenario CVaR minimisation with a mandatory ERC post-solve.

use argmin::core::CostFunction;
use ndarray::Array1;
use ndarray::Array2;

use super::constraints::Constraints;
use super::constraints::project_turnover;
use super::erc::balance_clusters;
use super::gen_a::infeasible;
use super::generator::Allocation;
use super::objectives::empirical_cvar;
use super::objectives::minimize_on_simplex;
use super::objectives::scenario_returns;
use super::objectives::softmax;
use crate::error::Error;
use crate::error::InfeasibleConstraint;
use crate::error::Result;
use crate::linalg;

const NAME: &str = "D";

struct CvarCost {
  scenarios: Array2<f64>,
  alpha: f64,
}

impl CostFunction for CvarCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let w = softmax(x);
    let r = scenario_returns(self.scenarios.view(), &w);
    Ok(empirical_cvar(&r, self.alpha))
  }
}

pub fn generator_d(mu: &Array1<f64>, sigma: &Array2<f64>, constraints: &Constraints) -> Result<Allocation> {
  let n = linalg::ensure_square(sigma, "generator D sigma")?;
  if mu.len() != n {
    return Err(Error::shape("generator D mu", n, mu.len()));
  }
  constraints.validate(n)?;
  let scenarios = match &constraints.scenarios {
    Some(s) if s.nrows() > 0 => s.clone(),
    _ => {
      return Err(Error::EmptySample(
        "generator D needs a T x N scenario matrix".into(),
      ));
    }
  };
  if constraints.gross_leverage_cap < 1.0 {
    return Err(infeasible(
      NAME,
      InfeasibleConstraint::GrossLeverage,
      format!("cap {:.4} is below the unit budget", constraints.gross_leverage_cap),
    ));
  }

  let cost = CvarCost {
    scenarios,
    alpha: constraints.cvar_alpha,
  };
  let raw = Array1::from(minimize_on_simplex(cost, n, 5000));

  let sigma = linalg::symmetrize(sigma);
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

  #[test]
  fn avoids_the_crashing_asset() {
    let scenarios = Array2::from_shape_fn((40, 2), |(t, j)| {
      if j == 0 {
        if t % 10 == 0 { -0.2 } else { 0.01 }
      } else {
        0.002
      }
    });
    let c = Constraints::from_thresholds(&AllocationThresholds::default(), 2)
      .with_scenarios(scenarios)
      .with_clusters(Vec::new());
    let out = generator_d(&array![0.0, 0.0], &(Array2::eye(2) * 0.01), &c).unwrap();
    assert_abs_diff_eq!(out.weights.sum(), 1.0, epsilon = 1e-9);
    assert!(out.weights[1] > 0.9);
  }

  #[test]
  fn turnover_holds_after_cluster_balancing() {
    let scenarios = Array2::from_shape_fn((40, 4), |(t, j)| 0.001 * ((t * (j + 3)) % 7) as f64 - 0.002);
    let prev = array![0.4, 0.4, 0.1, 0.1];
    let clusters = vec![vec![0, 1], vec![2, 3]];
    let mut c = Constraints::from_thresholds(&AllocationThresholds::default(), 4)
      .with_scenarios(scenarios)
      .with_previous(prev.clone())
      .with_clusters(clusters.clone());
    c.turnover_cap = 0.05;
    let sigma = Array2::from_diag(&array![0.01, 0.01, 0.09, 0.09]);
    let out = generator_d(&Array1::zeros(4), &sigma, &c).unwrap();
    assert!(turnover(&out.weights, &prev) <= 0.05 + 1e-9);
    let violation = erc_cluster_violation(&out.weights, &sigma, &clusters, c.rc_tol).unwrap();
    assert_abs_diff_eq!(out.erc.max_deviation, violation + c.rc_tol, epsilon = 1e-12);
  }

  #[test]
  fn missing_scenarios_is_an_error() {
    let c = Constraints::from_thresholds(&AllocationThresholds::default(), 2);
    assert!(generator_d(&array![0.0, 0.0], &Array2::eye(2), &c).is_err());
  }
}
