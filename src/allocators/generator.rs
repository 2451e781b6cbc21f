//! # Generators
//!
//! $$
//! G_j : (\mu, \Sigma, \mathcal{C}) \mapsto w \in \Delta^{N-1},\quad j \in \{A, B, C, D\}
//! $$
//!
//! Closed set of portfolio generators behind one dispatch point.

use std::fmt;

use ndarray::Array1;
use ndarray::Array2;
use serde::Serialize;

use super::constraints::Constraints;
use super::erc::ErcReport;
use super::erc::balance_clusters;
use super::gen_a::generator_a;
use super::gen_c::dro_closed_form;
use super::gen_d::generator_d;
use super::hrp::hrp_weights;
use crate::error::Error;
use crate::error::Result;
use crate::linalg;

/// Risk aversion used by generator C inside the pipeline.
pub const GENERATOR_C_GAMMA: f64 = 1.0;

/// Long-only weights with the ERC post-solve report.
#[derive(Clone, Debug, Serialize)]
pub struct Allocation {
  pub weights: Array1<f64>,
  pub erc: ErcReport,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Generator {
  /// DRO mean-variance with scenario caps.
  A,
  /// Hierarchical risk parity.
  B,
  /// Closed-form DRO.
  C,
  /// CVaR minimisation with ERC.
  D,
}

impl Generator {
  pub const ALL: [Generator; 4] = [Generator::A, Generator::B, Generator::C, Generator::D];

  pub fn name(&self) -> &'static str {
    match self {
      Generator::A => "A",
      Generator::B => "B",
      Generator::C => "C",
      Generator::D => "D",
    }
  }

  pub fn run(&self, mu: &Array1<f64>, sigma: &Array2<f64>, constraints: &Constraints) -> Result<Allocation> {
    match self {
      Generator::A => generator_a(mu, sigma, constraints),
      Generator::B => generator_b(sigma, constraints),
      Generator::C => generator_c(mu, sigma, GENERATOR_C_GAMMA, constraints),
      Generator::D => generator_d(mu, sigma, constraints),
    }
  }
}

impl fmt::Display for Generator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

fn post_solve(raw: &Array1<f64>, sigma: &Array2<f64>, constraints: &Constraints) -> Result<Allocation> {
  let (weights, erc) = balance_clusters(
    raw,
    &linalg::symmetrize(sigma),
    &constraints.clusters,
    constraints.rc_tol,
    constraints.erc_max_iter,
  )?;
  Ok(Allocation { weights, erc })
}

/// HRP baseline followed by the ERC post-solve.
pub fn generator_b(sigma: &Array2<f64>, constraints: &Constraints) -> Result<Allocation> {
  let n = linalg::ensure_square(sigma, "generator B sigma")?;
  constraints.validate(n)?;
  post_solve(&hrp_weights(sigma)?, sigma, constraints)
}

/// Closed-form DRO followed by the ERC post-solve.
pub fn generator_c(mu: &Array1<f64>, sigma: &Array2<f64>, gamma: f64, constraints: &Constraints) -> Result<Allocation> {
  let n = linalg::ensure_square(sigma, "generator C sigma")?;
  if mu.len() != n {
    return Err(Error::shape("generator C mu", n, mu.len()));
  }
  constraints.validate(n)?;
  let raw = dro_closed_form(mu, sigma, gamma, constraints.dro_rho)?;
  post_solve(&raw, sigma, constraints)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;
  use crate::config::AllocationThresholds;

  #[test]
  fn every_generator_returns_simplex_weights() {
    let mu = array![0.010, 0.006, 0.004, 0.008];
    let sigma = array![
      [0.040, 0.006, 0.002, 0.001],
      [0.006, 0.030, 0.004, 0.002],
      [0.002, 0.004, 0.020, 0.003],
      [0.001, 0.002, 0.003, 0.050]
    ];
    let scenarios = Array2::from_shape_fn((60, 4), |(t, j)| {
      0.01 * (((t * (j + 2)) % 11) as f64 / 11.0 - 0.45)
    });
    let c = Constraints::from_thresholds(&AllocationThresholds::default(), 4).with_scenarios(scenarios);
    for g in Generator::ALL {
      let out = g.run(&mu, &sigma, &c).unwrap();
      assert_abs_diff_eq!(out.weights.sum(), 1.0, epsilon = 1e-6);
      assert!(out.weights.iter().all(|w| *w >= -1e-12), "generator {g}");
    }
  }
}
