//! # Allocation Pipeline
//!
//! $$
//! w^\star = \Big[\sum_{j \le J} \alpha_j\, w^{(j)}\Big]_+ \Big/ \mathbf{1}^\top[\cdot]_+
//! $$
//!
//! Runs the generators with fallback, blends them through the meta-learner and reports risk contributions.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use super::constraints::Constraints;
use super::erc::erc_cluster_violation;
use super::erc::risk_contributions;
use super::generator::Allocation;
use super::generator::Generator;
use super::meta::MetaPenalties;
use super::meta::fit_meta_weights;
use super::meta::returns_by_generator;
use super::objectives::clip_normalise;
use crate::config::GovernanceFlags;
use crate::config::RunContext;
use crate::error::Error;
use crate::error::Result;

/// One generator's weights, noting the generator that produced them after any fallback.
#[derive(Clone, Debug, Serialize)]
pub struct GeneratorRun {
  pub generator: Generator,
  pub produced_by: Generator,
  pub allocation: Allocation,
}

#[derive(Clone, Debug, Serialize)]
pub struct AllocationOutput {
  pub generators: Vec<GeneratorRun>,
  /// Generators blended by the meta-learner, in column order.
  pub meta_generators: Vec<Generator>,
  pub meta_weights: Array1<f64>,
  pub weights: Array1<f64>,
  pub risk_contributions: Array1<f64>,
  /// Cluster deviation minus `rc_tol` for the final weights.
  pub erc_violation: f64,
}

/// Run `generator`, falling back to C and then B when it reports infeasibility.
pub fn run_with_fallback(
  generator: Generator,
  mu: &Array1<f64>,
  sigma: &Array2<f64>,
  constraints: &Constraints,
) -> Result<(Generator, Allocation)> {
  let chain: &[Generator] = match generator {
    Generator::A | Generator::D => &[Generator::C, Generator::B],
    Generator::C => &[Generator::B],
    Generator::B => &[],
  };
  match generator.run(mu, sigma, constraints) {
    Ok(a) => Ok((generator, a)),
    Err(e) if e.is_infeasible() => {
      let mut last = e;
      for &fallback in chain {
        warn!(generator = %generator, fallback = %fallback, error = %last, "generator infeasible; falling back");
        match fallback.run(mu, sigma, constraints) {
          Ok(a) => return Ok((fallback, a)),
          Err(e) if e.is_infeasible() => last = e,
          Err(e) => return Err(e),
        }
      }
      Err(last)
    }
    Err(e) => Err(e),
  }
}

/// Factor allocation from posterior returns, covariance and scenario returns.
pub fn run_allocation(
  mu: &Array1<f64>,
  sigma: &Array2<f64>,
  scenarios: ArrayView2<f64>,
  w_prev: Option<&Array1<f64>>,
  ctx: &RunContext,
  flags: &GovernanceFlags,
) -> Result<AllocationOutput> {
  let params = &ctx.thresholds().allocation;
  let n = mu.len();
  if n == 0 {
    return Err(Error::EmptySample("allocation needs at least one asset".into()));
  }
  let mut constraints = Constraints::from_thresholds(params, n).with_scenarios(scenarios.to_owned());
  if let Some(prev) = w_prev {
    constraints = constraints.with_previous(prev.clone());
  }

  let mut runs = Vec::with_capacity(Generator::ALL.len());
  for g in Generator::ALL {
    let (produced_by, allocation) = run_with_fallback(g, mu, sigma, &constraints)?;
    let allocation = Allocation {
      weights: clip_normalise(&allocation.weights),
      ..allocation
    };
    info!(generator = %g, produced_by = %produced_by, erc_converged = allocation.erc.converged, "generator done");
    runs.push(GeneratorRun {
      generator: g,
      produced_by,
      allocation,
    });
  }

  let k = params.meta_j_max.min(runs.len());
  let subset = &runs[..k];
  let weights_subset = Array2::from_shape_fn((k, n), |(j, i)| subset[j].allocation.weights[i]);
  let meta_generators: Vec<Generator> = subset.iter().map(|r| r.generator).collect();

  let meta_weights = if k >= 2 {
    let returns = returns_by_generator(scenarios, &weights_subset)?;
    let (penalty_to, penalty_te) = if flags.meta_to_te {
      (params.meta_penalty_to, ctx.thresholds().mapping.te_max_factor)
    } else {
      (0.0, 0.0)
    };
    let penalties = MetaPenalties {
      j_max: k,
      penalty_to,
      penalty_te,
      baseline_idx: meta_generators
        .iter()
        .position(|g| *g == Generator::B)
        .unwrap_or(0),
    };
    fit_meta_weights(returns.view(), sigma, &penalties)?
  } else {
    Array1::from_elem(k, 1.0)
  };

  let weights = clip_normalise(&meta_weights.dot(&weights_subset));
  let rc = risk_contributions(&weights, sigma)?;
  let erc_violation = erc_cluster_violation(&weights, sigma, &constraints.clusters, params.rc_tol)?;
  info!(meta = ?meta_weights.to_vec(), erc_violation, "allocation blended");

  Ok(AllocationOutput {
    generators: runs,
    meta_generators,
    meta_weights,
    weights,
    risk_contributions: rc,
    erc_violation,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use tracing_test::traced_test;

  use super::*;
  use crate::config::Thresholds;
  use crate::error::InfeasibleConstraint;

  fn inputs() -> (Array1<f64>, Array2<f64>, Array2<f64>) {
    let mu = array![0.004, 0.002, 0.003];
    let sigma = array![[0.020, 0.004, 0.001], [0.004, 0.030, 0.002], [0.001, 0.002, 0.010]];
    let scenarios = Array2::from_shape_fn((80, 3), |(t, j)| {
      0.02 * (((t * (j + 3)) % 17) as f64 / 17.0 - 0.48)
    });
    (mu, sigma, scenarios)
  }

  fn ctx() -> RunContext {
    RunContext::new(3, Thresholds::default(), "out").unwrap()
  }

  #[test]
  fn final_weights_are_on_simplex() {
    let (mu, sigma, scenarios) = inputs();
    let out = run_allocation(&mu, &sigma, scenarios.view(), None, &ctx(), &GovernanceFlags::default()).unwrap();
    assert_eq!(out.generators.len(), 4);
    assert_eq!(out.meta_weights.len(), 3);
    assert_abs_diff_eq!(out.meta_weights.sum(), 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(out.weights.sum(), 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(out.risk_contributions.sum(), 1.0, epsilon = 1e-9);
  }

  #[test]
  #[traced_test]
  fn infeasible_a_falls_back_to_c() {
    let (mu, sigma, scenarios) = inputs();
    let mut c = Constraints::from_thresholds(&Thresholds::default().allocation, 3).with_scenarios(scenarios);
    c.cvar_cap = 0.0;
    match Generator::A.run(&mu, &sigma, &c) {
      Err(Error::Infeasible { constraint, .. }) => assert_eq!(constraint, InfeasibleConstraint::Cvar),
      other => panic!("expected infeasible, got {other:?}"),
    }
    let (produced_by, alloc) = run_with_fallback(Generator::A, &mu, &sigma, &c).unwrap();
    assert_eq!(produced_by, Generator::C);
    assert_abs_diff_eq!(alloc.weights.sum(), 1.0, epsilon = 1e-9);
    assert!(logs_contain("falling back"));
  }
}
