//! # Shock Replay
//!
//! $$
//! \tilde r^{(s)}_t = r^{(s)}_t\,\frac{\sigma_{\text{base}}}{\sigma_s}
//! $$
//!
//! Stylised historical shocks, rescaled to the live series' volatility and replayed for drawdown.

use serde::Serialize;
use tracing::debug;

use super::bootstrap::cagr;
use super::bootstrap::max_drawdown;
use crate::error::Error;
use crate::error::Result;
use crate::numeric;

#[derive(Clone, Debug, PartialEq)]
pub struct ShockScenario {
  pub name: String,
  pub returns: Vec<f64>,
}

impl ShockScenario {
  pub fn new(name: impl Into<String>, returns: Vec<f64>) -> Self {
    Self {
      name: name.into(),
      returns,
    }
  }

  /// The path rescaled to `target_vol` (population std); flat when either vol is zero.
  pub fn scaled_to(&self, target_vol: f64) -> Vec<f64> {
    let vol = numeric::std_dev(&self.returns, 0);
    if vol == 0.0 || target_vol == 0.0 {
      return vec![0.0; self.returns.len()];
    }
    let factor = target_vol / vol;
    self.returns.iter().map(|r| r * factor).collect()
  }
}

/// Monthly paths of four stylised stress episodes.
pub fn default_shocks() -> Vec<ShockScenario> {
  vec![
    ShockScenario::new(
      "1973_oil_crisis",
      vec![
        -0.045, -0.035, -0.028, -0.020, -0.010, 0.005, -0.012, -0.008, 0.004, 0.006, 0.005, -0.007,
      ],
    ),
    ShockScenario::new(
      "2008_gfc",
      vec![
        -0.120, -0.085, -0.160, -0.090, -0.040, 0.020, 0.030, -0.015, -0.025, 0.018, 0.022, 0.015,
      ],
    ),
    ShockScenario::new(
      "2020_covid",
      vec![
        -0.135, -0.110, 0.065, 0.045, 0.030, -0.020, 0.015, 0.012, 0.018, -0.005, 0.008, 0.010,
      ],
    ),
    ShockScenario::new(
      "1970s_stagflation",
      vec![
        -0.025, -0.022, -0.018, -0.012, -0.010, -0.008, -0.006, -0.004, -0.003, -0.002, -0.001, 0.000,
      ],
    ),
  ]
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScenarioOutcome {
  pub scenario: String,
  pub length: usize,
  pub max_drawdown: f64,
  pub cagr: f64,
}

/// Replay each scenario, worst drawdown first.
pub fn replay_shocks(
  base_returns: &[f64],
  scenarios: &[ShockScenario],
  scale_to_base_vol: bool,
  periods_per_year: usize,
) -> Result<Vec<ScenarioOutcome>> {
  if base_returns.is_empty() {
    return Err(Error::EmptySample("shock replay needs a base return series".into()));
  }
  if periods_per_year == 0 {
    return Err(Error::config("robustness.periods_per_year", "must be positive"));
  }
  let target_vol = numeric::std_dev(base_returns, 0);

  let mut outcomes: Vec<ScenarioOutcome> = scenarios
    .iter()
    .map(|s| {
      let path = if scale_to_base_vol {
        s.scaled_to(target_vol)
      } else {
        s.returns.clone()
      };
      let outcome = ScenarioOutcome {
        scenario: s.name.clone(),
        length: path.len(),
        max_drawdown: max_drawdown(&path),
        cagr: if path.is_empty() { -1.0 } else { cagr(&path, periods_per_year) },
      };
      debug!(scenario = %outcome.scenario, max_drawdown = outcome.max_drawdown, "shock replayed");
      outcome
    })
    .collect();
  outcomes.sort_by(|a, b| a.max_drawdown.total_cmp(&b.max_drawdown));
  Ok(outcomes)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn defaults_have_twelve_periods() {
    let shocks = default_shocks();
    assert_eq!(shocks.len(), 4);
    assert!(shocks.iter().all(|s| s.returns.len() == 12));
  }

  #[test]
  fn unscaled_gfc_is_the_worst() {
    let base = vec![0.01, -0.01, 0.005, -0.005];
    let out = replay_shocks(&base, &default_shocks(), false, 12).unwrap();
    assert_eq!(out[0].scenario, "2008_gfc");
    assert!(out.windows(2).all(|w| w[0].max_drawdown <= w[1].max_drawdown));
  }

  #[test]
  fn scaling_matches_base_volatility() {
    let base: Vec<f64> = (0..40).map(|t| if t % 2 == 0 { 0.02 } else { -0.02 }).collect();
    let scaled = default_shocks()[1].scaled_to(numeric::std_dev(&base, 0));
    assert_abs_diff_eq!(numeric::std_dev(&scaled, 0), 0.02, epsilon = 1e-12);
  }

  #[test]
  fn flat_base_gives_flat_paths() {
    let out = replay_shocks(&[0.5; 10], &default_shocks(), true, 252).unwrap();
    for o in &out {
      assert_eq!(o.max_drawdown, 0.0);
      assert_eq!(o.cagr, 0.0);
    }
  }

  #[test]
  fn empty_base_is_rejected() {
    assert!(replay_shocks(&[], &default_shocks(), true, 252).is_err());
  }
}
