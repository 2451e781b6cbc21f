//! # Robustness Lab
//!
//! $$
//! \text{lab}(r) = \big(\text{bootstrap}(r),\ \text{shocks}(r),\ \text{ablation}\big)
//! $$
//!
//! Runs the bootstrap gates, shock replay and optional ablation, then persists the tables.

use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use super::ablation::AblationOutcome;
use super::ablation::Metrics;
use super::ablation::run_ablation_study;
use super::bootstrap::BootstrapDraw;
use super::bootstrap::RobustnessGates;
use super::bootstrap::block_bootstrap_metrics;
use super::scenarios::ScenarioOutcome;
use super::scenarios::ShockScenario;
use super::scenarios::default_shocks;
use super::scenarios::replay_shocks;
use crate::artifacts::ArtifactWriter;
use crate::artifacts::render_table;
use crate::config::GovernanceFlags;
use crate::config::RunContext;
use crate::error::Result;

pub const STAGE: &str = "robustness";

/// Callback re-running the downstream pipeline under a set of governance flags.
pub type AblationRunner<'a> = &'a mut dyn FnMut(&GovernanceFlags) -> Result<Metrics>;

#[derive(Clone, Debug, Serialize)]
struct GateSummary {
  max_drawdown_threshold: f64,
  cagr_target: f64,
  exceedance_probability: f64,
  cagr_lower_bound: f64,
  alpha: f64,
  passes: bool,
}

impl From<&RobustnessGates> for GateSummary {
  fn from(g: &RobustnessGates) -> Self {
    Self {
      max_drawdown_threshold: g.max_drawdown_threshold,
      cagr_target: g.cagr_target,
      exceedance_probability: g.exceedance_probability,
      cagr_lower_bound: g.cagr_lower_bound,
      alpha: g.alpha,
      passes: g.passes(),
    }
  }
}

#[derive(Clone, Debug)]
pub struct RobustnessReport {
  pub draws: Vec<BootstrapDraw>,
  pub gates: RobustnessGates,
  pub scenarios: Vec<ScenarioOutcome>,
  pub ablation: Option<AblationOutcome>,
  /// Files written, empty when no writer was supplied.
  pub artifacts: Vec<PathBuf>,
}

impl RobustnessReport {
  /// Console summary of the gates and the scenario drawdowns.
  pub fn summary_table(&self) -> String {
    let g = &self.gates;
    let gates = render_table(
      &["gate", "value", "limit"],
      &[
        vec![
          "P(MaxDD <= threshold)".into(),
          format!("{:.4}", g.exceedance_probability),
          format!("<= {:.4}", 1.0 - g.alpha),
        ],
        vec![
          "CAGR lower bound".into(),
          format!("{:.4}", g.cagr_lower_bound),
          format!(">= {:.4}", g.cagr_target),
        ],
        vec!["passes".into(), g.passes().to_string(), String::new()],
      ],
    );
    let rows: Vec<Vec<String>> = self
      .scenarios
      .iter()
      .map(|s| {
        vec![
          s.scenario.clone(),
          s.length.to_string(),
          format!("{:.4}", s.max_drawdown),
          format!("{:.4}", s.cagr),
        ]
      })
      .collect();
    let scenarios = render_table(&["scenario", "length", "max_drawdown", "cagr"], &rows);
    format!("{gates}\n{scenarios}")
  }
}

/// Bootstrap gates, shock replay (default shocks when `scenarios` is `None`) and, when a
/// runner is given, the ablation of every configured governance feature.
pub fn run_robustness_lab(
  returns: &[f64],
  ctx: &RunContext,
  scenarios: Option<&[ShockScenario]>,
  ablation_runner: Option<AblationRunner<'_>>,
  writer: Option<&ArtifactWriter>,
) -> Result<RobustnessReport> {
  let params = &ctx.thresholds().robustness;
  let (draws, gates) = block_bootstrap_metrics(returns, params, ctx.stream_seed(STAGE))?;

  let defaults;
  let shocks = match scenarios {
    Some(s) => s,
    None => {
      defaults = default_shocks();
      defaults.as_slice()
    }
  };
  let scenario_outcomes = replay_shocks(
    returns,
    shocks,
    params.scale_scenarios_to_vol,
    params.periods_per_year,
  )?;

  let ablation = match ablation_runner {
    Some(runner) => Some(run_ablation_study(
      runner,
      &params.ablation_features,
      GovernanceFlags::default(),
    )?),
    None => None,
  };

  let mut report = RobustnessReport {
    draws,
    gates,
    scenarios: scenario_outcomes,
    ablation,
    artifacts: Vec::new(),
  };

  if let Some(w) = writer {
    let mut paths = vec![
      w.write_csv(STAGE, "bootstrap.csv", &report.draws)?,
      w.write_csv(STAGE, "scenarios.csv", &report.scenarios)?,
      w.write_json(STAGE, "summary.json", &GateSummary::from(&report.gates))?,
      w.write_text(STAGE, "summary.txt", &report.summary_table())?,
    ];
    if let Some(a) = &report.ablation {
      paths.push(w.write_csv(STAGE, "ablation.csv", &a.table)?);
    }
    report.artifacts = paths;
  }

  info!(
    passes = report.gates.passes(),
    scenarios = report.scenarios.len(),
    ablation = report.ablation.is_some(),
    "robustness lab done"
  );
  Ok(report)
}

#[cfg(test)]
mod tests {
  use std::fs;

  use super::*;
  use crate::config::Thresholds;

  fn ctx(dir: &std::path::Path, draws: usize) -> RunContext {
    let mut t = Thresholds::default();
    t.robustness.draws = draws;
    t.robustness.ablation_features = vec!["regime_tilt".into(), "no_trade_rule".into()];
    RunContext::new(21, t, dir).unwrap()
  }

  fn returns() -> Vec<f64> {
    (0..400)
      .map(|t| 0.0005 + 0.01 * (((t * 29) % 31) as f64 / 31.0 - 0.5))
      .collect()
  }

  #[test]
  fn writes_every_table() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = ctx(tmp.path(), 50);
    let writer = ArtifactWriter::new(&ctx);
    let mut runner = |flags: &GovernanceFlags| -> Result<Metrics> {
      let mut m = Metrics::new();
      m.insert("sharpe".into(), if flags.regime_tilt { 0.8 } else { 0.6 });
      Ok(m)
    };
    let report = run_robustness_lab(&returns(), &ctx, None, Some(&mut runner), Some(&writer)).unwrap();
    assert_eq!(report.draws.len(), 50);
    assert_eq!(report.scenarios.len(), 4);
    assert_eq!(report.ablation.as_ref().unwrap().table.len(), 2);
    for name in ["bootstrap.csv", "scenarios.csv", "summary.json", "summary.txt", "ablation.csv", "manifest.json"] {
      assert!(tmp.path().join(STAGE).join(name).exists(), "{name} missing");
    }
    let summary: serde_json::Value =
      serde_json::from_str(&fs::read_to_string(tmp.path().join(STAGE).join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["passes"], report.gates.passes());
  }

  #[test]
  fn lab_is_reproducible_without_writer() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = ctx(tmp.path(), 30);
    let a = run_robustness_lab(&returns(), &ctx, None, None, None).unwrap();
    let b = run_robustness_lab(&returns(), &ctx, None, None, None).unwrap();
    assert_eq!(a.draws, b.draws);
    assert!(a.artifacts.is_empty());
    assert!(a.ablation.is_none());
    assert!(a.summary_table().contains("CAGR lower bound"));
  }
}
