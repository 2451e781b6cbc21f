//! # Research Pipeline
//!
//! $$
//! w = (1-\lambda_t)\,w^{\text{meta}} + \lambda_t\,w^{\text{HRP}},\qquad \lambda_t = \text{tilt}(p^{\text{crisis}}_t)
//! $$
//!
//! Factors, estimates, allocation, regime tilt, mapping and robustness, run in that order with
//! each stage's artefacts written under its own directory.

use ndarray::Array1;
use ndarray::Array2;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::allocators::AllocationOutput;
use crate::allocators::clip_normalise;
use crate::allocators::hrp_weights;
use crate::allocators::run_allocation;
use crate::artifacts::ArtifactWriter;
use crate::config::GovernanceFlags;
use crate::config::RunContext;
use crate::error::Result;
use crate::estimates::EstimateOutput;
use crate::estimates::run_estimates;
use crate::factors::FactorOutput;
use crate::factors::run_factor_pipeline;
use crate::mapping::Liquidity;
use crate::mapping::MappingInputs;
use crate::mapping::MappingOutput;
use crate::mapping::map_to_instruments;
use crate::panel::MacroSeries;
use crate::panel::ReturnPanel;
use crate::regime::RegimeRecord;
use crate::regime::RegimeState;
use crate::regime::regime_probability;
use crate::robustness::AblationRunner;
use crate::robustness::Metrics;
use crate::robustness::RobustnessReport;
use crate::robustness::cagr;
use crate::robustness::max_drawdown;
use crate::robustness::run_robustness_lab;
use crate::robustness::sharpe;

/// Everything a run reads besides the configuration.
#[derive(Clone, Debug)]
pub struct PipelineInputs {
  pub panel: ReturnPanel,
  pub macro_series: MacroSeries,
  /// Factor covariance of the previous run, for EWMA smoothing and drift.
  pub previous_sigma: Option<Array2<f64>>,
  /// Instrument weights currently held.
  pub previous_weights: Option<Array1<f64>>,
  pub liquidity: Option<Liquidity>,
  /// Re-run the downstream stages once per governance feature.
  pub run_ablation: bool,
}

impl PipelineInputs {
  pub fn new(panel: ReturnPanel) -> Self {
    Self {
      panel,
      macro_series: MacroSeries::default(),
      previous_sigma: None,
      previous_weights: None,
      liquidity: None,
      run_ablation: false,
    }
  }
}

/// Stages that depend on the governance flags.
#[derive(Clone, Debug)]
pub struct Downstream {
  pub estimates: EstimateOutput,
  pub allocation: AllocationOutput,
  pub regime: Vec<RegimeRecord>,
  /// Blend weight toward the crisis allocation actually applied.
  pub tilt: f64,
  pub crisis_weights: Array1<f64>,
  pub factor_weights: Array1<f64>,
  pub mapping: MappingOutput,
  /// In-sample returns of the mapped instrument weights.
  pub portfolio_returns: Vec<f64>,
  pub metrics: Metrics,
}

#[derive(Clone, Debug)]
pub struct PipelineOutput {
  pub factors: FactorOutput,
  pub downstream: Downstream,
  pub robustness: RobustnessReport,
}

/// Sharpe, drawdown and CAGR of a return series, the metrics compared by the ablation.
pub fn performance_metrics(returns: &[f64], periods_per_year: usize) -> Metrics {
  let mut m = Metrics::new();
  m.insert("sharpe".into(), sharpe(returns, periods_per_year));
  m.insert("max_drawdown".into(), max_drawdown(returns));
  m.insert("cagr".into(), cagr(returns, periods_per_year));
  m
}

/// Estimation through mapping on an already computed factor set.
pub fn run_downstream(
  inputs: &PipelineInputs,
  factors: &FactorOutput,
  ctx: &RunContext,
  flags: &GovernanceFlags,
) -> Result<Downstream> {
  let panel = &inputs.panel;
  let factor_set = factors.factors();
  let sample = factor_set.view();
  let macro_features = inputs.macro_series.feature_matrix(panel.n_obs());

  let estimates = run_estimates(
    sample,
    macro_features.as_ref(),
    ctx,
    flags,
    inputs.previous_sigma.as_ref(),
  )?;
  let sigma = &estimates.sigma.sigma;
  let allocation = run_allocation(&estimates.mu.mu_post, sigma, sample, None, ctx, flags)?;

  let regime = regime_probability(panel, &inputs.macro_series, &ctx.thresholds().regime)?;
  let last = regime.last();
  let tilt = match last {
    Some(r) if flags.regime_tilt => r.tilt,
    _ => 0.0,
  };
  let crisis_weights = hrp_weights(sigma)?;
  let factor_weights = clip_normalise(&(&allocation.weights * (1.0 - tilt) + &crisis_weights * tilt));
  if let Some(r) = last {
    info!(p_crisis = r.p_crisis, active = r.state == RegimeState::Active, tilt, "regime tilt applied");
  }

  let signs = factors.signs();
  let mapping = map_to_instruments(
    &MappingInputs {
      instrument_returns: panel.returns(),
      instrument_names: panel.instruments(),
      factor_returns: sample,
      factor_names: &factor_set.names,
      factor_weights: &factor_weights,
      signs: &signs,
      previous: inputs.previous_weights.as_ref(),
      liquidity: inputs.liquidity.as_ref(),
    },
    ctx,
    flags,
  )?;

  let portfolio_returns = panel.returns().dot(&mapping.weights).to_vec();
  let metrics = performance_metrics(&portfolio_returns, ctx.thresholds().robustness.periods_per_year);
  Ok(Downstream {
    estimates,
    allocation,
    regime,
    tilt,
    crisis_weights,
    factor_weights,
    mapping,
    portfolio_returns,
    metrics,
  })
}

#[derive(Serialize)]
struct MuRow<'a> {
  factor: &'a str,
  mu_post: f64,
  mu_star: f64,
  mu_eq: f64,
}

#[derive(Serialize)]
struct GeneratorWeightRow<'a> {
  generator: String,
  produced_by: String,
  factor: &'a str,
  weight: f64,
}

#[derive(Serialize)]
struct MetaWeightRow {
  generator: String,
  weight: f64,
}

#[derive(Serialize)]
struct AllocationRow<'a> {
  factor: &'a str,
  meta: f64,
  crisis: f64,
  weight: f64,
  risk_contribution: f64,
}

#[derive(Serialize)]
struct InstrumentRow<'a> {
  instrument: &'a str,
  label: &'a str,
  baseline: f64,
  raw: f64,
  weight: f64,
}

fn write_downstream(w: &ArtifactWriter, factors: &FactorOutput, d: &Downstream) -> Result<()> {
  let names = &factors.factors().names;

  let mu = &d.estimates.mu;
  w.write_matrix("estimates", "sigma.csv", "factor", names, names, d.estimates.sigma.sigma.view())?;
  w.write_csv(
    "estimates",
    "mu.csv",
    names.iter().enumerate().map(|(k, f)| MuRow {
      factor: f,
      mu_post: mu.mu_post[k],
      mu_star: mu.mu_star[k],
      mu_eq: mu.mu_eq[k],
    }),
  )?;
  w.write_json("estimates", "blend.json", mu)?;
  w.write_csv("estimates", "candidates.csv", &d.estimates.sigma.candidates)?;
  if let Some(drift) = &d.estimates.sigma.drift {
    w.write_json("estimates", "drift.json", drift)?;
  }

  let a = &d.allocation;
  w.write_csv(
    "weights",
    "generators.csv",
    a.generators.iter().flat_map(|run| {
      names.iter().enumerate().map(move |(k, f)| GeneratorWeightRow {
        generator: run.generator.to_string(),
        produced_by: run.produced_by.to_string(),
        factor: f,
        weight: run.allocation.weights[k],
      })
    }),
  )?;
  w.write_csv(
    "weights",
    "meta.csv",
    a.meta_generators
      .iter()
      .zip(a.meta_weights.iter())
      .map(|(g, weight)| MetaWeightRow {
        generator: g.to_string(),
        weight: *weight,
      }),
  )?;
  w.write_csv(
    "weights",
    "allocation.csv",
    names.iter().enumerate().map(|(k, f)| AllocationRow {
      factor: f,
      meta: a.weights[k],
      crisis: d.crisis_weights[k],
      weight: d.factor_weights[k],
      risk_contribution: a.risk_contributions[k],
    }),
  )?;

  let m = &d.mapping;
  w.write_csv(
    "mapping",
    "weights.csv",
    m.instruments.iter().enumerate().map(|(i, name)| InstrumentRow {
      instrument: name,
      label: &m.labels[i],
      baseline: m.baseline[i],
      raw: m.raw_weights[i],
      weight: m.weights[i],
    }),
  )?;
  w.write_csv("mapping", "betas.csv", m.beta_rows())?;
  w.write_json("mapping", "summary.json", &m.summary)?;

  w.write_csv("regime", "committee.csv", &d.regime)?;
  Ok(())
}

/// Full run: factor stage, the flag-dependent stages and the robustness lab.
pub fn run_pipeline(
  inputs: &PipelineInputs,
  ctx: &RunContext,
  flags: &GovernanceFlags,
  writer: Option<&ArtifactWriter>,
) -> Result<PipelineOutput> {
  let factors = run_factor_pipeline(&inputs.panel, Some(&inputs.macro_series), ctx, writer)?;
  let downstream = run_downstream(inputs, &factors, ctx, flags)?;
  if let Some(w) = writer {
    write_downstream(w, &factors, &downstream)?;
  }

  let mut runner = |variant: &GovernanceFlags| -> Result<Metrics> {
    run_downstream(inputs, &factors, ctx, variant).map(|d| d.metrics)
  };
  let ablation: Option<AblationRunner<'_>> = if inputs.run_ablation {
    Some(&mut runner)
  } else {
    None
  };
  let robustness = run_robustness_lab(&downstream.portfolio_returns, ctx, None, ablation, writer)?;
  if !robustness.gates.passes() {
    warn!(
      exceedance = robustness.gates.exceedance_probability,
      cagr_lower = robustness.gates.cagr_lower_bound,
      "acceptance gates not met"
    );
  }

  info!(
    seed = ctx.seed(),
    sharpe = downstream.metrics.get("sharpe").copied().unwrap_or_default(),
    "pipeline done"
  );
  Ok(PipelineOutput {
    factors,
    downstream,
    robustness,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::NaiveDate;
  use tracing_test::traced_test;

  use super::*;
  use crate::config::Thresholds;

  fn inputs() -> PipelineInputs {
    let (t, n) = (160, 6);
    let start = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
    let dates = (0..t).map(|i| start + chrono::Days::new(i as u64)).collect();
    let names = (0..n).map(|j| format!("etf_{j}")).collect();
    let returns = Array2::from_shape_fn((t, n), |(i, j)| {
      let common = 0.006 * (((i * 11) % 23) as f64 / 23.0 - 0.5);
      let own = 0.01 * ((((i + 1) * (j + 7)) % 29) as f64 / 29.0 - 0.5);
      0.0003 * (j + 1) as f64 + common + own
    });
    PipelineInputs::new(ReturnPanel::new(dates, names, returns).unwrap())
  }

  fn ctx(dir: &std::path::Path) -> RunContext {
    let mut t = Thresholds::default();
    t.robustness.draws = 40;
    t.robustness.block_size = 20;
    t.mapping.bootstrap_draws = 30;
    t.factors.permutations = 20;
    RunContext::new(17, t, dir).unwrap()
  }

  #[test]
  #[traced_test]
  fn full_run_writes_every_stage() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = ctx(tmp.path());
    let writer = ArtifactWriter::new(&ctx);
    let out = run_pipeline(&inputs(), &ctx, &GovernanceFlags::default(), Some(&writer)).unwrap();

    assert_abs_diff_eq!(out.downstream.factor_weights.sum(), 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(out.downstream.mapping.weights.sum(), 1.0, epsilon = 1e-6);
    assert_eq!(out.downstream.portfolio_returns.len(), 160);
    assert!(out.robustness.ablation.is_none());
    for stage in ["factors", "estimates", "weights", "mapping", "regime", "robustness"] {
      assert!(tmp.path().join(stage).join("manifest.json").exists(), "{stage} manifest missing");
    }
    assert!(tmp.path().join("weights").join("allocation.csv").exists());
    assert!(logs_contain("pipeline done"));
  }

  #[test]
  fn ablation_reruns_downstream_stages() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = ctx(tmp.path());
    let mut inputs = inputs();
    inputs.run_ablation = true;
    let out = run_pipeline(&inputs, &ctx, &GovernanceFlags::default(), None).unwrap();
    let ablation = out.robustness.ablation.unwrap();
    assert_eq!(ablation.baseline.len(), 3);
    assert_eq!(ablation.table.len(), 3 * ctx.thresholds().robustness.ablation_features.len());
  }

  #[test]
  fn tilt_is_zero_when_regime_tilt_is_off() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = ctx(tmp.path());
    let inputs = inputs();
    let factors = run_factor_pipeline(&inputs.panel, None, &ctx, None).unwrap();
    let flags = GovernanceFlags::without("regime_tilt").unwrap();
    let d = run_downstream(&inputs, &factors, &ctx, &flags).unwrap();
    assert_eq!(d.tilt, 0.0);
    for (a, b) in d.factor_weights.iter().zip(d.allocation.weights.iter()) {
      assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
    }
  }

  #[test]
  fn metrics_cover_the_ablation_keys() {
    let m = performance_metrics(&[0.01, -0.02, 0.015], 252);
    assert_eq!(m.keys().collect::<Vec<_>>(), vec!["cagr", "max_drawdown", "sharpe"]);
  }
}
