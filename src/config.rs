//! # Run Configuration
//!
//! $$
//! \text{ctx} = (s, \Theta, \text{out})
//! $$
//!
//! Run context and threshold sections, validated once at load time.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use rand::rngs::StdRng;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;
use crate::regime::CommitteeWeights;
use crate::rng;

/// Covariance aggregation used by the estimation stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SigmaMode {
  /// Element-wise median of the candidates.
  #[default]
  Consensus,
  /// Affine-invariant geometric median with consensus fallback.
  GeometricMedian,
}

/// Thresholds for the estimation stage.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EstimateThresholds {
  /// Information-ratio cutoff below which views fall back to equilibrium.
  pub tau_ir: f64,
  /// Annualised volatility target used in reverse optimisation.
  pub vol_target: f64,
  /// EWMA weight on the previous covariance.
  pub ewma_lambda: f64,
  /// Covariance aggregation mode.
  pub sigma_mode: SigmaMode,
  /// L1 penalty grid for the sparse precision estimator.
  pub glasso_lambdas: Vec<f64>,
  /// Time-ordered CV folds for ridge stacking.
  pub cv_splits: usize,
  /// Iteration budget for the geometric median.
  pub spd_max_iter: usize,
  /// Convergence tolerance for the geometric median.
  pub spd_tol: f64,
  /// Relative Frobenius drift that resets the EWMA to the fresh estimate.
  pub drift_reset: f64,
}

impl Default for EstimateThresholds {
  fn default() -> Self {
    Self {
      tau_ir: 0.15,
      vol_target: 0.11,
      ewma_lambda: 0.5,
      sigma_mode: SigmaMode::Consensus,
      glasso_lambdas: vec![0.01, 0.025, 0.05, 0.075, 0.1],
      cv_splits: 5,
      spd_max_iter: 200,
      spd_tol: 1e-6,
      drift_reset: 0.5,
    }
  }
}

/// Thresholds for generators and the meta-learner.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AllocationThresholds {
  /// ERC tolerance on cluster risk-contribution shares.
  pub rc_tol: f64,
  /// Iteration budget of the ERC balancer.
  pub erc_max_iter: usize,
  /// Half-L1 turnover cap against previous weights.
  pub turnover_cap: f64,
  /// Gross leverage cap.
  pub gross_leverage_cap: f64,
  /// Scenario CVaR cap (loss units).
  pub cvar_cap: f64,
  /// CVaR tail probability.
  pub cvar_alpha: f64,
  /// Scenario EDaR cap (drawdown units).
  pub edar_cap: f64,
  /// EDaR confidence level.
  pub edar_alpha: f64,
  /// DRO radius.
  pub dro_rho: f64,
  /// Risk aversion on the quadratic term.
  pub risk_aversion: f64,
  /// Number of contiguous risk clusters when no taxonomy is supplied.
  pub n_clusters: usize,
  /// Maximum number of generators blended by the meta-learner.
  pub meta_j_max: usize,
  /// Turnover penalty of the meta-learner.
  pub meta_penalty_to: f64,
}

impl Default for AllocationThresholds {
  fn default() -> Self {
    Self {
      rc_tol: 0.02,
      erc_max_iter: 50,
      turnover_cap: 0.40,
      gross_leverage_cap: 1.75,
      cvar_cap: 0.10,
      cvar_alpha: 0.05,
      edar_cap: 0.20,
      edar_alpha: 0.8,
      dro_rho: 0.05,
      risk_aversion: 1e-4,
      n_clusters: 3,
      meta_j_max: 3,
      meta_penalty_to: 0.1,
    }
  }
}

/// Thresholds for the factor-to-instrument mapping.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MappingThresholds {
  /// Per-factor exposure deviation cap, also the meta-learner TE penalty.
  pub te_max_factor: f64,
  /// Portfolio tracking-error cap against the baseline.
  pub te_portfolio_cap: f64,
  /// Trade notional cap as a fraction of ADV.
  pub adv_cap_ratio: f64,
  /// Beta CI width above which instrument weights are shrunk.
  pub tau_beta_ci_width: f64,
  /// Ridge penalty for rolling betas.
  pub lambda_beta: f64,
  /// Bootstrap draws per beta window.
  pub bootstrap_draws: usize,
  /// Two-sided CI significance (0.2 gives an 80% band).
  pub ci_alpha: f64,
  /// Lower bound on the rolling window.
  pub window_min: usize,
  /// Upper bound on the rolling window.
  pub window_max: usize,
}

impl Default for MappingThresholds {
  fn default() -> Self {
    Self {
      te_max_factor: 0.02,
      te_portfolio_cap: 0.02,
      adv_cap_ratio: 0.05,
      tau_beta_ci_width: 0.25,
      lambda_beta: 1.0,
      bootstrap_draws: 200,
      ci_alpha: 0.2,
      window_min: 12,
      window_max: 60,
    }
  }
}

/// Regime committee and hysteresis thresholds.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RegimeThresholds {
  pub on: f64,
  pub off: f64,
  pub dwell_days: usize,
  pub cooldown_days: usize,
  pub activate_streak: usize,
  pub deactivate_streak: usize,
  /// Committee component weights, renormalised before use.
  pub weights: CommitteeWeights,
  /// Rolling window for realised volatility.
  pub vol_window: usize,
  /// Rolling window for the volatility median.
  pub vol_median_window: usize,
}

impl Default for RegimeThresholds {
  fn default() -> Self {
    Self {
      on: 0.65,
      off: 0.45,
      dwell_days: 20,
      cooldown_days: 10,
      activate_streak: 3,
      deactivate_streak: 3,
      weights: CommitteeWeights::default(),
      vol_window: 21,
      vol_median_window: 63,
    }
  }
}

/// Robustness lab thresholds and acceptance gates.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RobustnessThresholds {
  pub block_size: usize,
  pub draws: usize,
  pub periods_per_year: usize,
  /// Confidence level of the gates (0.95 reads the 5th percentile).
  pub alpha: f64,
  pub max_drawdown_threshold: f64,
  pub cagr_target: f64,
  pub scale_scenarios_to_vol: bool,
  /// Governance switches toggled by the ablation study.
  pub ablation_features: Vec<String>,
}

impl Default for RobustnessThresholds {
  fn default() -> Self {
    Self {
      block_size: 60,
      draws: 1000,
      periods_per_year: 252,
      alpha: 0.95,
      max_drawdown_threshold: -0.25,
      cagr_target: 0.03,
      scale_scenarios_to_vol: true,
      ablation_features: crate::robustness::DEFAULT_FEATURES
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }
}

/// Factor orthogonality and validation thresholds.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FactorThresholds {
  /// Pairs with `|rho|` above this are averaged into one factor.
  pub corr_threshold: f64,
  /// Correlation condition number above which the set is whitened.
  pub cond_threshold: f64,
  pub n_splits: usize,
  pub embargo: usize,
  pub fdr_alpha: f64,
  pub permutations: usize,
}

impl Default for FactorThresholds {
  fn default() -> Self {
    Self {
      corr_threshold: crate::factors::orthogonality::DEFAULT_CORR_THRESHOLD,
      cond_threshold: crate::factors::orthogonality::DEFAULT_COND_THRESHOLD,
      n_splits: 5,
      embargo: 5,
      fdr_alpha: 0.1,
      permutations: 200,
    }
  }
}

/// Every numeric threshold consumed by the core.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Thresholds {
  pub factors: FactorThresholds,
  pub estimates: EstimateThresholds,
  pub allocation: AllocationThresholds,
  pub mapping: MappingThresholds,
  pub regime: RegimeThresholds,
  pub robustness: RobustnessThresholds,
}

fn ensure(cond: bool, field: &str, reason: &str) -> Result<()> {
  if cond {
    Ok(())
  } else {
    Err(Error::config(field, reason))
  }
}

fn ensure_non_negative(value: f64, field: &str) -> Result<()> {
  ensure(value.is_finite() && value >= 0.0, field, "must be finite and non-negative")
}

impl Thresholds {
  /// Parse thresholds from a TOML document and validate them.
  pub fn from_toml_str(raw: &str) -> Result<Self> {
    let thresholds: Thresholds = toml::from_str(raw)?;
    thresholds.validate()?;
    Ok(thresholds)
  }

  /// Check every configuration invariant. Called once, before any computation.
  pub fn validate(&self) -> Result<()> {
    let f = &self.factors;
    ensure(
      f.corr_threshold > 0.0 && f.corr_threshold < 1.0,
      "factors.corr_threshold",
      "must lie in (0, 1)",
    )?;
    ensure(f.cond_threshold >= 1.0, "factors.cond_threshold", "must be at least 1")?;
    ensure(f.n_splits >= 2, "factors.n_splits", "must be at least 2")?;
    ensure(
      f.fdr_alpha > 0.0 && f.fdr_alpha < 1.0,
      "factors.fdr_alpha",
      "must lie in (0, 1)",
    )?;
    ensure(f.permutations >= 1, "factors.permutations", "must be at least 1")?;

    let e = &self.estimates;
    ensure(e.tau_ir.is_finite(), "estimates.tau_ir", "must be finite")?;
    ensure_non_negative(e.vol_target, "estimates.vol_target")?;
    ensure(
      (0.0..=1.0).contains(&e.ewma_lambda),
      "estimates.ewma_lambda",
      "must lie in [0, 1]",
    )?;
    ensure(
      !e.glasso_lambdas.is_empty() && e.glasso_lambdas.iter().all(|l| *l > 0.0),
      "estimates.glasso_lambdas",
      "must be a non-empty list of positive penalties",
    )?;
    ensure(e.spd_max_iter >= 1, "estimates.spd_max_iter", "must be at least 1")?;
    ensure(e.spd_tol > 0.0, "estimates.spd_tol", "must be positive")?;
    ensure_non_negative(e.drift_reset, "estimates.drift_reset")?;

    let a = &self.allocation;
    ensure_non_negative(a.rc_tol, "allocation.rc_tol")?;
    ensure(a.erc_max_iter >= 1, "allocation.erc_max_iter", "must be at least 1")?;
    ensure_non_negative(a.turnover_cap, "allocation.turnover_cap")?;
    ensure_non_negative(a.gross_leverage_cap, "allocation.gross_leverage_cap")?;
    ensure_non_negative(a.cvar_cap, "allocation.cvar_cap")?;
    ensure_non_negative(a.edar_cap, "allocation.edar_cap")?;
    ensure(
      a.cvar_alpha > 0.0 && a.cvar_alpha < 1.0,
      "allocation.cvar_alpha",
      "must lie in (0, 1)",
    )?;
    ensure(
      a.edar_alpha > 0.0 && a.edar_alpha < 1.0,
      "allocation.edar_alpha",
      "must lie in (0, 1)",
    )?;
    ensure_non_negative(a.dro_rho, "allocation.dro_rho")?;
    ensure_non_negative(a.risk_aversion, "allocation.risk_aversion")?;
    ensure(a.n_clusters >= 1, "allocation.n_clusters", "cluster list must not be empty")?;
    ensure(a.meta_j_max >= 1, "allocation.meta_j_max", "must be at least 1")?;
    ensure_non_negative(a.meta_penalty_to, "allocation.meta_penalty_to")?;

    let m = &self.mapping;
    ensure_non_negative(m.te_max_factor, "mapping.te_max_factor")?;
    ensure_non_negative(m.te_portfolio_cap, "mapping.te_portfolio_cap")?;
    ensure_non_negative(m.adv_cap_ratio, "mapping.adv_cap_ratio")?;
    ensure(
      m.tau_beta_ci_width > 0.0,
      "mapping.tau_beta_ci_width",
      "must be positive",
    )?;
    ensure_non_negative(m.lambda_beta, "mapping.lambda_beta")?;
    ensure(m.bootstrap_draws >= 1, "mapping.bootstrap_draws", "must be at least 1")?;
    ensure(
      m.ci_alpha > 0.0 && m.ci_alpha < 1.0,
      "mapping.ci_alpha",
      "must lie in (0, 1)",
    )?;
    ensure(
      m.window_min >= 2 && m.window_min <= m.window_max,
      "mapping.window_min",
      "must be at least 2 and not exceed mapping.window_max",
    )?;

    let r = &self.regime;
    ensure(
      (0.0..=1.0).contains(&r.on) && (0.0..=1.0).contains(&r.off),
      "regime.on",
      "thresholds must lie in [0, 1]",
    )?;
    ensure(r.on > r.off, "regime.on", "must strictly exceed regime.off")?;
    ensure(r.activate_streak >= 1, "regime.activate_streak", "must be at least 1")?;
    ensure(
      r.deactivate_streak >= 1,
      "regime.deactivate_streak",
      "must be at least 1",
    )?;
    r.weights.normalised()?;
    ensure(r.vol_window >= 2, "regime.vol_window", "must be at least 2")?;
    ensure(
      r.vol_median_window >= 1,
      "regime.vol_median_window",
      "must be at least 1",
    )?;

    let b = &self.robustness;
    ensure(b.block_size >= 1, "robustness.block_size", "must be at least 1")?;
    ensure(b.draws >= 1, "robustness.draws", "must be at least 1")?;
    ensure(
      b.periods_per_year >= 1,
      "robustness.periods_per_year",
      "must be at least 1",
    )?;
    ensure(
      b.alpha > 0.0 && b.alpha < 1.0,
      "robustness.alpha",
      "must lie in (0, 1)",
    )?;
    ensure(
      b.max_drawdown_threshold <= 0.0 && b.max_drawdown_threshold >= -1.0,
      "robustness.max_drawdown_threshold",
      "must lie in [-1, 0]",
    )?;
    ensure(
      !b.ablation_features.is_empty(),
      "robustness.ablation_features",
      "must not be empty",
    )?;
    for feature in &b.ablation_features {
      GovernanceFlags::without(feature)?;
    }

    Ok(())
  }
}

/// Governance switches; all on by default. The ablation study turns them off one at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct GovernanceFlags {
  /// Information-ratio gated equilibrium fallback.
  pub bl_fallback: bool,
  /// PSD projection of covariance estimates.
  pub sigma_psd: bool,
  /// Reset of the EWMA covariance when drift exceeds the threshold.
  pub drift_trigger: bool,
  /// Turnover and tracking-error penalties in the meta-learner.
  pub meta_to_te: bool,
  /// Crisis tilt of the final allocation.
  pub regime_tilt: bool,
  /// ADV clipping of trade deltas.
  pub no_trade_rule: bool,
}

impl Default for GovernanceFlags {
  fn default() -> Self {
    Self {
      bl_fallback: true,
      sigma_psd: true,
      drift_trigger: true,
      meta_to_te: true,
      regime_tilt: true,
      no_trade_rule: true,
    }
  }
}

impl GovernanceFlags {
  /// Switch a named feature on or off.
  pub fn set(&mut self, feature: &str, enabled: bool) -> Result<()> {
    let slot = match feature {
      "bl_fallback" => &mut self.bl_fallback,
      "sigma_psd" => &mut self.sigma_psd,
      "drift_trigger" => &mut self.drift_trigger,
      "meta_to_te" => &mut self.meta_to_te,
      "regime_tilt" => &mut self.regime_tilt,
      "no_trade_rule" => &mut self.no_trade_rule,
      other => {
        return Err(Error::config(
          "robustness.ablation_features",
          format!("unknown governance feature {other}"),
        ));
      }
    };
    *slot = enabled;
    Ok(())
  }

  /// All features on except `feature`.
  pub fn without(feature: &str) -> Result<Self> {
    let mut flags = Self::default();
    flags.set(feature, false)?;
    Ok(flags)
  }
}

/// On-disk run file: seed, output directory and thresholds.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
struct RunFile {
  seed: u64,
  output_dir: PathBuf,
  thresholds: Thresholds,
}

impl Default for RunFile {
  fn default() -> Self {
    Self {
      seed: 42,
      output_dir: PathBuf::from("artifacts"),
      thresholds: Thresholds::default(),
    }
  }
}

/// Explicit per-run context threaded through every component call.
#[derive(Clone, Debug)]
pub struct RunContext {
  seed: u64,
  thresholds: Thresholds,
  output_dir: PathBuf,
}

impl RunContext {
  /// Build a context, validating the thresholds.
  pub fn new(seed: u64, thresholds: Thresholds, output_dir: impl Into<PathBuf>) -> Result<Self> {
    thresholds.validate()?;
    Ok(Self {
      seed,
      thresholds,
      output_dir: output_dir.into(),
    })
  }

  /// Load a context from a TOML run file with `seed`, `output_dir` and `[thresholds.*]`.
  pub fn from_toml_file(path: &Path) -> Result<Self> {
    let raw = fs::read_to_string(path)?;
    let file: RunFile = toml::from_str(&raw)?;
    Self::new(file.seed, file.thresholds, file.output_dir)
  }

  pub fn seed(&self) -> u64 {
    self.seed
  }

  pub fn thresholds(&self) -> &Thresholds {
    &self.thresholds
  }

  pub fn output_dir(&self) -> &Path {
    &self.output_dir
  }

  /// Copy of the context with different thresholds (used by the ablation study).
  pub fn with_thresholds(&self, thresholds: Thresholds) -> Result<Self> {
    Self::new(self.seed, thresholds, self.output_dir.clone())
  }

  pub fn stream_seed(&self, stream: &str) -> u64 {
    rng::stream_seed(self.seed, stream)
  }

  pub fn rng(&self, stream: &str) -> StdRng {
    rng::stream_rng(self.seed, stream)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_validate() {
    assert!(Thresholds::default().validate().is_ok());
  }

  #[test]
  fn on_must_exceed_off() {
    let mut thresholds = Thresholds::default();
    thresholds.regime.on = 0.45;
    thresholds.regime.off = 0.45;
    let err = RunContext::new(1, thresholds, "out").unwrap_err();
    assert!(err.to_string().contains("regime.on"));
  }

  #[test]
  fn negative_caps_are_rejected() {
    let mut thresholds = Thresholds::default();
    thresholds.allocation.turnover_cap = -0.1;
    assert!(thresholds.validate().is_err());
  }

  #[test]
  fn factor_merge_threshold_must_be_a_correlation() {
    let mut thresholds = Thresholds::default();
    thresholds.factors.corr_threshold = 1.2;
    let err = thresholds.validate().unwrap_err();
    assert!(err.to_string().contains("factors.corr_threshold"));
  }

  #[test]
  fn empty_ablation_list_is_rejected() {
    let mut thresholds = Thresholds::default();
    thresholds.robustness.ablation_features.clear();
    assert!(thresholds.validate().is_err());
  }

  #[test]
  fn unknown_ablation_feature_is_rejected() {
    let mut thresholds = Thresholds::default();
    thresholds.robustness.ablation_features = vec!["warp_drive".into()];
    let err = thresholds.validate().unwrap_err();
    assert!(err.to_string().contains("warp_drive"));
    let flags = GovernanceFlags::without("regime_tilt").unwrap();
    assert!(!flags.regime_tilt && flags.bl_fallback);
  }

  #[test]
  fn toml_overrides_merge_with_defaults() {
    let raw = r#"
      [regime]
      on = 0.7
      off = 0.4

      [robustness]
      draws = 200
    "#;
    let thresholds = Thresholds::from_toml_str(raw).unwrap();
    assert_eq!(thresholds.regime.on, 0.7);
    assert_eq!(thresholds.regime.dwell_days, 20);
    assert_eq!(thresholds.robustness.draws, 200);
    assert_eq!(thresholds.robustness.block_size, 60);
  }

  #[test]
  fn run_file_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.toml");
    fs::write(
      &path,
      "seed = 7\noutput_dir = \"out\"\n[thresholds.estimates]\ntau_ir = 0.2\n",
    )
    .unwrap();
    let ctx = RunContext::from_toml_file(&path).unwrap();
    assert_eq!(ctx.seed(), 7);
    assert_eq!(ctx.thresholds().estimates.tau_ir, 0.2);
    assert_eq!(ctx.stream_seed("x"), rng::stream_seed(7, "x"));
  }
}
