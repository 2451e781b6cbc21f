//! # Ablation
//!
//! $$
//! \Delta_{f,m} = m\big(\text{pipeline} \setminus f\big) - m\big(\text{pipeline}\big)
//! $$
//!
//! Re-runs the downstream pipeline with one governance feature off at a time and tabulates metric deltas.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::config::GovernanceFlags;
use crate::error::Error;
use crate::error::Result;

/// Governance switches the study toggles by default.
pub const DEFAULT_FEATURES: &[&str] = &[
  "bl_fallback",
  "sigma_psd",
  "drift_trigger",
  "meta_to_te",
  "regime_tilt",
  "no_trade_rule",
];

pub type Metrics = BTreeMap<String, f64>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AblationRow {
  pub feature: String,
  pub metric: String,
  pub baseline: f64,
  pub variant: f64,
  pub delta: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AblationOutcome {
  pub baseline: Metrics,
  pub table: Vec<AblationRow>,
}

/// Run `runner` on `base_flags` and once per feature with that feature off.
///
/// Every run must report the same metric names as the baseline.
pub fn run_ablation_study<F>(mut runner: F, features: &[String], base_flags: GovernanceFlags) -> Result<AblationOutcome>
where
  F: FnMut(&GovernanceFlags) -> Result<Metrics>,
{
  if features.is_empty() {
    return Err(Error::InvalidInput("ablation needs at least one feature".into()));
  }
  let baseline = runner(&base_flags)?;
  if baseline.is_empty() {
    return Err(Error::InvalidInput("ablation runner returned no baseline metrics".into()));
  }

  let mut table = Vec::with_capacity(features.len() * baseline.len());
  for feature in features {
    let mut flags = base_flags;
    flags.set(feature, false)?;
    let variant = runner(&flags)?;
    if !variant.keys().eq(baseline.keys()) {
      return Err(Error::InvalidInput(format!(
        "ablation of {feature} reported metrics {:?}, baseline has {:?}",
        variant.keys().collect::<Vec<_>>(),
        baseline.keys().collect::<Vec<_>>()
      )));
    }
    for (metric, base) in &baseline {
      let v = variant[metric];
      table.push(AblationRow {
        feature: feature.clone(),
        metric: metric.clone(),
        baseline: *base,
        variant: v,
        delta: v - base,
      });
    }
    info!(feature = %feature, "ablation variant done");
  }
  Ok(AblationOutcome { baseline, table })
}
