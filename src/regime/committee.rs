//! # Regime Committee
//!
//! $$
//! p^{\text{crisis}}_t = w_h\,p^{\text{hmm}}_t + w_v\,p^{\text{vol}}_t + w_m\,p^{\text{macro}}_t,\quad w_h + w_v + w_m = 1
//! $$
//!
//! Crisis probability from a fixed Gaussian HMM filter, a volatility stress ratio and macro triggers.

use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;
use statrs::distribution::Continuous;
use statrs::distribution::Normal;
use tracing::info;

use super::hysteresis::HysteresisConfig;
use super::hysteresis::RegimeState;
use super::hysteresis::apply_hysteresis;
use super::hysteresis::tilt_lambda;
use crate::config::RegimeThresholds;
use crate::error::Error;
use crate::error::Result;
use crate::numeric;
use crate::panel::MacroSeries;
use crate::panel::ReturnPanel;
use crate::panel::forward_fill;

/// Crisis prior of the HMM filter, also its output on a flat series.
pub const HMM_PRIOR: f64 = 0.05;
/// Neutral probability for a missing component.
pub const NEUTRAL: f64 = 0.5;

const CALM_STAY: f64 = 0.97;
const CRISIS_STAY: f64 = 0.90;
const VOL_SMOOTHING: usize = 5;
const MACRO_SMOOTHING: usize = 3;
const INFLATION_WEIGHT: f64 = 0.4;
const PMI_WEIGHT: f64 = 0.35;
const REAL_RATE_WEIGHT: f64 = 0.25;
const PMI_THRESHOLD: f64 = 50.0;

/// Committee component weights; renormalised before use.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CommitteeWeights {
  pub hmm: f64,
  pub volatility: f64,
  #[serde(rename = "macro")]
  pub macro_: f64,
}

impl Default for CommitteeWeights {
  fn default() -> Self {
    Self {
      hmm: 0.5,
      volatility: 0.3,
      macro_: 0.2,
    }
  }
}

impl CommitteeWeights {
  /// `(hmm, volatility, macro)` scaled to sum to one.
  pub fn normalised(&self) -> Result<(f64, f64, f64)> {
    let parts = [self.hmm, self.volatility, self.macro_];
    if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
      return Err(Error::config("regime.weights", "weights must be finite and non-negative"));
    }
    let total: f64 = parts.iter().sum();
    if total <= 0.0 {
      return Err(Error::config("regime.weights", "weights must sum to a positive value"));
    }
    Ok((self.hmm / total, self.volatility / total, self.macro_ / total))
  }
}

/// One committee step.
#[derive(Clone, Debug, Serialize)]
pub struct RegimeRecord {
  pub date: NaiveDate,
  pub p_hmm: f64,
  pub p_volatility: f64,
  pub p_macro: f64,
  pub p_crisis: f64,
  pub state: RegimeState,
  pub tilt: f64,
}

/// Filtered crisis probability of a fixed calm/crisis Gaussian model.
///
/// Calm is `N(m, s)` and crisis `N(m - s, 2s)` with `m`, `s` the series mean and standard
/// deviation. A series with range below `1e-8` returns the prior everywhere.
pub fn hmm_crisis_probability(series: &[f64]) -> Vec<f64> {
  let clean: Vec<f64> = series
    .iter()
    .map(|x| if x.is_finite() { *x } else { 0.0 })
    .collect();
  let lo = clean.iter().cloned().fold(f64::INFINITY, f64::min);
  let hi = clean.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  if clean.is_empty() || hi - lo < 1e-8 {
    return vec![HMM_PRIOR; clean.len()];
  }

  let m = numeric::mean(&clean);
  let s = numeric::std_dev(&clean, 0);
  let (calm, crisis) = match (Normal::new(m, s), Normal::new(m - s, 2.0 * s)) {
    (Ok(c), Ok(k)) => (c, k),
    _ => return vec![HMM_PRIOR; clean.len()],
  };

  let mut p_crisis = HMM_PRIOR;
  clean
    .iter()
    .map(|&x| {
      let prior_crisis = p_crisis * CRISIS_STAY + (1.0 - p_crisis) * (1.0 - CALM_STAY);
      let a = (1.0 - prior_crisis) * calm.pdf(x);
      let b = prior_crisis * crisis.pdf(x);
      p_crisis = if a + b > 0.0 { b / (a + b) } else { prior_crisis };
      p_crisis
    })
    .collect()
}

/// Volatility stress: rolling vol against its rolling median through a tanh ramp, smoothed.
pub fn volatility_probability(series: &[f64], vol_window: usize, median_window: usize) -> Vec<f64> {
  let vol = numeric::rolling_std(series, vol_window, 2);
  let med = numeric::rolling_median(&vol, median_window, 1);
  let raw: Vec<f64> = vol
    .iter()
    .zip(&med)
    .map(|(v, m)| {
      if v.is_finite() && m.is_finite() && *m > 0.0 {
        0.5 * (1.0 + ((v / m - 1.0) / 0.5).tanh())
      } else {
        f64::NAN
      }
    })
    .collect();
  numeric::rolling_mean(&raw, VOL_SMOOTHING, 1)
    .into_iter()
    .map(|p| if p.is_finite() { p.clamp(0.0, 1.0) } else { NEUTRAL })
    .collect()
}

/// Macro slowdown score from inflation surprises, PMI and real rates; neutral when absent.
pub fn macro_probability(macro_series: &MacroSeries, len: usize) -> Result<Vec<f64>> {
  macro_series.ensure_aligned(len)?;
  let mut parts: Vec<(f64, Vec<f64>)> = Vec::new();

  if let Some(infl) = &macro_series.inflation {
    let infl = forward_fill(infl);
    let baseline = numeric::rolling_mean(&infl, (MACRO_SMOOTHING * 3).max(6), 1);
    let score = infl
      .iter()
      .zip(&baseline)
      .map(|(x, b)| 0.5 * (1.0 + ((x - b) / 1.5).tanh()))
      .collect();
    parts.push((INFLATION_WEIGHT, score));
  }
  if let Some(pmi) = &macro_series.pmi {
    let score = forward_fill(pmi)
      .iter()
      .map(|x| 0.5 * (1.0 + ((PMI_THRESHOLD - x) / 5.0).tanh()))
      .collect();
    parts.push((PMI_WEIGHT, score));
  }
  if let Some(rr) = &macro_series.real_rate {
    let score = forward_fill(rr)
      .iter()
      .map(|x| 0.5 * (1.0 + (x / 1.5).tanh()))
      .collect();
    parts.push((REAL_RATE_WEIGHT, score));
  }

  if parts.is_empty() {
    return Ok(vec![NEUTRAL; len]);
  }
  let weight_total: f64 = parts.iter().map(|(w, _)| w).sum();
  let combined: Vec<f64> = (0..len)
    .map(|t| parts.iter().map(|(w, s)| w * s[t]).sum::<f64>() / weight_total)
    .collect();
  Ok(
    numeric::rolling_mean(&combined, MACRO_SMOOTHING, 1)
      .into_iter()
      .map(|p| if p.is_finite() { p.clamp(0.0, 1.0) } else { NEUTRAL })
      .collect(),
  )
}

/// Committee probabilities, hysteresis flag and tilt for every panel date.
pub fn regime_probability(
  panel: &ReturnPanel,
  macro_series: &MacroSeries,
  params: &RegimeThresholds,
) -> Result<Vec<RegimeRecord>> {
  let (w_hmm, w_vol, w_macro) = params.weights.normalised()?;
  let cfg = HysteresisConfig::from(params);
  let avg = panel.average_returns();

  let p_hmm = hmm_crisis_probability(&avg);
  let p_vol = volatility_probability(&avg, params.vol_window, params.vol_median_window);
  let p_macro = macro_probability(macro_series, avg.len())?;
  let p_crisis: Vec<f64> = (0..avg.len())
    .map(|t| (w_hmm * p_hmm[t] + w_vol * p_vol[t] + w_macro * p_macro[t]).clamp(0.0, 1.0))
    .collect();
  let states = apply_hysteresis(&p_crisis, &cfg)?;

  let records: Vec<RegimeRecord> = panel
    .dates()
    .iter()
    .enumerate()
    .map(|(t, &date)| RegimeRecord {
      date,
      p_hmm: p_hmm[t],
      p_volatility: p_vol[t],
      p_macro: p_macro[t],
      p_crisis: p_crisis[t],
      state: states[t],
      tilt: tilt_lambda(p_crisis[t]),
    })
    .collect();
  let active = records.iter().filter(|r| r.state == RegimeState::Active).count();
  info!(
    observations = records.len(),
    active,
    median_p = numeric::median(&p_crisis),
    "regime committee done"
  );
  Ok(records)
}
