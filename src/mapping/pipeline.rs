//! # Mapping Pipeline
//!
//! $$
//! w_i \propto f_{g(i)}\, w^{\mathrm{HRP}}_{i \mid g(i)},\qquad
//! \lvert B^\top w - f\rvert_\infty \le \kappa_f,\quad \mathrm{TE}(w, b) \le \kappa
//! $$
//!
//! Factor allocation to instrument weights under beta-confidence, tracking-error and ADV budgets.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::beta::BetaCi;
use super::beta::RollingBetas;
use super::beta::beta_ci_bootstrap;
use super::beta::cap_weights_by_beta_ci;
use super::beta::rolling_beta_ridge;
use super::hrp_intra::dominant_factor_labels;
use super::hrp_intra::hrp_weights;
use super::hrp_intra::sleeves;
use super::liquidity::uniform_trade_scale;
use super::te_budget::enforce_portfolio_te_budget;
use super::te_budget::enforce_te_budget;
use super::te_budget::tracking_error;
use crate::allocators::clip_normalise;
use crate::config::GovernanceFlags;
use crate::config::RunContext;
use crate::error::Error;
use crate::error::Result;
use crate::estimates::project_to_psd;
use crate::linalg;

/// Liquidity of each instrument; unit ADV and prices with a unit portfolio by default.
#[derive(Clone, Debug)]
pub struct Liquidity {
  pub adv: Array1<f64>,
  pub prices: Array1<f64>,
  pub portfolio_value: f64,
}

impl Liquidity {
  pub fn unit(n: usize) -> Self {
    Self {
      adv: Array1::ones(n),
      prices: Array1::ones(n),
      portfolio_value: 1.0,
    }
  }
}

pub struct MappingInputs<'a> {
  /// `T x N` instrument returns.
  pub instrument_returns: ArrayView2<'a, f64>,
  pub instrument_names: &'a [String],
  /// `T x K` factor returns on the same dates.
  pub factor_returns: ArrayView2<'a, f64>,
  pub factor_names: &'a [String],
  /// Factor allocation from the meta-learner.
  pub factor_weights: &'a Array1<f64>,
  /// Expected sign per factor (`0` for none); empty for no priors.
  pub signs: &'a [i8],
  /// Currently held instrument weights; the HRP baseline when absent.
  pub previous: Option<&'a Array1<f64>>,
  pub liquidity: Option<&'a Liquidity>,
}

#[derive(Clone, Debug, Serialize)]
pub struct MappingSummary {
  pub window: usize,
  pub tracking_error_before: f64,
  pub tracking_error_after: f64,
  pub max_exposure_gap_before: f64,
  pub max_exposure_gap_after: f64,
  /// Instruments shrunk for a wide beta band.
  pub ci_capped: usize,
  pub sum_weights: f64,
}

/// One latest-window loading with its band.
#[derive(Clone, Debug, Serialize)]
pub struct BetaRow {
  pub instrument: String,
  pub factor: String,
  pub beta: f64,
  pub lower: f64,
  pub upper: f64,
}

#[derive(Clone, Debug)]
pub struct MappingOutput {
  pub instruments: Vec<String>,
  pub factors: Vec<String>,
  pub labels: Vec<String>,
  pub betas: RollingBetas,
  pub beta_ci: BetaCi,
  pub baseline: Array1<f64>,
  pub raw_weights: Array1<f64>,
  pub weights: Array1<f64>,
  /// Factor exposures `B^T w` of the final weights.
  pub exposures: Array1<f64>,
  pub summary: MappingSummary,
}

impl MappingOutput {
  /// Latest-window loadings and bands, one row per instrument and factor.
  pub fn beta_rows(&self) -> Vec<BetaRow> {
    let (Some(beta), Some(lo), Some(hi)) = (self.betas.latest(), self.beta_ci.lower.last(), self.beta_ci.upper.last())
    else {
      return Vec::new();
    };
    let mut rows = Vec::with_capacity(beta.len());
    for (i, instrument) in self.instruments.iter().enumerate() {
      for (k, factor) in self.factors.iter().enumerate() {
        rows.push(BetaRow {
          instrument: instrument.clone(),
          factor: factor.clone(),
          beta: beta[[i, k]],
          lower: lo[[i, k]],
          upper: hi[[i, k]],
        });
      }
    }
    rows
  }
}

fn max_abs_gap(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
  a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

/// Least-squares instrument weights reproducing `target` exposures, clipped long-only.
fn solve_instrument_weights(betas: &Array2<f64>, target: &Array1<f64>) -> Result<Array1<f64>> {
  let n = betas.nrows();
  if n == 0 {
    return Ok(Array1::zeros(0));
  }
  let x = linalg::pinv(&betas.t().to_owned())?.dot(target);
  let clipped = x.mapv(|v| v.max(0.0));
  let total = clipped.sum();
  Ok(if total > 0.0 {
    clipped / total
  } else {
    Array1::from_elem(n, 1.0 / n as f64)
  })
}

/// Least-norm weight change moving exposures from `current` to `wanted`.
fn exposure_correction(betas: &Array2<f64>, current: &Array1<f64>, wanted: &Array1<f64>) -> Result<Array1<f64>> {
  let k = betas.ncols();
  let gram = betas.t().dot(betas) + Array2::<f64>::eye(k) * 1e-8;
  let gap = (wanted - current).insert_axis(Axis(1));
  let coef = linalg::solve(&gram, &gap)?;
  Ok(betas.dot(&coef).column(0).to_owned())
}

/// Map the factor allocation onto instruments.
///
/// Sleeves are formed by each instrument's dominant factor; the factor weight is spread inside
/// its sleeve by HRP, shrunk for wide beta bands, corrected toward per-factor exposure bands,
/// pulled toward the HRP baseline under the portfolio TE cap and finally ADV-clipped.
pub fn map_to_instruments(
  inputs: &MappingInputs<'_>,
  ctx: &RunContext,
  flags: &GovernanceFlags,
) -> Result<MappingOutput> {
  let params = &ctx.thresholds().mapping;
  let (t, n) = inputs.instrument_returns.dim();
  let k = inputs.factor_returns.ncols();
  if inputs.instrument_names.len() != n {
    return Err(Error::shape("instrument names", n, inputs.instrument_names.len()));
  }
  if inputs.factor_names.len() != k || inputs.factor_weights.len() != k {
    return Err(Error::shape(
      "factor allocation",
      format!("{k} factors"),
      format!("{} names, {} weights", inputs.factor_names.len(), inputs.factor_weights.len()),
    ));
  }
  if t < 2 {
    return Err(Error::EmptySample("mapping needs at least two observations".into()));
  }

  let window = t.min(params.window_max).max(params.window_min);
  let betas = rolling_beta_ridge(
    inputs.instrument_returns,
    inputs.factor_returns,
    window,
    params.lambda_beta,
    inputs.signs,
  )?;
  let beta_ci = beta_ci_bootstrap(
    inputs.instrument_returns,
    inputs.factor_returns,
    &betas,
    params.bootstrap_draws,
    params.ci_alpha,
    ctx.stream_seed("mapping"),
  )?;
  let latest = betas
    .latest()
    .cloned()
    .ok_or_else(|| Error::EmptySample("rolling betas produced no window".into()))?;

  let filled = inputs
    .instrument_returns
    .mapv(|x| if x.is_finite() { x } else { 0.0 });
  let cov = project_to_psd(&linalg::sample_covariance(filled.view(), 1)?, None)?;

  let labels = dominant_factor_labels(&latest, inputs.factor_names)?;
  let baseline = hrp_weights(&cov, &labels)?;
  let n_sleeves = sleeves(&labels).len() as f64;
  let factor_weight = |label: &str| {
    inputs
      .factor_names
      .iter()
      .position(|f| f == label)
      .map_or(0.0, |j| inputs.factor_weights[j].max(0.0))
  };
  let sleeve_weights = Array1::from_shape_fn(n, |i| baseline[i] * n_sleeves * factor_weight(&labels[i]));
  let raw_weights = if sleeve_weights.sum() > 0.0 {
    &sleeve_weights / sleeve_weights.sum()
  } else {
    warn!("no instrument maps onto an allocated factor; using least-squares weights");
    solve_instrument_weights(&latest, inputs.factor_weights)?
  };

  let mut weights = cap_weights_by_beta_ci(&raw_weights, &beta_ci, params.tau_beta_ci_width)?;
  let ci_capped = beta_ci
    .max_width_per_instrument()
    .iter()
    .filter(|w| **w > params.tau_beta_ci_width)
    .count();

  let target = inputs.factor_weights;
  let exposures_before = latest.t().dot(&weights);
  let banded = enforce_te_budget(&exposures_before, target, params.te_max_factor)?;
  if max_abs_gap(&banded, &exposures_before) > 0.0 {
    weights = clip_normalise(&(&weights + &exposure_correction(&latest, &exposures_before, &banded)?));
  }

  let te_before = tracking_error(&weights, &baseline, &cov)?;
  weights = enforce_portfolio_te_budget(&weights, &baseline, &cov, params.te_portfolio_cap)?;

  if flags.no_trade_rule {
    let unit;
    let liquidity = match inputs.liquidity {
      Some(l) => l,
      None => {
        unit = Liquidity::unit(n);
        &unit
      }
    };
    let anchor = inputs.previous.unwrap_or(&baseline);
    if anchor.len() != n {
      return Err(Error::shape("previous instrument weights", n, anchor.len()));
    }
    let delta = &weights - anchor;
    let scale = uniform_trade_scale(
      &delta,
      liquidity.portfolio_value,
      &liquidity.adv,
      &liquidity.prices,
      params.adv_cap_ratio,
    )?;
    if scale < 1.0 {
      debug!(scale, "trade shrunk to the ADV cap");
    }
    weights = anchor + &(delta * scale);
  }

  let exposures = latest.t().dot(&weights);
  let summary = MappingSummary {
    window,
    tracking_error_before: te_before,
    tracking_error_after: tracking_error(&weights, &baseline, &cov)?,
    max_exposure_gap_before: max_abs_gap(&exposures_before, target),
    max_exposure_gap_after: max_abs_gap(&exposures, target),
    ci_capped,
    sum_weights: weights.sum(),
  };
  info!(
    instruments = n,
    factors = k,
    window,
    te_before = summary.tracking_error_before,
    te_after = summary.tracking_error_after,
    ci_capped,
    "mapping done"
  );

  Ok(MappingOutput {
    instruments: inputs.instrument_names.to_vec(),
    factors: inputs.factor_names.to_vec(),
    labels,
    betas,
    beta_ci,
    baseline,
    raw_weights,
    weights,
    exposures,
    summary,
  })
}
