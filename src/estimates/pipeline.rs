//! # Estimation Pipeline
//!
//! $$
//! \Sigma_t = \Pi_{\mathbb{S}_+}\big(\lambda\,\Sigma_{t-1} + (1-\lambda)\,\operatorname{med}(\hat\Sigma^{(k)})\big)
//! $$
//!
//! Candidate covariances, consensus, EWMA smoothing and the blended expected returns.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use super::bl::BlendReason;
use super::bl::MuBlend;
use super::bl::blend_mu;
use super::bl::information_ratio;
use super::bl::reverse_opt_mu_eq;
use super::drift::DriftRecord;
use super::mu::estimate_mu_ensemble;
use super::sigma::CandidateOutcome;
use super::sigma::CovarianceEstimator;
use super::sigma::aggregate_candidates;
use super::sigma::estimate_candidates;
use super::sigma::ewma_regime;
use crate::config::GovernanceFlags;
use crate::config::RunContext;
use crate::error::Error;
use crate::error::Result;
use crate::linalg;

/// Status of one covariance candidate, kept for the blend log.
#[derive(Clone, Debug, Serialize)]
pub struct CandidateStatus {
  pub estimator: CovarianceEstimator,
  pub ok: bool,
  pub reason: Option<String>,
}

/// Final covariance with its diagnostics.
#[derive(Clone, Debug)]
pub struct SigmaEstimate {
  pub sigma: Array2<f64>,
  pub candidates: Vec<CandidateStatus>,
  /// Drift of the final estimate against the previous one.
  pub drift: Option<DriftRecord>,
  /// True when the drift trigger replaced the EWMA blend by the fresh estimate.
  pub reset: bool,
}

/// Both estimation outputs of one run.
#[derive(Clone, Debug)]
pub struct EstimateOutput {
  pub sigma: SigmaEstimate,
  pub mu: MuBlend,
}

fn drift_or_warn(current: &Array2<f64>, previous: &Array2<f64>) -> Option<DriftRecord> {
  match DriftRecord::between(current, previous) {
    Ok(record) => Some(record),
    Err(e) => {
      warn!(error = %e, "covariance drift not computed");
      None
    }
  }
}

/// Robust covariance for a `T x N` sample, smoothed against `previous` when given.
pub fn estimate_sigma(
  sample: ArrayView2<f64>,
  ctx: &RunContext,
  flags: &GovernanceFlags,
  previous: Option<&Array2<f64>>,
) -> Result<SigmaEstimate> {
  let params = &ctx.thresholds().estimates;
  let n = sample.ncols();
  if let Some(prev) = previous {
    if prev.dim() != (n, n) {
      return Err(Error::shape(
        "previous sigma",
        format!("{n}x{n}"),
        format!("{}x{}", prev.nrows(), prev.ncols()),
      ));
    }
  }

  let (fresh, candidates) = if flags.sigma_psd {
    let outcomes = estimate_candidates(sample, params)?;
    let statuses = outcomes
      .iter()
      .map(|(est, outcome)| CandidateStatus {
        estimator: *est,
        ok: outcome.matrix().is_some(),
        reason: match outcome {
          CandidateOutcome::Failed(r) => Some(r.clone()),
          CandidateOutcome::Ok(_) => None,
        },
      })
      .collect();
    (aggregate_candidates(&outcomes, params.sigma_mode, params)?, statuses)
  } else {
    (linalg::sample_covariance(sample, 1)?, Vec::new())
  };

  let mut reset = false;
  let sigma = match previous {
    None => fresh,
    Some(prev) => {
      let trigger = flags.drift_trigger
        && drift_or_warn(&fresh, prev)
          .is_some_and(|d| d.frobenius_relative > params.drift_reset);
      if trigger {
        warn!(threshold = params.drift_reset, "covariance drift reset; EWMA skipped");
        reset = true;
        fresh
      } else if flags.sigma_psd {
        ewma_regime(prev, &fresh, params.ewma_lambda)?
      } else {
        prev * params.ewma_lambda + &fresh * (1.0 - params.ewma_lambda)
      }
    }
  };

  let drift = previous.and_then(|prev| drift_or_warn(&sigma, prev));
  if let Some(d) = &drift {
    info!(
      frobenius = d.frobenius_relative,
      corr = d.max_corr_drift,
      "sigma drift"
    );
  }
  Ok(SigmaEstimate {
    sigma,
    candidates,
    drift,
    reset,
  })
}

/// Ensemble view blended with equal-weight equilibrium returns.
pub fn estimate_mu(
  sample: ArrayView2<f64>,
  macro_features: Option<&Array2<f64>>,
  ctx: &RunContext,
  flags: &GovernanceFlags,
  sigma: &Array2<f64>,
) -> Result<MuBlend> {
  let params = &ctx.thresholds().estimates;
  let n = sample.ncols();
  let mu_star = estimate_mu_ensemble(
    sample,
    macro_features,
    params.cv_splits,
    ctx.stream_seed("mu-ensemble"),
  )?;
  let w_mkt = Array1::from_elem(n, 1.0 / n as f64);
  let mu_eq = reverse_opt_mu_eq(sigma, &w_mkt, params.vol_target)?;
  let ir_view = information_ratio(&mu_star, &mu_eq, sigma)?;
  let tau_ir = if flags.bl_fallback {
    params.tau_ir
  } else {
    f64::NEG_INFINITY
  };
  let blend = blend_mu(&mu_eq, &mu_star, ir_view, tau_ir)?;
  if blend.reason == BlendReason::Fallback {
    warn!(ir_view, tau_ir, "view information ratio below cutoff; mu falls back to equilibrium");
  }
  info!(omega = blend.omega, reason = ?blend.reason, ir_view, "mu blend");
  Ok(blend)
}

/// Runs covariance then expected-return estimation.
pub fn run_estimates(
  sample: ArrayView2<f64>,
  macro_features: Option<&Array2<f64>>,
  ctx: &RunContext,
  flags: &GovernanceFlags,
  previous: Option<&Array2<f64>>,
) -> Result<EstimateOutput> {
  let sigma = estimate_sigma(sample, ctx, flags, previous)?;
  let mu = estimate_mu(sample, macro_features, ctx, flags, &sigma.sigma)?;
  Ok(EstimateOutput { sigma, mu })
}
