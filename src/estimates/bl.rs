//! # Black-Litterman Blend
//!
//! $$
//! \mu_{\text{eq}} = \delta\,\Sigma w_{\text{mkt}},\quad \delta = \frac{\sigma^\*}{\sqrt{w_{\text{mkt}}^\top \Sigma w_{\text{mkt}}}},\quad
//! \mu_{\text{post}} = \omega\,\mu_{\text{eq}} + (1-\omega)\,\mu^\*
//! $$
//!
//! Equilibrium returns by reverse optimisation and an information-ratio gated blend.

use ndarray::Array1;
use ndarray::Array2;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;
use crate::linalg;

/// View uncertainty used when a view passes the information-ratio gate.
pub const BLEND_OMEGA: f64 = 0.5;

/// Why the posterior took its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendReason {
  /// Information ratio below the cutoff; posterior equals equilibrium.
  Fallback,
  Blend,
}

/// Posterior expected returns with the inputs that produced them.
#[derive(Clone, Debug, Serialize)]
pub struct MuBlend {
  pub mu_post: Array1<f64>,
  pub mu_star: Array1<f64>,
  pub mu_eq: Array1<f64>,
  pub omega: f64,
  pub reason: BlendReason,
  pub ir_view: f64,
  pub tau_ir: f64,
}

/// Reverse optimisation scaled to an annual volatility target.
///
/// Returns zeros when the market portfolio has no variance.
pub fn reverse_opt_mu_eq(sigma: &Array2<f64>, w_mkt: &Array1<f64>, vol_target: f64) -> Result<Array1<f64>> {
  let n = linalg::ensure_square(sigma, "reverse optimisation sigma")?;
  if w_mkt.len() != n {
    return Err(Error::shape("market weights", n, w_mkt.len()));
  }
  if sigma.iter().any(|v| !v.is_finite()) {
    return Err(Error::InvalidInput("sigma must contain finite values".into()));
  }
  let sigma_w = sigma.dot(w_mkt);
  let s2 = w_mkt.dot(&sigma_w);
  if s2 <= 0.0 {
    return Ok(Array1::zeros(n));
  }
  let delta = if vol_target > 0.0 {
    vol_target / s2.sqrt()
  } else {
    0.0
  };
  Ok(sigma_w * delta)
}

/// Information ratio of the aggregate view `d = mu_star - mu_eq`: `sqrt(d' (Sigma + 1e-8 I)^+ d)`.
pub fn information_ratio(mu_star: &Array1<f64>, mu_eq: &Array1<f64>, sigma: &Array2<f64>) -> Result<f64> {
  let n = linalg::ensure_square(sigma, "information ratio sigma")?;
  if mu_star.len() != n || mu_eq.len() != n {
    return Err(Error::shape("information ratio views", n, mu_star.len().max(mu_eq.len())));
  }
  let d = mu_star - mu_eq;
  let regularised = sigma + &(Array2::<f64>::eye(n) * 1e-8);
  let inv = linalg::pinv(&regularised)?;
  Ok(d.dot(&inv.dot(&d)).max(0.0).sqrt())
}

fn view_omega(ir_view: f64, tau_ir: f64) -> (f64, BlendReason) {
  if ir_view < tau_ir {
    (1.0, BlendReason::Fallback)
  } else {
    (BLEND_OMEGA, BlendReason::Blend)
  }
}

/// Blends the ensemble view with equilibrium.
///
/// When `ir_view < tau_ir` the view is discarded (`omega = 1`) and the posterior is
/// exactly `mu_eq`; otherwise `omega = 0.5`.
pub fn blend_mu(mu_eq: &Array1<f64>, mu_star: &Array1<f64>, ir_view: f64, tau_ir: f64) -> Result<MuBlend> {
  if mu_eq.len() != mu_star.len() {
    return Err(Error::shape("blend views", mu_eq.len(), mu_star.len()));
  }
  let mu_star = mu_star.mapv(|v| if v.is_finite() { v } else { 0.0 });
  let (omega, reason) = view_omega(ir_view, tau_ir);
  let mu_post = if reason == BlendReason::Fallback {
    mu_eq.clone()
  } else {
    mu_eq * omega + &mu_star * (1.0 - omega)
  };
  Ok(MuBlend {
    mu_post,
    mu_star,
    mu_eq: mu_eq.clone(),
    omega,
    reason,
    ir_view,
    tau_ir,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn reverse_optimisation_hits_vol_target() {
    let sigma = array![[0.04, 0.0], [0.0, 0.04]];
    let w = array![0.5, 0.5];
    let mu_eq = reverse_opt_mu_eq(&sigma, &w, 0.11).unwrap();
    // w' mu_eq = delta * w' S w = vol_target * sqrt(w' S w)
    let port_vol = w.dot(&sigma.dot(&w)).sqrt();
    assert_abs_diff_eq!(w.dot(&mu_eq), 0.11 * port_vol, epsilon = 1e-12);
  }

  #[test]
  fn zero_variance_market_gives_zero_equilibrium() {
    let sigma = Array2::<f64>::zeros((2, 2));
    let mu_eq = reverse_opt_mu_eq(&sigma, &array![0.5, 0.5], 0.11).unwrap();
    assert_eq!(mu_eq, array![0.0, 0.0]);
  }

  #[test]
  fn fallback_boundary_at_tau() {
    let mu_eq = array![0.02, 0.03];
    let mu_star = array![0.08, 0.05];
    let tau = 0.15;

    let below = blend_mu(&mu_eq, &mu_star, tau - 0.001, tau).unwrap();
    assert_eq!(below.omega, 1.0);
    assert_eq!(below.reason, BlendReason::Fallback);
    assert_eq!(below.mu_post, mu_eq);

    let at = blend_mu(&mu_eq, &mu_star, tau, tau).unwrap();
    assert_eq!(at.reason, BlendReason::Blend);

    let above = blend_mu(&mu_eq, &mu_star, tau + 0.001, tau).unwrap();
    assert!(above.omega < 1.0);
    assert_abs_diff_eq!(above.mu_post[0], 0.05, epsilon = 1e-15);
  }

  #[test]
  fn information_ratio_of_identical_views_is_zero() {
    let sigma = array![[0.04, 0.01], [0.01, 0.09]];
    let mu = array![0.01, 0.02];
    assert_abs_diff_eq!(information_ratio(&mu, &mu, &sigma).unwrap(), 0.0, epsilon = 1e-15);
    let ir = information_ratio(&array![0.03, 0.02], &mu, &sigma).unwrap();
    assert!(ir > 0.0);
  }
}
