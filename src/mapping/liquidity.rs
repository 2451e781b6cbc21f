//! # Liquidity Caps
//!
//! $$
//! \Delta w_i' = \Delta w_i \min\Big(1, \frac{\max(c\,\mathrm{ADV}_i P_i, 10^{-12})}{\max(|\Delta w_i| V, 10^{-12})}\Big)
//! $$
//!
//! Trade deltas rescaled to a fraction of average daily volume; signs never flip.
//! A rebalance keeps its direction by shrinking every delta with the tightest of those factors.

use ndarray::Array1;
use ndarray::Zip;

use crate::error::Error;
use crate::error::Result;

/// Notional ceiling per instrument: `max(0, adv * price * cap_ratio)`.
pub fn max_trade_notional(adv: &Array1<f64>, prices: &Array1<f64>, cap_ratio: f64) -> Result<Array1<f64>> {
  if !(cap_ratio >= 0.0) {
    return Err(Error::InvalidInput("ADV cap ratio must be non-negative".into()));
  }
  if adv.len() != prices.len() {
    return Err(Error::shape("ADV caps", adv.len(), prices.len()));
  }
  Ok(Zip::from(adv).and(prices).map_collect(|a, p| (a * p * cap_ratio).max(0.0)))
}

/// Scale each weight delta so its traded notional stays under the ADV cap.
pub fn clip_trades_to_adv(
  delta_w: &Array1<f64>,
  portfolio_value: f64,
  adv: &Array1<f64>,
  prices: &Array1<f64>,
  cap_ratio: f64,
) -> Result<Array1<f64>> {
  if !(portfolio_value >= 0.0) {
    return Err(Error::InvalidInput("portfolio value must be non-negative".into()));
  }
  let caps = max_trade_notional(adv, prices, cap_ratio)?;
  if caps.len() != delta_w.len() {
    return Err(Error::shape("ADV trade clip", caps.len(), delta_w.len()));
  }
  if portfolio_value == 0.0 {
    return Ok(Array1::zeros(delta_w.len()));
  }
  Ok(Zip::from(delta_w).and(&caps).map_collect(|d, cap| {
    let traded = (d.abs() * portfolio_value).max(1e-12);
    d * (cap.max(1e-12) / traded).min(1.0)
  }))
}

/// Largest `s` in `[0, 1]` such that `s * delta_w` respects every ADV cap.
///
/// Scaling the whole trade by one factor keeps `sum(delta_w)` at zero, so `previous + s * delta_w`
/// stays on the simplex whenever both endpoints are.
pub fn uniform_trade_scale(
  delta_w: &Array1<f64>,
  portfolio_value: f64,
  adv: &Array1<f64>,
  prices: &Array1<f64>,
  cap_ratio: f64,
) -> Result<f64> {
  let clipped = clip_trades_to_adv(delta_w, portfolio_value, adv, prices, cap_ratio)?;
  Ok(
    delta_w
      .iter()
      .zip(&clipped)
      .filter(|(d, _)| d.abs() > 1e-15)
      .map(|(d, c)| c / d)
      .fold(1.0_f64, f64::min)
      .clamp(0.0, 1.0),
  )
}
