//! # Factor Library
//!
//! $$
//! f_t = \overline{r}_{t}\big[s_t \ge Q_{0.7}(s_t)\big] - \overline{r}_{t}\big[s_t \le Q_{0.3}(s_t)\big]
//! $$
//!
//! Market, quantile long/short and macro premia built from the point-in-time panel.

use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use tracing::debug;
use tracing::info;

use super::definitions::FactorDefinition;
use super::definitions::default_definitions;
use crate::error::Error;
use crate::error::Result;
use crate::numeric;
use crate::panel::MacroSeries;
use crate::panel::ReturnPanel;
use crate::panel::forward_fill;
use crate::rng::child_rng;

pub const FACTOR_STREAM: &str = "factors";
/// Fewer valid assets than this on a date yields a zero spread.
pub const MIN_ASSETS: usize = 5;
pub const SPREAD_QUANTILE: f64 = 0.3;
const JITTER_SCALE: f64 = 1e-9;

/// Factor returns indexed by date, one named column per premium.
#[derive(Clone, Debug)]
pub struct FactorSet {
  pub dates: Vec<NaiveDate>,
  pub names: Vec<String>,
  pub values: Array2<f64>,
}

impl FactorSet {
  pub fn new(dates: Vec<NaiveDate>, names: Vec<String>, values: Array2<f64>) -> Result<Self> {
    if values.nrows() != dates.len() {
      return Err(Error::shape("factor set dates", values.nrows(), dates.len()));
    }
    if values.ncols() != names.len() {
      return Err(Error::shape("factor set names", values.ncols(), names.len()));
    }
    Ok(Self { dates, names, values })
  }

  pub fn n_obs(&self) -> usize {
    self.values.nrows()
  }

  pub fn n_factors(&self) -> usize {
    self.values.ncols()
  }

  pub fn view(&self) -> ArrayView2<'_, f64> {
    self.values.view()
  }

  pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
    self
      .names
      .iter()
      .position(|n| n == name)
      .map(|k| self.values.column(k))
  }

  pub fn date_labels(&self) -> Vec<String> {
    self.dates.iter().map(|d| d.to_string()).collect()
  }

  /// Mean of each factor over the sample.
  pub fn means(&self) -> Array1<f64> {
    self
      .values
      .columns()
      .into_iter()
      .map(|c| numeric::mean(&c.to_vec()))
      .collect()
  }
}

/// Long/short spread between the top and bottom signal quantiles on one date.
///
/// Pairs with a non-finite signal or return are dropped. Tied signals get a tiny
/// jitter from `rng` so the legs stay distinct.
pub fn quantile_spread<R: Rng>(signal: ArrayView1<f64>, returns: ArrayView1<f64>, rng: &mut R) -> f64 {
  let mut pairs: Vec<(f64, f64)> = signal
    .iter()
    .zip(returns.iter())
    .filter(|(s, r)| s.is_finite() && r.is_finite())
    .map(|(s, r)| (*s, *r))
    .collect();
  if pairs.len() < MIN_ASSETS {
    return 0.0;
  }

  let mut sorted: Vec<f64> = numeric::sorted(&pairs.iter().map(|p| p.0).collect::<Vec<_>>());
  sorted.dedup();
  let tie_limit = ((MIN_ASSETS as f64 * 0.2) as usize).max(1);
  if sorted.len() <= tie_limit {
    for p in pairs.iter_mut() {
      p.0 += JITTER_SCALE * rng.sample::<f64, _>(StandardNormal);
    }
  }

  let signals: Vec<f64> = pairs.iter().map(|p| p.0).collect();
  let sorted = numeric::sorted(&signals);
  let hi = numeric::quantile_sorted(&sorted, 1.0 - SPREAD_QUANTILE);
  let lo = numeric::quantile_sorted(&sorted, SPREAD_QUANTILE);
  let long: Vec<f64> = pairs.iter().filter(|p| p.0 >= hi).map(|p| p.1).collect();
  let short: Vec<f64> = pairs.iter().filter(|p| p.0 <= lo).map(|p| p.1).collect();
  if long.is_empty() || short.is_empty() {
    return 0.0;
  }
  numeric::mean(&long) - numeric::mean(&short)
}

fn spread_series(signal: &Array2<f64>, returns: ArrayView2<f64>, seed: u64, factor_index: usize) -> Vec<f64> {
  let t = returns.nrows();
  (0..t)
    .map(|i| {
      let mut rng = child_rng(seed, FACTOR_STREAM, (factor_index * t + i) as u64);
      quantile_spread(signal.row(i), returns.row(i), &mut rng)
    })
    .collect()
}

fn differenced(series: Option<&Vec<f64>>, len: usize, sign: f64) -> Vec<f64> {
  match series {
    Some(values) => {
      let filled = forward_fill(values);
      (0..len)
        .map(|i| if i == 0 { 0.0 } else { sign * (filled[i] - filled[i - 1]) })
        .collect()
    }
    None => vec![0.0; len],
  }
}

/// Build the eleven default premia.
///
/// Signals come from features lagged one period, so row `t` never sees `r_t`.
/// The macro premia are zero when their series is absent.
pub fn compute_factors(panel: &ReturnPanel, macro_series: Option<&MacroSeries>, seed: u64) -> Result<FactorSet> {
  let t = panel.n_obs();
  if let Some(m) = macro_series {
    m.ensure_aligned(t)?;
  }
  let returns = panel.returns();
  let features = panel.features();
  let (ma5, ma21, vol) = (&features.lag_ma_5, &features.lag_ma_21, &features.lag_vol_21);

  let quality = vol.mapv(|v| if v.is_finite() && v > 0.0 { 1.0 / v } else { 0.0 });
  let signals: Vec<(&str, Array2<f64>)> = vec![
    ("global_momentum", ma21.clone()),
    ("short_term_reversal", ma5.mapv(|x| -x)),
    ("value_rebound", ma21.mapv(|x| -x)),
    ("carry_roll_down", ma5 - ma21),
    ("quality_low_vol", quality),
    ("defensive_stability", ma21 / &vol.mapv(|v| v + 1e-8)),
    ("liquidity_risk", vol.clone()),
    ("growth_cycle", ma5.clone()),
  ];

  let spreads: Vec<Vec<f64>> = signals
    .par_iter()
    .enumerate()
    .map(|(k, (_, signal))| spread_series(signal, returns, seed, k))
    .collect();

  let mut columns: Vec<Vec<f64>> = Vec::with_capacity(11);
  columns.push(panel.average_returns());
  columns.extend(spreads);
  columns.push(differenced(macro_series.and_then(|m| m.inflation.as_ref()), t, 1.0));
  columns.push(differenced(macro_series.and_then(|m| m.policy_rate.as_ref()), t, -1.0));

  let definitions = default_definitions();
  let names: Vec<String> = definitions.iter().map(|d| d.name.clone()).collect();
  debug_assert_eq!(names.len(), columns.len());

  let values = Array2::from_shape_fn((t, columns.len()), |(i, k)| columns[k][i]);
  for (k, def) in definitions.iter().enumerate() {
    let col = values.column(k).to_vec();
    if numeric::std_dev(&col, 0) == 0.0 {
      debug!(factor = %def.name, "factor series is flat");
    }
  }
  info!(factors = names.len(), observations = t, "factor library computed");
  FactorSet::new(panel.dates().to_vec(), names, values)
}

/// Definitions matching the columns of `set`, in column order.
pub fn definitions_for(set: &FactorSet) -> Vec<FactorDefinition> {
  let defaults = default_definitions();
  set
    .names
    .iter()
    .map(|name| {
      defaults
        .iter()
        .find(|d| &d.name == name)
        .cloned()
        .unwrap_or_else(|| FactorDefinition::new(name.clone(), 1, String::from("derived factor")))
    })
    .collect()
}
