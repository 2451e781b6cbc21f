//! # Block Bootstrap
//!
//! $$
//! \hat p_{DD} = \frac1B\sum_{b=1}^B \mathbf 1\{\mathrm{MaxDD}^{(b)} \le \tau\},\quad
//! \underline{\mathrm{CAGR}} = Q_{1-\alpha}\big(\mathrm{CAGR}^{(1..B)}\big)
//! $$
//!
//! Contiguous-block resampling of return paths and the empirical acceptance gates.

use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray::concatenate;
use ndarray::s;
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::config::RobustnessThresholds;
use crate::error::Error;
use crate::error::Result;
use crate::numeric;
use crate::rng::child_rng;

const BOOTSTRAP_STREAM: &str = "robustness.bootstrap";

/// Metrics of one bootstrap draw.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BootstrapDraw {
  pub draw: usize,
  pub max_drawdown: f64,
  pub cagr: f64,
  pub sharpe: f64,
  pub cvar: f64,
  pub edar: f64,
}

/// Empirical acceptance gates of the bootstrap distribution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RobustnessGates {
  pub max_drawdown_threshold: f64,
  pub cagr_target: f64,
  /// Fraction of draws whose drawdown breaches the threshold.
  pub exceedance_probability: f64,
  /// `(1 - alpha)` quantile of the CAGR draws.
  pub cagr_lower_bound: f64,
  pub alpha: f64,
}

impl RobustnessGates {
  pub fn passes(&self) -> bool {
    self.exceedance_probability <= 1.0 - self.alpha && self.cagr_lower_bound >= self.cagr_target
  }
}

fn check_block(n: usize, block_size: usize, draws: usize) -> Result<()> {
  if n == 0 {
    return Err(Error::EmptySample("bootstrap needs at least one observation".into()));
  }
  if block_size == 0 {
    return Err(Error::InvalidInput("block size must be positive".into()));
  }
  if draws == 0 {
    return Err(Error::InvalidInput("number of bootstrap draws must be positive".into()));
  }
  if block_size > n {
    return Err(Error::InvalidInput(format!(
      "block size {block_size} exceeds series length {n}"
    )));
  }
  Ok(())
}

/// Start indices of the blocks covering one resampled path of length `n`.
fn block_starts<R: Rng>(n: usize, block_size: usize, rng: &mut R) -> Vec<usize> {
  let reps = n.div_ceil(block_size);
  let upper = (n - block_size + 1).max(1);
  (0..reps).map(|_| rng.gen_range(0..upper)).collect()
}

/// One resampled panel: whole blocks of rows, concatenated and truncated to the original length.
pub fn resample_blocks<R: Rng>(returns: ArrayView2<f64>, block_size: usize, rng: &mut R) -> Result<Array2<f64>> {
  let n = returns.nrows();
  check_block(n, block_size, 1)?;
  let starts = block_starts(n, block_size, rng);
  let blocks: Vec<ArrayView2<f64>> = starts
    .iter()
    .map(|&start| returns.slice(s![start..start + block_size, ..]))
    .collect();
  let joined = concatenate(Axis(0), &blocks)
    .map_err(|e| Error::InvalidInput(format!("block concatenation failed: {e}")))?;
  Ok(joined.slice(s![..n, ..]).to_owned())
}

/// `draws` resampled panels; draw `b` uses its own seeded sub-stream so results do not
/// depend on thread scheduling.
pub fn block_bootstrap(
  returns: ArrayView2<f64>,
  block_size: usize,
  draws: usize,
  seed: u64,
) -> Result<Vec<Array2<f64>>> {
  check_block(returns.nrows(), block_size, draws)?;
  if returns.iter().any(|x| !x.is_finite()) {
    return Err(Error::InvalidInput("bootstrap input contains non-finite values".into()));
  }
  (0..draws)
    .into_par_iter()
    .map(|b| {
      let mut rng = child_rng(seed, BOOTSTRAP_STREAM, b as u64);
      resample_blocks(returns, block_size, &mut rng)
    })
    .collect()
}

/// Minimum of `W_t / max_{s<=t} W_s - 1`; `-1` once wealth is wiped out.
pub fn max_drawdown(returns: &[f64]) -> f64 {
  let mut wealth = 1.0;
  let mut peak = f64::NEG_INFINITY;
  let mut worst = 0.0_f64;
  for r in returns {
    wealth *= 1.0 + r;
    if wealth <= 0.0 {
      return -1.0;
    }
    peak = peak.max(wealth);
    worst = worst.min(wealth / peak - 1.0);
  }
  worst
}

pub fn cagr(returns: &[f64], periods_per_year: usize) -> f64 {
  if returns.is_empty() {
    return 0.0;
  }
  let total: f64 = returns.iter().map(|r| 1.0 + r).product();
  if total <= 0.0 {
    return -1.0;
  }
  let years = returns.len() as f64 / periods_per_year as f64;
  total.powf(1.0 / years) - 1.0
}

/// Annualised Sharpe ratio with population standard deviation; zero for a flat path.
pub fn sharpe(returns: &[f64], periods_per_year: usize) -> f64 {
  if returns.is_empty() {
    return 0.0;
  }
  let sd = numeric::std_dev(returns, 0);
  if sd == 0.0 {
    return 0.0;
  }
  numeric::mean(returns) / sd * (periods_per_year as f64).sqrt()
}

/// Mean of the worst `ceil((1 - alpha) n)` returns (at least one).
pub fn cvar(returns: &[f64], alpha: f64) -> f64 {
  if returns.is_empty() {
    return 0.0;
  }
  let sorted = numeric::sorted(returns);
  let k = (((1.0 - alpha) * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
  numeric::mean(&sorted[..k])
}

/// Tail mean of rolling three-year compounded returns, with gains counted as zero.
pub fn edar(returns: &[f64], alpha: f64, periods_per_year: usize) -> f64 {
  if returns.is_empty() {
    return 0.0;
  }
  let window = (3 * periods_per_year).min(returns.len()).max(1);
  let mut rolled: Vec<f64> = returns
    .windows(window)
    .map(|w| w.iter().map(|r| 1.0 + r).product::<f64>() - 1.0)
    .collect();
  rolled.sort_by(f64::total_cmp);
  let k = (((1.0 - alpha) * rolled.len() as f64).ceil() as usize).clamp(1, rolled.len());
  let tail: Vec<f64> = rolled[..k].iter().map(|x| x.min(0.0)).collect();
  numeric::mean(&tail)
}

fn path_metrics(draw: usize, path: &[f64], params: &RobustnessThresholds) -> BootstrapDraw {
  BootstrapDraw {
    draw,
    max_drawdown: max_drawdown(path),
    cagr: cagr(path, params.periods_per_year),
    sharpe: sharpe(path, params.periods_per_year),
    cvar: cvar(path, params.alpha),
    edar: edar(path, params.alpha, params.periods_per_year),
  }
}

/// Bootstrap a single return series and evaluate the drawdown and CAGR gates.
pub fn block_bootstrap_metrics(
  returns: &[f64],
  params: &RobustnessThresholds,
  seed: u64,
) -> Result<(Vec<BootstrapDraw>, RobustnessGates)> {
  if !(params.alpha > 0.0 && params.alpha < 1.0) {
    return Err(Error::config("robustness.alpha", "must lie in (0, 1)"));
  }
  if params.periods_per_year == 0 {
    return Err(Error::config("robustness.periods_per_year", "must be positive"));
  }
  let view = ArrayView2::from_shape((returns.len(), 1), returns)
    .map_err(|e| Error::InvalidInput(format!("return series: {e}")))?;
  let panels = block_bootstrap(view, params.block_size, params.draws, seed)?;

  let draws: Vec<BootstrapDraw> = panels
    .par_iter()
    .enumerate()
    .map(|(b, panel)| {
      let path: Vec<f64> = panel.column(0).to_vec();
      path_metrics(b, &path, params)
    })
    .collect();

  let breaches = draws
    .iter()
    .filter(|d| d.max_drawdown <= params.max_drawdown_threshold)
    .count();
  let cagrs: Vec<f64> = draws.iter().map(|d| d.cagr).collect();
  let gates = RobustnessGates {
    max_drawdown_threshold: params.max_drawdown_threshold,
    cagr_target: params.cagr_target,
    exceedance_probability: breaches as f64 / draws.len() as f64,
    cagr_lower_bound: eb_lower_bound(&cagrs, 1.0 - params.alpha)?,
    alpha: params.alpha,
  };
  info!(
    draws = draws.len(),
    exceedance = gates.exceedance_probability,
    cagr_lower = gates.cagr_lower_bound,
    passes = gates.passes(),
    "block bootstrap done"
  );
  Ok((draws, gates))
}

/// Empirical lower bound: the linearly interpolated `alpha` quantile of `values`.
pub fn eb_lower_bound(values: &[f64], alpha: f64) -> Result<f64> {
  if !(alpha > 0.0 && alpha < 1.0) {
    return Err(Error::InvalidInput(format!("alpha must lie in (0, 1), got {alpha}")));
  }
  if values.is_empty() {
    return Err(Error::EmptySample("lower bound of an empty sample".into()));
  }
  Ok(numeric::quantile_linear(values, alpha))
}
