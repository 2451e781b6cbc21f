//! # Allocation Objectives
//!
//! $$
//! \mathrm{CVaR}_\alpha(w) = -\frac{1}{\lceil \alpha T \rceil}\sum_{t \le \lceil \alpha T \rceil} (Rw)_{(t)},\quad
//! \mathrm{EDaR}_\beta(w) = \mathbb{E}\big[D_t(w) \mid D_t(w) \ge q_\beta(D)\big]
//! $$
//!
//! Scenario risk measures, softmax simplex parameterisation and the Nelder-Mead driver.

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::solver::neldermead::NelderMead;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use ordered_float::OrderedFloat;

/// Penalty multiplier applied to scenario-cap excess inside the solver.
pub(crate) const CAP_PENALTY: f64 = 1e4;

pub(crate) fn softmax(x: &[f64]) -> Vec<f64> {
  if x.is_empty() {
    return Vec::new();
  }

  let max_x = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  let exps: Vec<f64> = x.iter().map(|&v| (v - max_x).exp()).collect();
  let sum: f64 = exps.iter().sum();

  if sum < 1e-15 {
    vec![1.0 / x.len() as f64; x.len()]
  } else {
    exps.iter().map(|&e| e / sum).collect()
  }
}

/// Minimise `cost` over the probability simplex through a softmax parameterisation.
///
/// Falls back to equal weights when the solver cannot be built or fails.
pub(crate) fn minimize_on_simplex<C>(cost: C, n: usize, max_iters: u64) -> Vec<f64>
where
  C: CostFunction<Param = Vec<f64>, Output = f64>,
{
  let equal = vec![1.0 / n as f64; n];
  if n <= 1 {
    return equal;
  }

  let x0 = vec![0.0; n];
  let mut simplex = Vec::with_capacity(n + 1);
  simplex.push(x0.clone());
  for i in 0..n {
    let mut point = x0.clone();
    point[i] = 1.0;
    simplex.push(point);
  }

  match NelderMead::new(simplex).with_sd_tolerance(1e-10) {
    Ok(solver) => {
      match Executor::new(cost, solver)
        .configure(|state| state.max_iters(max_iters))
        .run()
      {
        Ok(res) => {
          let best_x = res.state.best_param.unwrap_or(x0);
          softmax(&best_x)
        }
        Err(_) => equal,
      }
    }
    Err(_) => equal,
  }
}

/// Portfolio return per scenario row.
pub fn scenario_returns(scenarios: ArrayView2<f64>, w: &[f64]) -> Vec<f64> {
  scenarios
    .rows()
    .into_iter()
    .map(|row| row.iter().zip(w).map(|(r, wi)| r * wi).sum())
    .collect()
}

/// Expected loss in the worst `alpha` tail, reported as a positive number for losses.
pub fn empirical_cvar(returns: &[f64], alpha: f64) -> f64 {
  if returns.is_empty() {
    return 0.0;
  }

  let mut sorted = returns.to_vec();
  sorted.sort_by_key(|v| OrderedFloat(*v));
  let cutoff = ((sorted.len() as f64) * alpha.clamp(0.0, 1.0)).ceil() as usize;
  let cutoff = cutoff.max(1).min(sorted.len());
  let tail_mean: f64 = sorted[..cutoff].iter().sum::<f64>() / cutoff as f64;

  -tail_mean
}

/// Drawdown path `1 - W_t / max_{s<=t} W_s` of compounded returns, starting from unit wealth.
pub fn drawdown_path(returns: &[f64]) -> Vec<f64> {
  let mut wealth = 1.0;
  let mut peak = 1.0_f64;
  returns
    .iter()
    .map(|r| {
      wealth *= 1.0 + r;
      peak = peak.max(wealth);
      if peak > 0.0 { 1.0 - wealth / peak } else { 1.0 }
    })
    .collect()
}

/// Mean of the worst `1 - beta` share of the drawdown path.
pub fn empirical_edar(returns: &[f64], beta: f64) -> f64 {
  let mut dd = drawdown_path(returns);
  if dd.is_empty() {
    return 0.0;
  }
  dd.sort_by_key(|v| std::cmp::Reverse(OrderedFloat(*v)));
  let k = ((dd.len() as f64) * (1.0 - beta).clamp(0.0, 1.0)).ceil() as usize;
  let k = k.max(1).min(dd.len());
  dd[..k].iter().sum::<f64>() / k as f64
}

/// Half-L1 distance between two weight vectors.
pub fn turnover(w: &Array1<f64>, w_prev: &Array1<f64>) -> f64 {
  0.5 * w.iter().zip(w_prev).map(|(a, b)| (a - b).abs()).sum::<f64>()
}

pub fn gross_leverage(w: &Array1<f64>) -> f64 {
  w.iter().map(|v| v.abs()).sum()
}

pub fn quad_form(w: &[f64], sigma: &Array2<f64>) -> f64 {
  let n = w.len();
  let mut acc = 0.0;
  for i in 0..n {
    for j in 0..n {
      acc += w[i] * sigma[[i, j]] * w[j];
    }
  }
  acc
}

/// Clip negatives and rescale to unit sum; equal weights when nothing positive remains.
pub fn clip_normalise(w: &Array1<f64>) -> Array1<f64> {
  let clipped = w.mapv(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
  let total = clipped.sum();
  if total > 0.0 {
    clipped / total
  } else {
    Array1::from_elem(w.len(), 1.0 / w.len().max(1) as f64)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn softmax_is_on_simplex() {
    let w = softmax(&[1.0, -2.0, 0.5]);
    assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    assert!(w.iter().all(|v| *v > 0.0));
  }

  #[test]
  fn cvar_is_negated_tail_mean() {
    let r = [-0.10, -0.05, 0.0, 0.02, 0.03, 0.01, 0.04, -0.01, 0.02, 0.05];
    // ceil(10 * 0.2) = 2 worst: -0.10, -0.05
    assert_abs_diff_eq!(empirical_cvar(&r, 0.2), 0.075, epsilon = 1e-12);
  }

  #[test]
  fn edar_reads_worst_drawdowns() {
    let r = [0.1, -0.5, 0.0, 1.0];
    let dd = drawdown_path(&r);
    assert_abs_diff_eq!(dd[1], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(dd[2], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(dd[3], 0.0, epsilon = 1e-12);
    // ceil(4 * 0.5) = 2 largest drawdowns
    assert_abs_diff_eq!(empirical_edar(&r, 0.5), 0.5, epsilon = 1e-12);
  }

  #[test]
  fn turnover_is_half_l1() {
    assert_abs_diff_eq!(
      turnover(&array![0.5, 0.5], &array![1.0, 0.0]),
      0.5,
      epsilon = 1e-15
    );
  }

  #[test]
  fn clip_normalise_falls_back_to_equal() {
    assert_eq!(clip_normalise(&array![-1.0, 0.0]), array![0.5, 0.5]);
    assert_eq!(clip_normalise(&array![-1.0, 3.0]), array![0.0, 1.0]);
  }
}
