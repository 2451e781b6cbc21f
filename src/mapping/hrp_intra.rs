//! # Intra-Factor HRP
//!
//! $$
//! w_i = \frac{1}{|\mathcal{G}|}\, w^{\mathrm{HRP}}_{i \mid g(i)}
//! $$
//!
//! Equal budget per factor sleeve, hierarchical risk parity inside each sleeve.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;

use crate::allocators::hrp_weights as hrp_block;
use crate::error::Error;
use crate::error::Result;
use crate::linalg;

/// Label used for instruments without any loading.
pub const UNASSIGNED: &str = "cluster";

/// Sleeves in first-appearance order, each with its member indices.
pub fn sleeves(labels: &[String]) -> Vec<(String, Vec<usize>)> {
  let mut out: Vec<(String, Vec<usize>)> = Vec::new();
  for (i, label) in labels.iter().enumerate() {
    match out.iter_mut().find(|(l, _)| l == label) {
      Some((_, members)) => members.push(i),
      None => out.push((label.clone(), vec![i])),
    }
  }
  out
}

/// Factor with the largest absolute loading for each instrument (`assets x factors` betas).
pub fn dominant_factor_labels(betas: &Array2<f64>, factor_names: &[String]) -> Result<Vec<String>> {
  if betas.ncols() != factor_names.len() {
    return Err(Error::shape("factor labels", betas.ncols(), factor_names.len()));
  }
  Ok(
    betas
      .axis_iter(Axis(0))
      .map(|row| {
        let best = row
          .iter()
          .enumerate()
          .filter(|(_, b)| b.is_finite() && **b != 0.0)
          .fold(None, |acc: Option<(usize, f64)>, (k, b)| match acc {
            Some((_, best)) if best >= b.abs() => acc,
            _ => Some((k, b.abs())),
          });
        best.map_or_else(|| UNASSIGNED.to_string(), |(k, _)| factor_names[k].clone())
      })
      .collect(),
  )
}

/// HRP inside each label group with an equal budget per group.
pub fn hrp_weights(sigma: &Array2<f64>, labels: &[String]) -> Result<Array1<f64>> {
  let n = linalg::ensure_square(sigma, "intra-factor HRP sigma")?;
  if labels.len() != n {
    return Err(Error::shape("intra-factor HRP labels", n, labels.len()));
  }
  if n == 0 {
    return Ok(Array1::zeros(0));
  }
  let groups = sleeves(labels);
  let budget = 1.0 / groups.len() as f64;
  let mut weights = Array1::zeros(n);
  for (_, members) in &groups {
    let sub = sigma.select(Axis(0), members).select(Axis(1), members);
    let intra = hrp_block(&sub)?;
    for (&i, w) in members.iter().zip(intra.iter()) {
      weights[i] = budget * w;
    }
  }
  let total = weights.sum();
  Ok(if total > 0.0 {
    weights / total
  } else {
    Array1::from_elem(n, 1.0 / n as f64)
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn names(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn each_sleeve_gets_equal_budget() {
    let sigma = Array2::from_diag(&array![0.04, 0.01, 0.02, 0.09]);
    let labels = names(&["value", "value", "momentum", "value"]);
    let w = hrp_weights(&sigma, &labels).unwrap();
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(w[2], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(w[0] + w[1] + w[3], 0.5, epsilon = 1e-12);
    // lower variance gets more weight inside the sleeve
    assert!(w[1] > w[0] && w[0] > w[3]);
  }

  #[test]
  fn labels_follow_largest_loading() {
    let betas = array![[0.2, -0.9], [0.5, 0.1], [0.0, 0.0]];
    let labels = dominant_factor_labels(&betas, &names(&["mkt", "rates"])).unwrap();
    assert_eq!(labels, names(&["rates", "mkt", UNASSIGNED]));
  }

  #[test]
  fn label_length_must_match() {
    let sigma = Array2::<f64>::eye(2);
    assert!(hrp_weights(&sigma, &names(&["a"])).is_err());
  }
}
