//! # Hierarchical Risk Parity
//!
//! $$
//! d_{ij} = \sqrt{\tfrac12(1-\rho_{ij})},\quad
//! \alpha = 1 - \frac{V_L}{V_L + V_R}
//! $$
//!
//! Ward seriation of the correlation distance followed by recursive bisection.

use ndarray::Array1;
use ndarray::Array2;

use crate::error::Result;
use crate::linalg;

/// Leaf order of a Ward (Lance-Williams) agglomeration over `dist`.
pub fn ward_seriation(dist: &Array2<f64>) -> Vec<usize> {
  let n = dist.nrows();
  if n <= 1 {
    return (0..n).collect();
  }

  let mut left_child: Vec<usize> = Vec::with_capacity(n - 1);
  let mut right_child: Vec<usize> = Vec::with_capacity(n - 1);
  let mut active = vec![true; n];
  let mut size = vec![1usize; n];
  let mut d = dist.to_owned();
  let mut node_id: Vec<usize> = (0..n).collect();

  for step in 0..(n - 1) {
    let mut min_d = f64::INFINITY;
    let mut mi = 0;
    let mut mj = 0;

    for i in 0..n {
      if !active[i] {
        continue;
      }
      for j in (i + 1)..n {
        if !active[j] {
          continue;
        }
        if d[[i, j]] < min_d {
          min_d = d[[i, j]];
          mi = i;
          mj = j;
        }
      }
    }

    let (a, b) = if node_id[mi] <= node_id[mj] {
      (node_id[mi], node_id[mj])
    } else {
      (node_id[mj], node_id[mi])
    };
    left_child.push(a);
    right_child.push(b);

    let (ni, nj) = (size[mi] as f64, size[mj] as f64);
    let dij2 = d[[mi, mj]].powi(2);
    for k in 0..n {
      if !active[k] || k == mi || k == mj {
        continue;
      }
      let nk = size[k] as f64;
      let updated = ((ni + nk) * d[[mi, k]].powi(2) + (nj + nk) * d[[mj, k]].powi(2) - nk * dij2)
        / (ni + nj + nk);
      let updated = updated.max(0.0).sqrt();
      d[[mi, k]] = updated;
      d[[k, mi]] = updated;
    }

    node_id[mi] = n + step;
    size[mi] += size[mj];
    active[mj] = false;
  }

  fn collect_leaves(node: usize, n: usize, left: &[usize], right: &[usize], out: &mut Vec<usize>) {
    if node < n {
      out.push(node);
    } else {
      let idx = node - n;
      collect_leaves(left[idx], n, left, right, out);
      collect_leaves(right[idx], n, left, right, out);
    }
  }

  let root = n + n - 2;
  let mut order = Vec::with_capacity(n);
  collect_leaves(root, n, &left_child, &right_child, &mut order);
  order
}

fn cluster_var(indices: &[usize], cov: &Array2<f64>) -> f64 {
  let inv_vars: Vec<f64> = indices
    .iter()
    .map(|&i| 1.0 / cov[[i, i]].max(1e-12))
    .collect();
  let total: f64 = inv_vars.iter().sum();
  let w: Vec<f64> = inv_vars.iter().map(|&iv| iv / total).collect();

  let mut var = 0.0;
  for (a, &ia) in indices.iter().enumerate() {
    for (b, &ib) in indices.iter().enumerate() {
      var += w[a] * w[b] * cov[[ia, ib]];
    }
  }
  var
}

fn recursive_bisect(order: &[usize], cov: &Array2<f64>, weights: &mut Array1<f64>) {
  if order.len() <= 1 {
    return;
  }

  let mid = order.len() / 2;
  let left = &order[..mid];
  let right = &order[mid..];

  let var_left = cluster_var(left, cov);
  let var_right = cluster_var(right, cov);

  let denom = var_left + var_right;
  let alpha = if denom > 0.0 {
    1.0 - var_left / denom
  } else {
    0.5
  };

  for &i in left {
    weights[i] *= alpha;
  }
  for &i in right {
    weights[i] *= 1.0 - alpha;
  }

  recursive_bisect(left, cov, weights);
  recursive_bisect(right, cov, weights);
}

/// Long-only HRP weights summing to one.
pub fn hrp_weights(sigma: &Array2<f64>) -> Result<Array1<f64>> {
  let n = linalg::ensure_square(sigma, "HRP sigma")?;
  if n == 0 {
    return Ok(Array1::zeros(0));
  }
  let sigma = linalg::symmetrize(sigma);
  let corr = linalg::corr_from_cov_clipped(&sigma);
  let dist = corr.mapv(|c| (0.5 * (1.0 - c)).max(0.0).sqrt());
  let order = ward_seriation(&dist);

  let mut weights = Array1::ones(n);
  recursive_bisect(&order, &sigma, &mut weights);
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

  #[test]
  fn ward_groups_correlated_pairs() {
    let corr = array![
      [1.0, 0.1, 0.9, 0.1],
      [0.1, 1.0, 0.1, 0.9],
      [0.9, 0.1, 1.0, 0.1],
      [0.1, 0.9, 0.1, 1.0]
    ];
    let dist = corr.mapv(|c: f64| (0.5 * (1.0 - c)).sqrt());
    let order = ward_seriation(&dist);
    let pos = |x: usize| order.iter().position(|&o| o == x).unwrap();
    assert_eq!(pos(0).abs_diff(pos(2)), 1);
    assert_eq!(pos(1).abs_diff(pos(3)), 1);
  }

  #[test]
  fn diagonal_sigma_two_assets_is_inverse_variance() {
    let sigma = array![[0.04, 0.0], [0.0, 0.16]];
    let w = hrp_weights(&sigma).unwrap();
    assert_abs_diff_eq!(w[0], 0.8, epsilon = 1e-12);
    assert_abs_diff_eq!(w[1], 0.2, epsilon = 1e-12);
  }

  #[test]
  fn weights_are_on_simplex() {
    let sigma = array![[0.04, 0.01, 0.0], [0.01, 0.09, 0.03], [0.0, 0.03, 0.16]];
    let w = hrp_weights(&sigma).unwrap();
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-12);
    assert!(w.iter().all(|v| *v > 0.0));
  }
}
