//! # Gradient-Boosted Trees
//!
//! $$
//! F_m(x) = F_{m-1}(x) + \nu\, h_m(x),\quad h_m = \arg\min_h \sum_{i \in S_m} \big(r_i - h(x_i)\big)^2
//! $$
//!
//! Shallow least-squares regression trees boosted with row subsampling and
//! hold-out early stopping.

use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ordered_float::OrderedFloat;
use rand::Rng;
use rand::seq::SliceRandom;

use crate::numeric;

/// Boosting hyper-parameters.
#[derive(Clone, Debug)]
pub struct BoostingConfig {
  pub n_estimators: usize,
  pub learning_rate: f64,
  pub max_depth: usize,
  /// Fraction of training rows drawn (without replacement) per stage.
  pub subsample: f64,
  pub min_samples_leaf: usize,
  /// Share of rows held out for early stopping.
  pub validation_fraction: f64,
  /// Stages without validation improvement before stopping.
  pub n_iter_no_change: usize,
  pub tol: f64,
}

impl Default for BoostingConfig {
  fn default() -> Self {
    Self {
      n_estimators: 200,
      learning_rate: 0.05,
      max_depth: 2,
      subsample: 0.7,
      min_samples_leaf: 5,
      validation_fraction: 0.2,
      n_iter_no_change: 5,
      tol: 1e-4,
    }
  }
}

#[derive(Clone, Debug)]
enum Node {
  Leaf(f64),
  Split {
    feature: usize,
    threshold: f64,
    left: Box<Node>,
    right: Box<Node>,
  },
}

/// Least-squares regression tree.
#[derive(Clone, Debug)]
pub struct RegressionTree {
  root: Node,
}

impl RegressionTree {
  pub fn fit(
    x: ArrayView2<f64>,
    y: &[f64],
    rows: &[usize],
    max_depth: usize,
    min_samples_leaf: usize,
  ) -> Self {
    Self {
      root: grow(x, y, rows, max_depth, min_samples_leaf.max(1)),
    }
  }

  pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
    let mut node = &self.root;
    loop {
      match node {
        Node::Leaf(v) => return *v,
        Node::Split {
          feature,
          threshold,
          left,
          right,
        } => {
          node = if row[*feature] <= *threshold { left } else { right };
        }
      }
    }
  }
}

fn leaf_value(y: &[f64], rows: &[usize]) -> f64 {
  if rows.is_empty() {
    0.0
  } else {
    rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len() as f64
  }
}

fn grow(x: ArrayView2<f64>, y: &[f64], rows: &[usize], depth: usize, min_leaf: usize) -> Node {
  if depth == 0 || rows.len() < 2 * min_leaf {
    return Node::Leaf(leaf_value(y, rows));
  }

  let mut best: Option<(f64, usize, f64)> = None;
  let total_sum: f64 = rows.iter().map(|&i| y[i]).sum();
  let total_sq: f64 = rows.iter().map(|&i| y[i] * y[i]).sum();
  let parent_sse = total_sq - total_sum * total_sum / rows.len() as f64;

  for feature in 0..x.ncols() {
    let mut order = rows.to_vec();
    order.sort_by_key(|&i| OrderedFloat(x[[i, feature]]));

    let mut left_sum = 0.0;
    let mut left_sq = 0.0;
    for split in 1..order.len() {
      let yi = y[order[split - 1]];
      left_sum += yi;
      left_sq += yi * yi;
      let n_left = split;
      let n_right = order.len() - split;
      if n_left < min_leaf || n_right < min_leaf {
        continue;
      }
      let lo = x[[order[split - 1], feature]];
      let hi = x[[order[split], feature]];
      if lo == hi {
        continue;
      }
      let right_sum = total_sum - left_sum;
      let right_sq = total_sq - left_sq;
      let sse = (left_sq - left_sum * left_sum / n_left as f64)
        + (right_sq - right_sum * right_sum / n_right as f64);
      if best.is_none_or(|(b, _, _)| sse < b) {
        best = Some((sse, feature, 0.5 * (lo + hi)));
      }
    }
  }

  match best {
    Some((sse, feature, threshold)) if sse < parent_sse - 1e-15 => {
      let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
        rows.iter().partition(|&&i| x[[i, feature]] <= threshold);
      Node::Split {
        feature,
        threshold,
        left: Box::new(grow(x, y, &left_rows, depth - 1, min_leaf)),
        right: Box::new(grow(x, y, &right_rows, depth - 1, min_leaf)),
      }
    }
    _ => Node::Leaf(leaf_value(y, rows)),
  }
}

/// Boosted ensemble of regression trees under squared loss.
#[derive(Clone, Debug)]
pub struct GradientBoosting {
  init: f64,
  learning_rate: f64,
  trees: Vec<RegressionTree>,
}

impl GradientBoosting {
  pub fn fit<R: Rng>(x: ArrayView2<f64>, y: &[f64], config: &BoostingConfig, rng: &mut R) -> Self {
    let n = y.len();
    let mut rows: Vec<usize> = (0..n).collect();
    rows.shuffle(rng);
    let n_val = ((n as f64) * config.validation_fraction).ceil() as usize;
    let use_validation = config.n_iter_no_change > 0 && n_val >= 1 && n - n_val >= 2;
    let (val_rows, train_rows) = if use_validation {
      let (v, t) = rows.split_at(n_val);
      (v.to_vec(), t.to_vec())
    } else {
      (Vec::new(), (0..n).collect())
    };

    let train_y: Vec<f64> = train_rows.iter().map(|&i| y[i]).collect();
    let init = numeric::mean(&train_y);
    let mut fitted = vec![init; n];
    let mut trees = Vec::new();
    let mut best_loss = f64::INFINITY;
    let mut stale = 0;
    let draw = ((train_rows.len() as f64) * config.subsample).round().max(1.0) as usize;

    for _ in 0..config.n_estimators {
      let residual: Vec<f64> = (0..n).map(|i| y[i] - fitted[i]).collect();
      let mut stage_rows = train_rows.clone();
      if config.subsample < 1.0 {
        stage_rows.shuffle(rng);
        stage_rows.truncate(draw.min(stage_rows.len()));
      }
      let tree = RegressionTree::fit(
        x,
        &residual,
        &stage_rows,
        config.max_depth,
        config.min_samples_leaf,
      );
      for i in 0..n {
        fitted[i] += config.learning_rate * tree.predict_row(x.row(i));
      }
      trees.push(tree);

      if use_validation {
        let loss = val_rows
          .iter()
          .map(|&i| (y[i] - fitted[i]).powi(2))
          .sum::<f64>()
          / val_rows.len() as f64;
        if loss + config.tol < best_loss {
          best_loss = loss;
          stale = 0;
        } else {
          stale += 1;
          if stale >= config.n_iter_no_change {
            break;
          }
        }
      }
    }

    Self {
      init,
      learning_rate: config.learning_rate,
      trees,
    }
  }

  pub fn n_stages(&self) -> usize {
    self.trees.len()
  }

  pub fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
    x.rows()
      .into_iter()
      .map(|row| {
        self.init
          + self.learning_rate * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use ndarray::Array2;
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  use super::*;

  #[test]
  fn stump_finds_step() {
    let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64);
    let y: Vec<f64> = (0..20).map(|i| if i < 10 { -1.0 } else { 1.0 }).collect();
    let rows: Vec<usize> = (0..20).collect();
    let tree = RegressionTree::fit(x.view(), &y, &rows, 1, 5);
    assert_eq!(tree.predict_row(x.row(2)), -1.0);
    assert_eq!(tree.predict_row(x.row(15)), 1.0);
  }

  #[test]
  fn boosting_reduces_training_error() {
    let x = Array2::from_shape_fn((80, 2), |(i, j)| ((i * (j + 3)) % 17) as f64);
    let y: Vec<f64> = (0..80).map(|i| if x[[i, 0]] > 8.0 { 0.02 } else { -0.01 }).collect();
    let mut rng = StdRng::seed_from_u64(9);
    let model = GradientBoosting::fit(x.view(), &y, &BoostingConfig::default(), &mut rng);
    let pred = model.predict(&x);
    let mse: f64 = pred.iter().zip(&y).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / 80.0;
    let base = numeric::std_dev(&y, 0).powi(2);
    assert!(model.n_stages() >= 1);
    assert!(mse < base);
  }
}
