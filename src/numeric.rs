//! # Descriptive Statistics
//!
//! $$
//! Q(q) = x_{(\lfloor h \rfloor)} + (h - \lfloor h \rfloor)\,(x_{(\lceil h \rceil)} - x_{(\lfloor h \rfloor)}),\quad h=(n-1)q
//! $$
//!
//! Means, moments, linear quantiles and rolling windows over `f64` slices.

use ordered_float::OrderedFloat;

pub fn mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

/// Standard deviation with `ddof` degrees of freedom removed.
pub fn std_dev(xs: &[f64], ddof: usize) -> f64 {
  if xs.len() <= ddof {
    return 0.0;
  }
  let m = mean(xs);
  let ss: f64 = xs.iter().map(|x| (x - m) * (x - m)).sum();
  (ss / (xs.len() - ddof) as f64).sqrt()
}

/// Sample skewness (bias-adjusted, as in most dataframe libraries).
pub fn skewness(xs: &[f64]) -> f64 {
  let n = xs.len() as f64;
  if xs.len() < 3 {
    return 0.0;
  }
  let m = mean(xs);
  let m2 = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n;
  let m3 = xs.iter().map(|x| (x - m).powi(3)).sum::<f64>() / n;
  if m2 <= 0.0 {
    return 0.0;
  }
  let g1 = m3 / m2.powf(1.5);
  g1 * (n * (n - 1.0)).sqrt() / (n - 2.0)
}

/// Sample excess kurtosis (bias-adjusted).
pub fn excess_kurtosis(xs: &[f64]) -> f64 {
  let n = xs.len() as f64;
  if xs.len() < 4 {
    return 0.0;
  }
  let m = mean(xs);
  let m2 = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n;
  let m4 = xs.iter().map(|x| (x - m).powi(4)).sum::<f64>() / n;
  if m2 <= 0.0 {
    return 0.0;
  }
  let g2 = m4 / (m2 * m2) - 3.0;
  ((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0))
}

pub fn sorted(xs: &[f64]) -> Vec<f64> {
  let mut v: Vec<f64> = xs.iter().copied().filter(|x| !x.is_nan()).collect();
  v.sort_by_key(|&x| OrderedFloat(x));
  v
}

/// Linear-interpolation quantile of an already sorted slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
  if sorted.is_empty() {
    return f64::NAN;
  }
  let q = q.clamp(0.0, 1.0);
  let h = (sorted.len() - 1) as f64 * q;
  let lo = h.floor() as usize;
  let hi = h.ceil() as usize;
  sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Linear-interpolation quantile; NaNs are ignored.
pub fn quantile_linear(xs: &[f64], q: f64) -> f64 {
  quantile_sorted(&sorted(xs), q)
}

pub fn median(xs: &[f64]) -> f64 {
  quantile_linear(xs, 0.5)
}

/// Trailing mean over `window` observations with at least `min_periods` present.
pub fn rolling_mean(xs: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
  rolling_apply(xs, window, min_periods, mean)
}

pub fn rolling_std(xs: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
  rolling_apply(xs, window, min_periods, |w| std_dev(w, 1))
}

pub fn rolling_median(xs: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
  rolling_apply(xs, window, min_periods, median)
}

fn rolling_apply<F: Fn(&[f64]) -> f64>(
  xs: &[f64],
  window: usize,
  min_periods: usize,
  f: F,
) -> Vec<f64> {
  let window = window.max(1);
  (0..xs.len())
    .map(|t| {
      let start = (t + 1).saturating_sub(window);
      let slice: Vec<f64> = xs[start..=t].iter().copied().filter(|x| x.is_finite()).collect();
      if slice.len() < min_periods.max(1) {
        f64::NAN
      } else {
        f(&slice)
      }
    })
    .collect()
}

/// Pearson correlation; zero when either side has no variance.
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
  let n = a.len().min(b.len());
  if n < 2 {
    return 0.0;
  }
  let ma = mean(&a[..n]);
  let mb = mean(&b[..n]);
  let mut sab = 0.0;
  let mut saa = 0.0;
  let mut sbb = 0.0;
  for i in 0..n {
    let da = a[i] - ma;
    let db = b[i] - mb;
    sab += da * db;
    saa += da * da;
    sbb += db * db;
  }
  if saa <= 0.0 || sbb <= 0.0 {
    0.0
  } else {
    sab / (saa * sbb).sqrt()
  }
}
