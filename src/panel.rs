//! # Point-in-Time Panel
//!
//! $$
//! \bar r^{(k)}_{t,i} = \frac{1}{k}\sum_{s=t-k}^{t-1} r_{s,i}
//! $$
//!
//! Return panel, lagged features and macro inputs consumed read-only by the core.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;

use chrono::NaiveDate;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray::s;
use serde::Deserialize;

use crate::error::Error;
use crate::error::Result;
use crate::numeric;

/// Volatility used where the lagged window has too few observations.
pub const VOL_FLOOR: f64 = 1e-6;

/// Log returns indexed by (date, instrument), dates ascending.
#[derive(Clone, Debug)]
pub struct ReturnPanel {
  dates: Vec<NaiveDate>,
  instruments: Vec<String>,
  returns: Array2<f64>,
}

/// Lagged features; row `t` only uses returns strictly before `t`.
#[derive(Clone, Debug)]
pub struct PanelFeatures {
  pub lag_ma_5: Array2<f64>,
  pub lag_ma_21: Array2<f64>,
  pub lag_vol_21: Array2<f64>,
}

#[derive(Debug, Deserialize)]
struct PanelRow {
  date: NaiveDate,
  instrument: String,
  log_return: f64,
}

impl ReturnPanel {
  pub fn new(dates: Vec<NaiveDate>, instruments: Vec<String>, returns: Array2<f64>) -> Result<Self> {
    let (t, n) = returns.dim();
    if t == 0 || n == 0 {
      return Err(Error::EmptySample("return panel".into()));
    }
    if dates.len() != t {
      return Err(Error::shape("return panel dates", t, dates.len()));
    }
    if instruments.len() != n {
      return Err(Error::shape("return panel instruments", n, instruments.len()));
    }
    if dates.windows(2).any(|w| w[0] >= w[1]) {
      return Err(Error::InvalidInput(
        "return panel dates must be strictly increasing".into(),
      ));
    }
    if let Some(((row, col), v)) = returns.indexed_iter().find(|(_, v)| !v.is_finite()) {
      return Err(Error::InvalidInput(format!(
        "non-finite return {v} for {} on {}",
        instruments[col], dates[row]
      )));
    }
    Ok(Self {
      dates,
      instruments,
      returns,
    })
  }

  /// Load a long-format CSV with `date,instrument,log_return` columns.
  pub fn from_csv(path: &Path) -> Result<Self> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut cells: BTreeMap<(NaiveDate, String), f64> = BTreeMap::new();
    let mut dates = BTreeSet::new();
    let mut instruments = BTreeSet::new();
    for row in reader.deserialize() {
      let row: PanelRow = row?;
      dates.insert(row.date);
      instruments.insert(row.instrument.clone());
      cells.insert((row.date, row.instrument), row.log_return);
    }
    let dates: Vec<NaiveDate> = dates.into_iter().collect();
    let instruments: Vec<String> = instruments.into_iter().collect();
    let mut returns = Array2::zeros((dates.len(), instruments.len()));
    for (i, date) in dates.iter().enumerate() {
      for (j, name) in instruments.iter().enumerate() {
        match cells.get(&(*date, name.clone())) {
          Some(v) => returns[[i, j]] = *v,
          None => {
            return Err(Error::InvalidInput(format!(
              "missing return for {name} on {date}"
            )));
          }
        }
      }
    }
    Self::new(dates, instruments, returns)
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn instruments(&self) -> &[String] {
    &self.instruments
  }

  pub fn returns(&self) -> ArrayView2<'_, f64> {
    self.returns.view()
  }

  pub fn n_obs(&self) -> usize {
    self.returns.nrows()
  }

  pub fn n_assets(&self) -> usize {
    self.returns.ncols()
  }

  pub fn column(&self, i: usize) -> ArrayView1<'_, f64> {
    self.returns.column(i)
  }

  /// Cross-sectional mean return per date.
  pub fn average_returns(&self) -> Vec<f64> {
    self
      .returns
      .mean_axis(Axis(1))
      .map(|m| m.to_vec())
      .unwrap_or_default()
  }

  /// Last `n` observations (all of them when `n` exceeds the length).
  pub fn tail(&self, n: usize) -> ReturnPanel {
    let start = self.n_obs().saturating_sub(n.max(1));
    ReturnPanel {
      dates: self.dates[start..].to_vec(),
      instruments: self.instruments.clone(),
      returns: self.returns.slice(s![start.., ..]).to_owned(),
    }
  }

  /// Lagged rolling means and volatility, one column per instrument.
  pub fn features(&self) -> PanelFeatures {
    let (t, n) = self.returns.dim();
    let mut lag_ma_5 = Array2::from_elem((t, n), f64::NAN);
    let mut lag_ma_21 = Array2::from_elem((t, n), f64::NAN);
    let mut lag_vol_21 = Array2::from_elem((t, n), VOL_FLOOR);

    for j in 0..n {
      let mut shifted = vec![f64::NAN; t];
      for i in 1..t {
        shifted[i] = self.returns[[i - 1, j]];
      }
      let ma5 = numeric::rolling_mean(&shifted, 5, 1);
      let ma21 = numeric::rolling_mean(&shifted, 21, 1);
      let vol21 = numeric::rolling_std(&shifted, 21, 5);
      for i in 0..t {
        lag_ma_5[[i, j]] = ma5[i];
        lag_ma_21[[i, j]] = ma21[i];
        if vol21[i].is_finite() {
          lag_vol_21[[i, j]] = vol21[i];
        }
      }
    }

    PanelFeatures {
      lag_ma_5,
      lag_ma_21,
      lag_vol_21,
    }
  }
}

/// Macro inputs aligned to the panel dates. Missing series are `None`.
#[derive(Clone, Debug, Default)]
pub struct MacroSeries {
  pub inflation: Option<Vec<f64>>,
  pub pmi: Option<Vec<f64>>,
  pub real_rate: Option<Vec<f64>>,
  pub policy_rate: Option<Vec<f64>>,
}

impl MacroSeries {
  pub fn is_empty(&self) -> bool {
    self.inflation.is_none()
      && self.pmi.is_none()
      && self.real_rate.is_none()
      && self.policy_rate.is_none()
  }

  /// Checks every present series has `len` observations.
  pub fn ensure_aligned(&self, len: usize) -> Result<()> {
    for (name, series) in self.named() {
      if let Some(values) = series {
        if values.len() != len {
          return Err(Error::shape(&format!("macro series {name}"), len, values.len()));
        }
      }
    }
    Ok(())
  }

  /// Present series as `T x k` columns, forward-filled.
  pub fn feature_matrix(&self, len: usize) -> Option<Array2<f64>> {
    let present: Vec<Vec<f64>> = self
      .named()
      .into_iter()
      .filter_map(|(_, s)| s.map(|v| forward_fill(v)))
      .filter(|v| v.len() == len)
      .collect();
    if present.is_empty() {
      return None;
    }
    Some(Array2::from_shape_fn((len, present.len()), |(i, j)| present[j][i]))
  }

  fn named(&self) -> [(&'static str, Option<&Vec<f64>>); 4] {
    [
      ("inflation", self.inflation.as_ref()),
      ("pmi", self.pmi.as_ref()),
      ("real_rate", self.real_rate.as_ref()),
      ("policy_rate", self.policy_rate.as_ref()),
    ]
  }
}

/// Carries the last finite value forward; leading gaps take the first finite value (zero if none).
pub fn forward_fill(xs: &[f64]) -> Vec<f64> {
  let mut last = f64::NAN;
  let mut out: Vec<f64> = xs
    .iter()
    .map(|&x| {
      if x.is_finite() {
        last = x;
      }
      last
    })
    .collect();
  let first = out.iter().copied().find(|x| x.is_finite()).unwrap_or(0.0);
  for v in out.iter_mut() {
    if !v.is_finite() {
      *v = first;
    } else {
      break;
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use ndarray::Array2;

  use super::*;

  fn dates(n: usize) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
  }

  #[test]
  fn features_are_point_in_time() {
    let returns = Array2::from_shape_fn((30, 2), |(i, j)| (i as f64) * 0.001 + j as f64 * 0.01);
    let panel = ReturnPanel::new(dates(30), vec!["a".into(), "b".into()], returns).unwrap();
    let f = panel.features();
    assert!(f.lag_ma_5[[0, 0]].is_nan());
    // mean of r[5..10] for instrument a
    let expected = (5..10).map(|i| i as f64 * 0.001).sum::<f64>() / 5.0;
    assert!((f.lag_ma_5[[10, 0]] - expected).abs() < 1e-12);
    assert_eq!(f.lag_vol_21[[2, 0]], VOL_FLOOR);
  }

  #[test]
  fn rejects_unsorted_dates() {
    let mut d = dates(3);
    d.swap(0, 1);
    let err = ReturnPanel::new(d, vec!["a".into()], Array2::zeros((3, 1))).unwrap_err();
    assert!(err.to_string().contains("strictly increasing"));
  }

  #[test]
  fn loads_long_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("panel.csv");
    std::fs::write(
      &path,
      "date,instrument,log_return\n2020-01-02,b,0.02\n2020-01-01,a,0.01\n2020-01-01,b,-0.01\n2020-01-02,a,0.0\n",
    )
    .unwrap();
    let panel = ReturnPanel::from_csv(&path).unwrap();
    assert_eq!(panel.instruments(), &["a".to_string(), "b".to_string()]);
    assert_eq!(panel.returns()[[0, 1]], -0.01);
    assert_eq!(panel.returns()[[1, 1]], 0.02);
  }

  #[test]
  fn forward_fill_handles_leading_gaps() {
    let out = forward_fill(&[f64::NAN, 2.0, f64::NAN, 3.0]);
    assert_eq!(out, vec![2.0, 2.0, 2.0, 3.0]);
  }
}
