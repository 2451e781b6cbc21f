//! # Artefacts
//!
//! $$
//! \texttt{output\_dir}/\langle\text{stage}\rangle/\{\texttt{manifest.json}, \ldots\}
//! $$
//!
//! Per-stage CSV and JSON writers; every stage directory carries a manifest with the seed,
//! thresholds, crate version and creation time.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use ndarray::ArrayView2;
use prettytable::Cell;
use prettytable::Row;
use prettytable::Table;
use serde::Serialize;
use tracing::debug;

use crate::config::RunContext;
use crate::config::Thresholds;
use crate::error::Error;
use crate::error::Result;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Clone, Debug, Serialize)]
pub struct Manifest {
  pub seed: u64,
  pub version: String,
  pub created_at: DateTime<Utc>,
  pub thresholds: Thresholds,
}

/// Writes stage artefacts under the run's output directory.
#[derive(Clone, Debug)]
pub struct ArtifactWriter {
  root: PathBuf,
  manifest: Manifest,
}

impl ArtifactWriter {
  pub fn new(ctx: &RunContext) -> Self {
    Self {
      root: ctx.output_dir().to_path_buf(),
      manifest: Manifest {
        seed: ctx.seed(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        created_at: Utc::now(),
        thresholds: ctx.thresholds().clone(),
      },
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn manifest(&self) -> &Manifest {
    &self.manifest
  }

  /// Directory for `stage`, created with its manifest on first use.
  pub fn stage_dir(&self, stage: &str) -> Result<PathBuf> {
    if stage.is_empty() || stage.contains(['/', '\\']) || stage == ".." {
      return Err(Error::InvalidInput(format!("invalid artefact stage name {stage:?}")));
    }
    let dir = self.root.join(stage);
    fs::create_dir_all(&dir)?;
    let manifest = dir.join(MANIFEST_FILE);
    if !manifest.exists() {
      fs::write(&manifest, serde_json::to_vec_pretty(&self.manifest)?)?;
    }
    Ok(dir)
  }

  /// One CSV row per serialised record; headers come from the record's field names.
  pub fn write_csv<T, I>(&self, stage: &str, name: &str, rows: I) -> Result<PathBuf>
  where
    T: Serialize,
    I: IntoIterator<Item = T>,
  {
    let path = self.stage_dir(stage)?.join(name);
    let mut writer = csv::Writer::from_path(&path)?;
    let mut count = 0usize;
    for row in rows {
      writer.serialize(row)?;
      count += 1;
    }
    writer.flush()?;
    debug!(path = %path.display(), rows = count, "csv artefact written");
    Ok(path)
  }

  /// Labelled matrix: a header of `col_labels` and one row per `row_labels` entry.
  pub fn write_matrix(
    &self,
    stage: &str,
    name: &str,
    index_name: &str,
    row_labels: &[String],
    col_labels: &[String],
    values: ArrayView2<f64>,
  ) -> Result<PathBuf> {
    if values.dim() != (row_labels.len(), col_labels.len()) {
      return Err(Error::shape(
        name,
        format!("{}x{}", row_labels.len(), col_labels.len()),
        format!("{}x{}", values.nrows(), values.ncols()),
      ));
    }
    let path = self.stage_dir(stage)?.join(name);
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(std::iter::once(index_name).chain(col_labels.iter().map(String::as_str)))?;
    for (label, row) in row_labels.iter().zip(values.rows()) {
      let mut record = Vec::with_capacity(row.len() + 1);
      record.push(label.clone());
      record.extend(row.iter().map(|v| v.to_string()));
      writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(path)
  }

  pub fn write_json<T: Serialize + ?Sized>(&self, stage: &str, name: &str, value: &T) -> Result<PathBuf> {
    let path = self.stage_dir(stage)?.join(name);
    fs::write(&path, serde_json::to_vec_pretty(value)?)?;
    debug!(path = %path.display(), "json artefact written");
    Ok(path)
  }

  pub fn write_text(&self, stage: &str, name: &str, text: &str) -> Result<PathBuf> {
    let path = self.stage_dir(stage)?.join(name);
    fs::write(&path, text)?;
    Ok(path)
  }
}

/// Plain-text table for console summaries.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
  let mut table = Table::new();
  table.set_titles(Row::new(headers.iter().map(|h| Cell::new(h)).collect()));
  for row in rows {
    table.add_row(Row::new(row.iter().map(|c| Cell::new(c)).collect()));
  }
  table.to_string()
}

#[cfg(test)]
mod tests {
  use ndarray::array;
  use serde::Deserialize;

  use super::*;

  #[derive(Serialize, Deserialize, Debug, PartialEq)]
  struct Row2 {
    name: String,
    value: f64,
  }

  fn writer(dir: &Path) -> ArtifactWriter {
    let ctx = RunContext::new(7, Thresholds::default(), dir).unwrap();
    ArtifactWriter::new(&ctx)
  }

  #[test]
  fn stage_gets_manifest_with_seed() {
    let tmp = tempfile::tempdir().unwrap();
    let w = writer(tmp.path());
    w.write_json("robustness", "summary.json", &serde_json::json!({ "passes": true }))
      .unwrap();
    let raw = fs::read_to_string(tmp.path().join("robustness").join(MANIFEST_FILE)).unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(manifest["seed"], 7);
    assert_eq!(manifest["version"], env!("CARGO_PKG_VERSION"));
    assert!(manifest["thresholds"]["regime"]["on"].is_number());
  }

  #[test]
  fn csv_rows_read_back() {
    let tmp = tempfile::tempdir().unwrap();
    let w = writer(tmp.path());
    let rows = vec![
      Row2 {
        name: "a".into(),
        value: 1.5,
      },
      Row2 {
        name: "b".into(),
        value: -2.0,
      },
    ];
    let path = w.write_csv("weights", "rows.csv", &rows).unwrap();
    let mut reader = csv::Reader::from_path(path).unwrap();
    let back: Vec<Row2> = reader.deserialize().map(|r| r.unwrap()).collect();
    assert_eq!(back, rows);
  }

  #[test]
  fn matrix_shape_is_checked() {
    let tmp = tempfile::tempdir().unwrap();
    let w = writer(tmp.path());
    let labels = vec!["x".to_string(), "y".to_string()];
    let m = array![[1.0, 0.5], [0.5, 2.0]];
    assert!(w.write_matrix("estimates", "sigma.csv", "factor", &labels, &labels, m.view()).is_ok());
    assert!(w.write_matrix("estimates", "bad.csv", "factor", &labels[..1], &labels, m.view()).is_err());
  }

  #[test]
  fn rejects_nested_stage_names() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(writer(tmp.path()).stage_dir("../escape").is_err());
  }

  #[test]
  fn table_renders_headers() {
    let out = render_table(&["scenario", "max_drawdown"], &[vec!["2008_gfc".into(), "-0.31".into()]]);
    assert!(out.contains("scenario"));
    assert!(out.contains("2008_gfc"));
  }
}
