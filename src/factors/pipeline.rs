//! # Factor Stage
//!
//! $$
//! R \;\to\; F \;\to\; \tilde F \;\to\; \{SR, DSR, p, IC\}
//! $$
//!
//! Computes the premia, orthogonalises them, validates the result and writes the factor artefacts.

use serde::Serialize;
use tracing::info;
use tracing::warn;

use super::definitions::FactorDefinition;
use super::library::FactorSet;
use super::library::compute_factors;
use super::library::definitions_for;
use super::orthogonality::DroppedFactor;
use super::orthogonality::MergeMap;
use super::orthogonality::OrthogonalizationResult;
use super::orthogonality::enforce_orthogonality;
use super::validation::FactorValidation;
use super::validation::ValidationParams;
use super::validation::validate_factor_set;
use crate::artifacts::ArtifactWriter;
use crate::config::RunContext;
use crate::error::Result;
use crate::panel::MacroSeries;
use crate::panel::ReturnPanel;

pub const STAGE: &str = "factors";

#[derive(Clone, Debug)]
pub struct FactorOutput {
  pub definitions: Vec<FactorDefinition>,
  pub raw: FactorSet,
  pub orthogonal: OrthogonalizationResult,
  pub validation: Vec<FactorValidation>,
}

impl FactorOutput {
  /// Factors handed to the estimation stage.
  pub fn factors(&self) -> &FactorSet {
    &self.orthogonal.factors
  }

  /// Expected sign per orthogonal column; zero for rotated components.
  pub fn signs(&self) -> Vec<i8> {
    let defs = definitions_for(&self.raw);
    self
      .orthogonal
      .factors
      .names
      .iter()
      .map(|name| {
        defs
          .iter()
          .find(|d| &d.name == name)
          .map_or(0, |d| d.expected_sign)
      })
      .collect()
  }
}

#[derive(Serialize)]
struct Metadata<'a> {
  definitions: &'a [FactorDefinition],
  merged: &'a MergeMap,
  dropped: &'a [DroppedFactor],
  condition_number: f64,
  columns: &'a [String],
}

/// Run the factor stage; artefacts are written only when `writer` is given.
pub fn run_factor_pipeline(
  panel: &ReturnPanel,
  macro_series: Option<&MacroSeries>,
  ctx: &RunContext,
  writer: Option<&ArtifactWriter>,
) -> Result<FactorOutput> {
  let params = &ctx.thresholds().factors;
  let raw = compute_factors(panel, macro_series, ctx.stream_seed(STAGE))?;
  let definitions = definitions_for(&raw);
  let orthogonal = enforce_orthogonality(&raw, params.corr_threshold, params.cond_threshold)?;

  let target = panel.average_returns();
  let validation = match validate_factor_set(
    &orthogonal.factors,
    &target,
    &ValidationParams::from(params),
    ctx.stream_seed("factors.validation"),
  ) {
    Ok(v) => v,
    Err(e) => {
      warn!(error = %e, "factor validation skipped");
      Vec::new()
    }
  };

  if let Some(w) = writer {
    w.write_matrix(STAGE, "factors.csv", "date", &raw.date_labels(), &raw.names, raw.view())?;
    let orth = &orthogonal.factors;
    w.write_matrix(STAGE, "factors_orthogonal.csv", "date", &orth.date_labels(), &orth.names, orth.view())?;
    w.write_matrix(
      STAGE,
      "orth_loadings.csv",
      "factor",
      &orthogonal.loading_inputs,
      &orth.names,
      orthogonal.loadings.view(),
    )?;
    w.write_json(
      STAGE,
      "metadata.json",
      &Metadata {
        definitions: &definitions,
        merged: &orthogonal.merged,
        dropped: &orthogonal.dropped,
        condition_number: orthogonal.condition_number,
        columns: &orth.names,
      },
    )?;
    if !validation.is_empty() {
      w.write_csv(STAGE, "validation.csv", &validation)?;
    }
  }

  info!(
    raw = raw.n_factors(),
    orthogonal = orthogonal.factors.n_factors(),
    condition_number = orthogonal.condition_number,
    "factor stage done"
  );
  Ok(FactorOutput {
    definitions,
    raw,
    orthogonal,
    validation,
  })
}
