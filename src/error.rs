//! # Errors
//!
//! $$
//! \mathrm{Result}\langle T \rangle = \mathrm{Ok}(T) \mid \mathrm{Err}(E)
//! $$
//!
//! Error taxonomy shared by every stage of the research core.

use std::fmt;

use thiserror::Error;

/// Constraint that made a convex allocation infeasible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InfeasibleConstraint {
  GrossLeverage,
  Turnover,
  Cvar,
  Edar,
}

impl fmt::Display for InfeasibleConstraint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      InfeasibleConstraint::GrossLeverage => write!(f, "gross leverage cap"),
      InfeasibleConstraint::Turnover => write!(f, "turnover cap"),
      InfeasibleConstraint::Cvar => write!(f, "CVaR cap"),
      InfeasibleConstraint::Edar => write!(f, "EDaR cap"),
    }
  }
}

#[derive(Error, Debug)]
pub enum Error {
  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
  ShapeMismatch {
    context: String,
    expected: String,
    actual: String,
  },

  #[error("empty sample: {0}")]
  EmptySample(String),

  #[error("non-positive variance in {matrix} at index {index} ({value})")]
  NonPositiveVariance {
    matrix: String,
    index: usize,
    value: f64,
  },

  #[error("{estimator} failed to converge: {reason}")]
  Convergence { estimator: String, reason: String },

  #[error("infeasible allocation in {generator}: {constraint} ({detail})")]
  Infeasible {
    generator: String,
    constraint: InfeasibleConstraint,
    detail: String,
  },

  #[error("degenerate series {name}: {reason}")]
  DegenerateSeries { name: String, reason: String },

  #[error("config error: {field}: {reason}")]
  Config { field: String, reason: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("csv error: {0}")]
  Csv(#[from] csv::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("toml error: {0}")]
  Toml(#[from] toml::de::Error),
}

impl Error {
  pub(crate) fn shape(context: &str, expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
    Error::ShapeMismatch {
      context: context.to_string(),
      expected: expected.to_string(),
      actual: actual.to_string(),
    }
  }

  pub(crate) fn config(field: &str, reason: impl Into<String>) -> Self {
    Error::Config {
      field: field.to_string(),
      reason: reason.into(),
    }
  }

  /// True when the error signals an infeasible convex program, so callers may fall back.
  pub fn is_infeasible(&self) -> bool {
    matches!(self, Error::Infeasible { .. })
  }
}

pub type Result<T> = std::result::Result<T, Error>;
