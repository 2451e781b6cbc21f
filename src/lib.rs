//! # Portfolio Lab
//!
//! $$
//! R \to F \to (\mu, \Sigma) \to w^{F} \to w^{\text{inst}} \to \text{robustness}
//! $$
//!
//! Estimation, allocation, mapping, regime and robustness core for factor portfolio research.

pub mod allocators;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod estimates;
pub mod factors;
pub mod linalg;
pub mod mapping;
pub mod numeric;
pub mod panel;
pub mod pipeline;
pub mod regime;
pub mod rng;
pub mod robustness;

pub use config::GovernanceFlags;
pub use config::RunContext;
pub use config::Thresholds;
pub use error::Error;
pub use error::Result;
pub use pipeline::PipelineInputs;
pub use pipeline::PipelineOutput;
pub use pipeline::run_pipeline;
