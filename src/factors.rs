//! # Factors
//!
//! $$
//! F_{t,k} = \text{premium}_k\big(R_{<t},\, M_{\le t}\big)
//! $$
//!
//! Factor definitions, the premia library, orthogonality control and statistical validation.

pub mod definitions;
pub mod library;
pub mod orthogonality;
pub mod pipeline;
pub mod validation;

pub use definitions::FactorDefinition;
pub use definitions::default_definitions;
pub use library::FactorSet;
pub use library::compute_factors;
pub use library::quantile_spread;
pub use orthogonality::OrthogonalizationResult;
pub use orthogonality::enforce_orthogonality;
pub use orthogonality::merge_correlated_factors;
pub use pipeline::FactorOutput;
pub use pipeline::run_factor_pipeline;
pub use validation::FactorValidation;
pub use validation::ValidationParams;
pub use validation::cross_purged_splits;
pub use validation::deflated_sharpe_ratio;
pub use validation::fdr_bh;
pub use validation::sharpe_ratio;
pub use validation::validate_factor_set;
pub use validation::white_reality_check_pvalue;
