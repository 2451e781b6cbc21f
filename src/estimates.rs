//! # Estimates
//!
//! $$
//! (\mu, \Sigma) = \mathcal{E}\big(R_{1:T}, X_{1:T}\big)
//! $$
//!
//! Covariance estimators with PSD enforcement and the expected-return ensemble.

pub mod bl;
pub mod drift;
pub mod mu;
pub mod pipeline;
pub mod psd;
pub mod sigma;
pub mod trees;

pub use bl::BlendReason;
pub use bl::MuBlend;
pub use bl::blend_mu;
pub use bl::information_ratio;
pub use bl::reverse_opt_mu_eq;
pub use drift::DriftRecord;
pub use drift::frobenius_relative_drift;
pub use drift::max_corr_drift;
pub use mu::estimate_mu_ensemble;
pub use mu::shrink_to_zero;
pub use mu::stack_weights;
pub use pipeline::EstimateOutput;
pub use pipeline::SigmaEstimate;
pub use pipeline::estimate_mu;
pub use pipeline::estimate_sigma;
pub use pipeline::run_estimates;
pub use psd::min_eigenvalue;
pub use psd::project_to_psd;
pub use sigma::CandidateOutcome;
pub use sigma::CovarianceEstimator;
pub use sigma::ewma_regime;
pub use sigma::factor_shrink;
pub use sigma::graphical_lasso_bic;
pub use sigma::ledoit_wolf;
pub use sigma::median_of_covariances;
pub use sigma::sigma_spd_median;
