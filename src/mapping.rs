//! # Mapping
//!
//! $$
//! f \in \Delta^{K-1} \;\longmapsto\; w \in \Delta^{N-1}
//! $$
//!
//! Factor allocation to instrument weights through rolling betas, intra-factor HRP and
//! tracking-error and liquidity budgets.

pub mod beta;
pub mod hrp_intra;
pub mod liquidity;
pub mod pipeline;
pub mod te_budget;

pub use beta::BetaCi;
pub use beta::RollingBetas;
pub use beta::beta_ci_bootstrap;
pub use beta::cap_weights_by_beta_ci;
pub use beta::rolling_beta_ridge;
pub use hrp_intra::dominant_factor_labels;
pub use hrp_intra::hrp_weights;
pub use liquidity::clip_trades_to_adv;
pub use liquidity::max_trade_notional;
pub use liquidity::uniform_trade_scale;
pub use pipeline::BetaRow;
pub use pipeline::Liquidity;
pub use pipeline::MappingInputs;
pub use pipeline::MappingOutput;
pub use pipeline::MappingSummary;
pub use pipeline::map_to_instruments;
pub use te_budget::enforce_portfolio_te_budget;
pub use te_budget::enforce_te_budget;
pub use te_budget::tracking_error;
