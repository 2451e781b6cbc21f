//! # Robustness
//!
//! $$
//! \Pr\big(\mathrm{MaxDD} \le \tau\big) \le 1 - \alpha,\quad Q_{1-\alpha}(\mathrm{CAGR}) \ge g
//! $$
//!
//! Block bootstrap gates, historical shock replay and governance ablation.

pub mod ablation;
pub mod bootstrap;
pub mod lab;
pub mod scenarios;

pub use ablation::AblationOutcome;
pub use ablation::AblationRow;
pub use ablation::DEFAULT_FEATURES;
pub use ablation::Metrics;
pub use ablation::run_ablation_study;
pub use bootstrap::BootstrapDraw;
pub use bootstrap::RobustnessGates;
pub use bootstrap::block_bootstrap;
pub use bootstrap::block_bootstrap_metrics;
pub use bootstrap::cagr;
pub use bootstrap::eb_lower_bound;
pub use bootstrap::max_drawdown;
pub use bootstrap::sharpe;
pub use lab::AblationRunner;
pub use lab::RobustnessReport;
pub use lab::run_robustness_lab;
pub use scenarios::ScenarioOutcome;
pub use scenarios::ShockScenario;
pub use scenarios::default_shocks;
pub use scenarios::replay_shocks;
