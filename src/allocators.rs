//! # Allocators
//!
//! $$
//! w^\star = \sum_j \alpha_j\, G_j(\mu, \Sigma, \mathcal{C}),\quad \alpha \in \Delta^{J-1}
//! $$
//!
//! Portfolio generators A-D with ERC balancing and the meta-learner that blends them.

pub mod constraints;
pub mod erc;
pub mod gen_a;
pub mod gen_c;
pub mod gen_d;
pub mod generator;
pub mod hrp;
pub mod meta;
pub mod objectives;
pub mod pipeline;

pub use constraints::Constraints;
pub use constraints::contiguous_clusters;
pub use constraints::project_turnover;
pub use erc::ErcReport;
pub use erc::balance_clusters;
pub use erc::erc_cluster_violation;
pub use erc::risk_contributions;
pub use gen_a::generator_a;
pub use gen_c::dro_closed_form;
pub use gen_d::generator_d;
pub use generator::Allocation;
pub use generator::Generator;
pub use generator::generator_b;
pub use generator::generator_c;
pub use hrp::hrp_weights;
pub use meta::MetaPenalties;
pub use meta::fit_meta_weights;
pub use meta::returns_by_generator;
pub use objectives::clip_normalise;
pub use pipeline::AllocationOutput;
pub use pipeline::GeneratorRun;
pub use pipeline::run_allocation;
pub use pipeline::run_with_fallback;
