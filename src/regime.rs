//! # Regime
//!
//! $$
//! p^{\text{crisis}}_t \in [0, 1],\quad s_t \in \{\text{inactive}, \text{active}\}
//! $$
//!
//! Crisis committee, hysteresis state machine and the continuous tilt.

pub mod committee;
pub mod hysteresis;

pub use committee::CommitteeWeights;
pub use committee::RegimeRecord;
pub use committee::hmm_crisis_probability;
pub use committee::macro_probability;
pub use committee::regime_probability;
pub use committee::volatility_probability;
pub use hysteresis::Hysteresis;
pub use hysteresis::HysteresisConfig;
pub use hysteresis::RegimeState;
pub use hysteresis::apply_hysteresis;
pub use hysteresis::tilt_lambda;
