//! # Regime Hysteresis
//!
//! $$
//! s_{t+1} = \phi(s_t, p_t),\quad \lambda(p) = \operatorname{clip}\Big(\frac{p - 0.55}{0.2}, 0, 1\Big)
//! $$
//!
//! Two-state crisis flag with activation streaks, minimum dwell and cooldown.

use serde::Serialize;

use crate::config::RegimeThresholds;
use crate::error::Error;
use crate::error::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeState {
  #[default]
  Inactive,
  Active,
}

/// Thresholds driving [`Hysteresis::step`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HysteresisConfig {
  pub on: f64,
  pub off: f64,
  pub dwell_days: usize,
  pub cooldown_days: usize,
  pub activate_streak: usize,
  pub deactivate_streak: usize,
}

impl HysteresisConfig {
  pub fn validate(&self) -> Result<()> {
    if !(self.on > self.off) {
      return Err(Error::config("regime.on", "must strictly exceed regime.off"));
    }
    if self.activate_streak == 0 || self.deactivate_streak == 0 {
      return Err(Error::config(
        "regime.activate_streak",
        "activation and deactivation streaks must be at least one observation",
      ));
    }
    Ok(())
  }
}

impl From<&RegimeThresholds> for HysteresisConfig {
  fn from(r: &RegimeThresholds) -> Self {
    Self {
      on: r.on,
      off: r.off,
      dwell_days: r.dwell_days,
      cooldown_days: r.cooldown_days,
      activate_streak: r.activate_streak,
      deactivate_streak: r.deactivate_streak,
    }
  }
}

/// Machine state carried from one observation to the next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Hysteresis {
  pub state: RegimeState,
  /// Observations since the last activation.
  pub days_in_state: usize,
  /// Observations left before re-activation is allowed.
  pub cooldown: usize,
  pub activate_counter: usize,
  pub deactivate_counter: usize,
}

impl Hysteresis {
  pub fn is_active(&self) -> bool {
    self.state == RegimeState::Active
  }

  /// Next state after observing `p`. Non-finite probabilities count as zero.
  pub fn step(self, p: f64, cfg: &HysteresisConfig) -> Self {
    let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
    let mut next = self;
    match self.state {
      RegimeState::Active => {
        next.days_in_state += 1;
        next.deactivate_counter = if p <= cfg.off {
          next.deactivate_counter + 1
        } else {
          0
        };
        if next.deactivate_counter >= cfg.deactivate_streak && next.days_in_state >= cfg.dwell_days {
          next = Hysteresis {
            state: RegimeState::Inactive,
            cooldown: cfg.cooldown_days,
            ..Hysteresis::default()
          };
        }
      }
      RegimeState::Inactive => {
        if next.cooldown > 0 {
          next.cooldown -= 1;
          next.activate_counter = 0;
        } else {
          next.activate_counter = if p >= cfg.on {
            next.activate_counter + 1
          } else {
            0
          };
          if next.activate_counter >= cfg.activate_streak {
            next = Hysteresis {
              state: RegimeState::Active,
              ..Hysteresis::default()
            };
          }
        }
      }
    }
    next
  }
}

/// Fold the machine over `p`, returning the state after each observation.
pub fn apply_hysteresis(p: &[f64], cfg: &HysteresisConfig) -> Result<Vec<RegimeState>> {
  cfg.validate()?;
  Ok(
    p.iter()
      .scan(Hysteresis::default(), |h, &x| {
        *h = h.step(x, cfg);
        Some(h.state)
      })
      .collect(),
  )
}

/// Continuous crisis tilt, independent of the discrete flag.
pub fn tilt_lambda(p: f64) -> f64 {
  ((p - 0.55) / 0.2).clamp(0.0, 1.0)
}
