//! # Factor Definitions
//!
//! $$
//! f_k \mapsto (\text{name}_k,\ s_k \in \{-1, +1\})
//! $$
//!
//! Named premia with the economic sign each is expected to carry.

use impl_new_derive::ImplNew;
use serde::Serialize;

#[derive(ImplNew, Clone, Debug, PartialEq, Serialize)]
pub struct FactorDefinition {
  pub name: String,
  /// +1 when the premium should pay in its long leg, -1 when it should pay short.
  pub expected_sign: i8,
  pub description: String,
}

const DEFAULTS: [(&str, i8, &str); 11] = [
  ("global_mkt", 1, "Equal-weight market return across the instrument universe"),
  ("global_momentum", 1, "Long recent winners, short recent losers over the trailing month"),
  ("short_term_reversal", 1, "Long last week's losers, short last week's winners"),
  ("value_rebound", 1, "Long instruments with depressed trailing returns"),
  ("carry_roll_down", 1, "Short-window trend in excess of the monthly trend"),
  ("quality_low_vol", 1, "Long low trailing volatility, short high volatility"),
  ("defensive_stability", 1, "Trailing return per unit of volatility"),
  ("liquidity_risk", 1, "Compensation for holding volatile, harder to trade instruments"),
  ("growth_cycle", 1, "Short-horizon growth momentum"),
  ("inflation_hedge", 1, "Change in realised inflation"),
  ("rates_beta", -1, "Sensitivity to moves in the policy rate"),
];

/// The eleven default premia in output column order.
pub fn default_definitions() -> Vec<FactorDefinition> {
  DEFAULTS
    .iter()
    .map(|(name, sign, desc)| FactorDefinition::new(name.to_string(), *sign, desc.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_rates_beta_is_negative() {
    let defs = default_definitions();
    assert_eq!(defs.len(), 11);
    let negative: Vec<&str> = defs
      .iter()
      .filter(|d| d.expected_sign < 0)
      .map(|d| d.name.as_str())
      .collect();
    assert_eq!(negative, vec!["rates_beta"]);
    assert!(defs.iter().all(|d| d.expected_sign.abs() == 1));
  }
}
