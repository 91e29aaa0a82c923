//! Expected value, edge and stake sizing.
//!
//! The stake is a fixed linear function of the edge: every point of
//! probability the voters see above the market price is worth $2.
//! A negative edge yields a zero stake, but the directional call stands.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

use crate::types::round_to;

/// Dollars staked per unit of edge.
pub const STAKE_PER_UNIT_EDGE: Decimal = dec!(200);

/// EV and edge of backing one side at price `market_price`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeAnalysis {
    /// Mean confidence of the majority group.
    pub ai_probability: f64,
    pub market_price: f64,
    /// Expected profit per unit staked.
    pub expected_value: f64,
    /// `ai_probability - market_price`
    pub edge: f64,
}

impl EdgeAnalysis {
    pub fn new(ai_probability: f64, market_price: f64) -> Self {
        Self {
            ai_probability,
            market_price,
            expected_value: expected_value(ai_probability, market_price),
            edge: ai_probability - market_price,
        }
    }

    /// Stake in USD, rounded to cents. Never negative.
    pub fn stake(&self) -> f64 {
        stake_for_edge(self.edge)
    }
}

/// `EV = p_ai × (1 − price) − (1 − p_ai) × price`
pub fn expected_value(ai_probability: f64, market_price: f64) -> f64 {
    ai_probability * (1.0 - market_price) - (1.0 - ai_probability) * market_price
}

/// `max(edge, 0) × 200`, rounded to 2 dp.
pub fn stake_for_edge(edge: f64) -> f64 {
    if !(edge > 0.0) {
        return 0.0;
    }
    match Decimal::from_f64(edge) {
        Some(e) => (e * STAKE_PER_UNIT_EDGE)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .to_f64()
            .unwrap_or(0.0),
        None => round_to(edge * 200.0, 2),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_value() {
        // Fair price → zero EV.
        assert!(expected_value(0.5, 0.5).abs() < 1e-12);
        assert!((expected_value(0.85, 0.5) - 0.35).abs() < 1e-12);
        assert!(expected_value(0.3, 0.6) < 0.0);
    }

    #[test]
    fn test_stake_scales_with_edge() {
        assert_eq!(stake_for_edge(0.35), 70.0);
        assert_eq!(stake_for_edge(0.12345), 24.69);
        assert_eq!(stake_for_edge(0.0), 0.0);
        assert_eq!(stake_for_edge(-0.2), 0.0);
        assert_eq!(stake_for_edge(f64::NAN), 0.0);
    }

    #[test]
    fn test_analysis() {
        let a = EdgeAnalysis::new(0.85, 0.5);
        assert!((a.edge - 0.35).abs() < 1e-12);
        assert_eq!(a.stake(), 70.0);

        let negative = EdgeAnalysis::new(0.55, 0.7);
        assert!(negative.edge < 0.0);
        assert_eq!(negative.stake(), 0.0);
    }
}
