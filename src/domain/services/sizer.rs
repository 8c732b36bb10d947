//! Position Sizer
//!
//! Turns a validated candidate into a whole-unit order size:
//! min(raw, Kelly-backed, risk-capped), scaled down by an inverse
//! volatility multiplier. Sizing never blocks an admitted trade; any
//! failure degrades to the safe default of 1 unit.

use tracing::warn;

use crate::domain::entities::candidate::TradeCandidate;
use crate::domain::entities::observation::Observation;
use crate::domain::entities::position::AccountSnapshot;

#[derive(Debug, Clone)]
pub struct SizerConfig {
    /// Maximum dollars at risk per trade (stop distance x size).
    pub max_risk_per_trade: f64,
    /// Steepness of the inverse-volatility shrink.
    pub volatility_scale: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade: 200.0,
            volatility_scale: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizerConfig,
}

impl PositionSizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    /// Compute the final whole-unit size, >= 1.
    pub fn size(
        &self,
        candidate: &TradeCandidate,
        account: &AccountSnapshot,
        observation: &Observation,
    ) -> u64 {
        match self.try_size(candidate, account, observation) {
            Some(size) => size,
            None => {
                warn!(
                    instrument = %candidate.instrument,
                    "sizing failed, degrading to 1 unit"
                );
                1
            }
        }
    }

    fn try_size(
        &self,
        candidate: &TradeCandidate,
        account: &AccountSnapshot,
        observation: &Observation,
    ) -> Option<u64> {
        let risk_per_unit = candidate.risk_per_unit();
        if !risk_per_unit.is_finite() || risk_per_unit <= 0.0 {
            return None;
        }
        if !candidate.kelly_fraction.is_finite() || !candidate.raw_size.is_finite() {
            return None;
        }

        let kelly_size = candidate.kelly_fraction * account.equity / risk_per_unit;
        let mut size = candidate.raw_size.min(kelly_size);

        let risk_capped = self.config.max_risk_per_trade / risk_per_unit;
        size = size.min(risk_capped);

        // Shrinks as atr/price rises; missing atr leaves size unchanged.
        if let Some(volatility) = observation.volatility() {
            size *= 1.0 / (1.0 + self.config.volatility_scale * volatility);
        }

        if !size.is_finite() {
            return None;
        }

        Some((size.round() as i64).max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::position::Direction;

    fn candidate(kelly: f64, raw_size: f64) -> TradeCandidate {
        TradeCandidate {
            instrument: "BTC-USD".to_string(),
            direction: Direction::Long,
            entry: 100.0,
            stop: 98.0, // risk 2 per unit
            targets: vec![106.0],
            expected_profit: 60.0,
            win_probability: 0.6,
            confidence: 0.8,
            raw_size,
            risk_reward_ratio: 3.0,
            kelly_fraction: kelly,
        }
    }

    fn calm_observation() -> Observation {
        Observation::new("BTC-USD", 100.0, 10.0).with_indicators(0.0, 50.0)
    }

    fn sizer(max_risk: f64) -> PositionSizer {
        PositionSizer::new(SizerConfig {
            max_risk_per_trade: max_risk,
            volatility_scale: 10.0,
        })
    }

    #[test]
    fn test_raw_size_binds_when_kelly_is_large() {
        // kelly size = 0.25 * 10000 / 2 = 1250, raw 50 binds, risk cap 1000/2=500.
        let size = sizer(1000.0).size(
            &candidate(0.25, 50.0),
            &AccountSnapshot::new(10000.0),
            &calm_observation(),
        );
        assert_eq!(size, 50);
    }

    #[test]
    fn test_kelly_binds_when_small() {
        // kelly size = 0.01 * 10000 / 2 = 50, raw 500.
        let size = sizer(100000.0).size(
            &candidate(0.01, 500.0),
            &AccountSnapshot::new(10000.0),
            &calm_observation(),
        );
        assert_eq!(size, 50);
    }

    #[test]
    fn test_risk_cap_binds() {
        // risk cap = 40 / 2 = 20 units.
        let size = sizer(40.0).size(
            &candidate(0.25, 500.0),
            &AccountSnapshot::new(100000.0),
            &calm_observation(),
        );
        assert_eq!(size, 20);
    }

    #[test]
    fn test_volatility_shrinks_size() {
        // atr/price = 0.02, multiplier = 1 / (1 + 10*0.02) = 1/1.2
        let obs = Observation::new("BTC-USD", 100.0, 10.0).with_indicators(2.0, 50.0);
        let size = sizer(1000.0).size(&candidate(0.25, 60.0), &AccountSnapshot::new(10000.0), &obs);
        assert_eq!(size, 50); // 60 / 1.2
    }

    #[test]
    fn test_degrades_to_one_unit_on_bad_inputs() {
        let mut c = candidate(0.25, 50.0);
        c.stop = c.entry; // zero risk per unit
        let size = sizer(1000.0).size(&c, &AccountSnapshot::new(10000.0), &calm_observation());
        assert_eq!(size, 1);

        let c = candidate(f64::NAN, 50.0);
        let size = sizer(1000.0).size(&c, &AccountSnapshot::new(10000.0), &calm_observation());
        assert_eq!(size, 1);
    }

    #[test]
    fn test_floors_at_one_unit() {
        // Tiny kelly on a tiny account rounds to zero, floored to 1.
        let size = sizer(1000.0).size(
            &candidate(0.001, 50.0),
            &AccountSnapshot::new(100.0),
            &calm_observation(),
        );
        assert_eq!(size, 1);
    }
}
