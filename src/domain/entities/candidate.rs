//! Trade candidate entity and Kelly sizing math
//!
//! A candidate is the optimizer's priced opportunity, frozen before
//! validation: entry, protective stop, profit targets, the model's win
//! probability and a capped Kelly fraction derived from the actual stop
//! distance.

use serde::{Deserialize, Serialize};

use crate::domain::entities::position::Direction;

/// Quarter-Kelly cap applied to the raw fraction.
pub const KELLY_CAP: f64 = 0.25;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCandidate {
    pub instrument: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub targets: Vec<f64>,
    /// Expected profit of the trade in account currency.
    pub expected_profit: f64,
    pub win_probability: f64,
    pub confidence: f64,
    /// Size proposed by the optimizer before Kelly/risk capping.
    pub raw_size: f64,
    pub risk_reward_ratio: f64,
    pub kelly_fraction: f64,
}

impl TradeCandidate {
    /// Distance between entry and protective stop, per unit.
    pub fn risk_per_unit(&self) -> f64 {
        (self.entry - self.stop).abs()
    }

    /// Worst-case loss in account currency if the stop is hit at the
    /// proposed raw size.
    pub fn max_loss(&self) -> f64 {
        self.risk_per_unit() * self.raw_size
    }

    pub fn primary_target(&self) -> Option<f64> {
        self.targets.first().copied()
    }
}

/// Kelly fraction for a trade with win probability `win_probability`,
/// expected profit `expected_profit` and worst-case loss `max_loss`
/// (both in account currency).
///
/// `f* = (p·b − q) / b` with `b = expected_profit / max_loss`, clamped
/// to `[0, KELLY_CAP]`. Degenerate inputs yield 0 rather than an error:
/// a zero fraction simply means no Kelly-backed size.
pub fn kelly_fraction(win_probability: f64, expected_profit: f64, max_loss: f64) -> f64 {
    if !(0.0..=1.0).contains(&win_probability)
        || !expected_profit.is_finite()
        || !max_loss.is_finite()
        || max_loss <= 0.0
    {
        return 0.0;
    }

    let b = expected_profit / max_loss;
    if b <= 0.0 {
        return 0.0;
    }

    let p = win_probability;
    let q = 1.0 - p;
    ((p * b - q) / b).clamp(0.0, KELLY_CAP)
}
