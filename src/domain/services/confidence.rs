//! Adaptive Confidence Gate
//!
//! A bounded proportional controller over the acceptance threshold: on
//! every closed trade the live threshold moves by at most one fixed step
//! inside [min, max]. Correct low-confidence calls loosen the gate;
//! overconfident wrong calls tighten it.

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceThreshold {
    pub base: f64,
    pub current: f64,
    pub min: f64,
    pub max: f64,
    pub adjustment_step: f64,
}

impl Default for ConfidenceThreshold {
    fn default() -> Self {
        Self {
            base: 0.70,
            current: 0.70,
            min: 0.55,
            max: 0.90,
            adjustment_step: 0.01,
        }
    }
}

impl ConfidenceThreshold {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.min <= self.base && self.base <= self.max) {
            return Err(format!(
                "base {} outside [{}, {}]",
                self.base, self.min, self.max
            ));
        }
        if self.adjustment_step <= 0.0 {
            return Err("adjustment step must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdAdjustment {
    Loosened,
    Tightened,
    Unchanged,
}

#[derive(Debug)]
pub struct ConfidenceGate {
    threshold: ConfidenceThreshold,
}

impl ConfidenceGate {
    pub fn new(threshold: ConfidenceThreshold) -> Self {
        Self { threshold }
    }

    pub fn current(&self) -> f64 {
        self.threshold.current
    }

    pub fn threshold(&self) -> &ConfidenceThreshold {
        &self.threshold
    }

    /// Apply the per-trade adjustment rule. Moves at most one step and
    /// never leaves [min, max].
    ///
    /// - Profitable trade admitted below the current threshold: the gate
    ///   was too strict, step toward min.
    /// - Losing trade admitted at or above the threshold: the gate was
    ///   too lax, step toward max.
    pub fn on_trade_closed(&mut self, pnl: f64, confidence: f64) -> ThresholdAdjustment {
        let previous = self.threshold.current;

        let adjustment = if pnl > 0.0 && confidence < previous {
            self.threshold.current =
                (previous - self.threshold.adjustment_step).max(self.threshold.min);
            ThresholdAdjustment::Loosened
        } else if pnl < 0.0 && confidence >= previous {
            self.threshold.current =
                (previous + self.threshold.adjustment_step).min(self.threshold.max);
            ThresholdAdjustment::Tightened
        } else {
            ThresholdAdjustment::Unchanged
        };

        if adjustment != ThresholdAdjustment::Unchanged {
            info!(
                previous,
                current = self.threshold.current,
                "confidence threshold adjusted"
            );
        }
        adjustment
    }
}
