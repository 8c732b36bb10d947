//! Preflight Gate
//!
//! Cheap, non-exceptional admission checks run before any model work.
//! Checks are independent and never short-circuit: a failed gate reports
//! every failing reason at once so operators see the whole picture.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::entities::observation::Observation;

/// Inputs the gate needs from the rest of the system, gathered by the
/// engine before evaluation.
#[derive(Debug, Clone)]
pub struct PreflightInputs {
    pub connector_healthy: bool,
    /// Drawdown fraction from the session peak, 0..1.
    pub drawdown: f64,
    pub trading_allowed: bool,
    pub risk_breach_reasons: Vec<String>,
    /// A Pending or Monitoring trade already exists on this instrument.
    pub trade_in_flight: bool,
}

#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub passed: bool,
    pub reasons: Vec<String>,
    pub data_quality: f64,
}

#[derive(Debug, Clone)]
pub struct PreflightConfig {
    pub min_data_quality: f64,
    pub max_drawdown: f64,
    pub max_observation_age_secs: f64,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            min_data_quality: 0.8,
            max_drawdown: 0.2,
            max_observation_age_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreflightGate {
    config: PreflightConfig,
}

impl PreflightGate {
    pub fn new(config: PreflightConfig) -> Self {
        Self { config }
    }

    /// Score observation quality in [0, 1]: start at 1.0, subtract 0.3
    /// for a stale observation, 0.2 per missing required field, and
    /// force 0 for an unusable price or negative volume.
    pub fn data_quality(&self, observation: &Observation, now: DateTime<Utc>) -> f64 {
        if observation.price <= 0.0 || observation.volume < 0.0 {
            return 0.0;
        }

        let mut score: f64 = 1.0;

        if observation.age_seconds(now) > self.config.max_observation_age_secs {
            score -= 0.3;
        }

        let missing = [
            observation.price.is_finite(),
            observation.volume.is_finite(),
            observation.atr.is_some(),
            observation.rsi.is_some(),
        ]
        .iter()
        .filter(|present| !**present)
        .count();
        score -= 0.2 * missing as f64;

        score.clamp(0.0, 1.0)
    }

    /// Run every check, collecting all failing reasons.
    pub fn evaluate(&self, observation: &Observation, inputs: &PreflightInputs) -> PreflightReport {
        let now = Utc::now();
        let mut reasons = Vec::new();

        if !inputs.connector_healthy {
            reasons.push("Venue connector unhealthy".to_string());
        }

        if inputs.drawdown >= self.config.max_drawdown {
            reasons.push(format!(
                "Drawdown {:.1}% at or above limit {:.1}%",
                inputs.drawdown * 100.0,
                self.config.max_drawdown * 100.0
            ));
        }

        let data_quality = self.data_quality(observation, now);
        if data_quality < self.config.min_data_quality {
            reasons.push(format!(
                "Data quality {:.2} below minimum {:.2}",
                data_quality, self.config.min_data_quality
            ));
        }

        if !inputs.trading_allowed {
            reasons.extend(inputs.risk_breach_reasons.iter().cloned());
        }

        if inputs.trade_in_flight {
            reasons.push(format!(
                "Trade already in flight for {}",
                observation.instrument
            ));
        }

        let passed = reasons.is_empty();
        if !passed {
            debug!(
                instrument = %observation.instrument,
                ?reasons,
                "preflight rejected observation"
            );
        }

        PreflightReport {
            passed,
            reasons,
            data_quality,
        }
    }
}
