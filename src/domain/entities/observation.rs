//! Market observation entity
//!
//! An observation is the immutable input of one pipeline run: instrument,
//! last price, traded volume, and the derived indicators the enrichment
//! pipeline attached. Indicators are optional because upstream feeds can
//! drop them; the preflight gate scores that degradation instead of
//! failing hard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub instrument: String,
    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
    /// Average true range, absolute price units.
    pub atr: Option<f64>,
    /// Relative strength index, 0..100.
    pub rsi: Option<f64>,
}

impl Observation {
    pub fn new(instrument: impl Into<String>, price: f64, volume: f64) -> Self {
        Self {
            instrument: instrument.into(),
            price,
            volume,
            timestamp: Utc::now(),
            atr: None,
            rsi: None,
        }
    }

    pub fn with_indicators(mut self, atr: f64, rsi: f64) -> Self {
        self.atr = Some(atr);
        self.rsi = Some(rsi);
        self
    }

    /// Age of the observation relative to `now`, in seconds. Clock skew
    /// can make this negative; callers treat negative as fresh.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 1000.0
    }

    /// Instantaneous volatility proxy: atr / price. None when the atr is
    /// missing or the price is not usable.
    pub fn volatility(&self) -> Option<f64> {
        let atr = self.atr?;
        if self.price > 0.0 && atr.is_finite() && atr >= 0.0 {
            Some(atr / self.price)
        } else {
            None
        }
    }
}
