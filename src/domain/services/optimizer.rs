//! Opportunity Optimizer
//!
//! The external optimization provider prices a forecast into an
//! opportunity (entry, stop, targets, win probability, raw size); this
//! module finalizes it into an immutable [`TradeCandidate`] by deriving
//! the risk/reward ratio and the capped Kelly fraction from the actual
//! stop distance. An unavailable optimizer aborts the cycle quietly,
//! never as an error.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::entities::candidate::{kelly_fraction, TradeCandidate};
use crate::domain::entities::observation::Observation;
use crate::domain::entities::position::{AccountSnapshot, Position};
use crate::domain::errors::ProviderError;
use crate::domain::services::prediction::Forecast;

/// Priced opportunity returned by the optimization provider.
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub entry: f64,
    pub stop: f64,
    pub targets: Vec<f64>,
    pub expected_profit: f64,
    pub win_probability: f64,
    pub raw_size: f64,
}

#[async_trait]
pub trait OpportunityOptimizer: Send + Sync {
    fn name(&self) -> &str;

    /// Price the forecast given current position and account state.
    /// `Ok(None)` means no opportunity this cycle.
    async fn optimize(
        &self,
        observation: &Observation,
        forecast: &Forecast,
        position: &Position,
        account: &AccountSnapshot,
    ) -> Result<Option<Opportunity>, ProviderError>;
}

/// Wraps the external provider with timeout isolation and candidate
/// finalization.
pub struct CandidateBuilder {
    call_timeout: Duration,
}

impl CandidateBuilder {
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }

    pub async fn build(
        &self,
        optimizer: &dyn OpportunityOptimizer,
        observation: &Observation,
        forecast: &Forecast,
        position: &Position,
        account: &AccountSnapshot,
    ) -> Option<TradeCandidate> {
        let opportunity = match tokio::time::timeout(
            self.call_timeout,
            optimizer.optimize(observation, forecast, position, account),
        )
        .await
        {
            Ok(Ok(Some(opportunity))) => opportunity,
            Ok(Ok(None)) => {
                debug!(instrument = %observation.instrument, "optimizer found no opportunity");
                return None;
            }
            Ok(Err(e)) => {
                warn!(optimizer = optimizer.name(), error = %e, "optimizer unavailable");
                return None;
            }
            Err(_) => {
                warn!(optimizer = optimizer.name(), "optimizer timed out");
                return None;
            }
        };

        self.finalize(observation, forecast, opportunity)
    }

    /// Derive risk/reward and Kelly from the priced opportunity. A
    /// degenerate stop (at or through the entry) voids the candidate.
    fn finalize(
        &self,
        observation: &Observation,
        forecast: &Forecast,
        opportunity: Opportunity,
    ) -> Option<TradeCandidate> {
        let risk_per_unit = (opportunity.entry - opportunity.stop).abs();
        if !risk_per_unit.is_finite() || risk_per_unit <= 0.0 {
            warn!(
                instrument = %observation.instrument,
                entry = opportunity.entry,
                stop = opportunity.stop,
                "rejecting opportunity with degenerate stop distance"
            );
            return None;
        }

        let reward_per_unit = opportunity
            .targets
            .first()
            .map(|target| (target - opportunity.entry).abs())?;
        let risk_reward_ratio = reward_per_unit / risk_per_unit;

        // maxLoss always derives from the real stop distance.
        let max_loss = risk_per_unit * opportunity.raw_size.max(f64::MIN_POSITIVE);
        let kelly = kelly_fraction(
            opportunity.win_probability,
            opportunity.expected_profit,
            max_loss,
        );

        Some(TradeCandidate {
            instrument: observation.instrument.clone(),
            direction: forecast.direction,
            entry: opportunity.entry,
            stop: opportunity.stop,
            targets: opportunity.targets,
            expected_profit: opportunity.expected_profit,
            win_probability: opportunity.win_probability,
            confidence: forecast.confidence,
            raw_size: opportunity.raw_size,
            risk_reward_ratio,
            kelly_fraction: kelly,
        })
    }
}
