//! Prediction Aggregator
//!
//! Calls every configured prediction provider with per-call fault
//! isolation and merges their forecasts into one combined descriptor.
//! A provider that errors or times out contributes nothing; if every
//! provider fails the aggregator returns a deterministic conservative
//! fallback instead of aborting the cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::entities::observation::Observation;
use crate::domain::entities::position::{Direction, Position};
use crate::domain::errors::ProviderError;

/// Directional forecast returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub direction: Direction,
    /// 0..1
    pub confidence: f64,
    /// Expected profit in account currency.
    pub expected_profit: f64,
    /// Raw signal strength, provider-defined scale.
    pub strength: f64,
}

impl Forecast {
    /// Deterministic conservative fallback used when no provider
    /// contributes.
    pub fn fallback() -> Self {
        Self {
            direction: Direction::Flat,
            confidence: 0.0,
            expected_profit: 0.0,
            strength: 0.0,
        }
    }
}

#[async_trait]
pub trait PredictionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn predict(
        &self,
        observation: &Observation,
        position: &Position,
    ) -> Result<Forecast, ProviderError>;
}

pub struct PredictionAggregator {
    providers: Vec<Arc<dyn PredictionProvider>>,
    call_timeout: Duration,
    /// Multiplier applied to confidence and strength when the merged
    /// signal would reverse an open position.
    reversal_damping: f64,
}

impl PredictionAggregator {
    pub fn new(
        providers: Vec<Arc<dyn PredictionProvider>>,
        call_timeout: Duration,
        reversal_damping: f64,
    ) -> Self {
        Self {
            providers,
            call_timeout,
            reversal_damping,
        }
    }

    /// Query every provider and merge the successful forecasts.
    pub async fn aggregate(&self, observation: &Observation, position: &Position) -> Forecast {
        let mut forecasts = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            match tokio::time::timeout(self.call_timeout, provider.predict(observation, position))
                .await
            {
                Ok(Ok(forecast)) => forecasts.push(forecast),
                Ok(Err(e)) => {
                    warn!(provider = provider.name(), error = %e, "prediction provider failed");
                }
                Err(_) => {
                    warn!(provider = provider.name(), "prediction provider timed out");
                }
            }
        }

        if forecasts.is_empty() {
            debug!(
                instrument = %observation.instrument,
                "no provider contributions, using fallback forecast"
            );
            return Forecast::fallback();
        }

        self.merge(&forecasts, position)
    }

    /// Merge contributions by netting signed confidence, then damp a
    /// merged signal that would reverse an open position.
    fn merge(&self, forecasts: &[Forecast], position: &Position) -> Forecast {
        let n = forecasts.len() as f64;
        let net: f64 = forecasts
            .iter()
            .map(|f| f.direction.sign() * f.confidence)
            .sum();

        let direction = if net > 0.0 {
            Direction::Long
        } else if net < 0.0 {
            Direction::Short
        } else {
            Direction::Flat
        };

        let mut confidence = (net.abs() / n).clamp(0.0, 1.0);
        let expected_profit = forecasts.iter().map(|f| f.expected_profit).sum::<f64>() / n;
        let mut strength = forecasts.iter().map(|f| f.strength).sum::<f64>() / n;

        if position.direction.is_open() && direction.opposes(position.direction) {
            debug!(
                instrument = %position.instrument,
                "damping signal that reverses open position"
            );
            confidence *= self.reversal_damping;
            strength *= self.reversal_damping;
        }

        Forecast {
            direction,
            confidence,
            expected_profit,
            strength,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        name: &'static str,
        forecast: Forecast,
    }

    #[async_trait]
    impl PredictionProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn predict(
            &self,
            _observation: &Observation,
            _position: &Position,
        ) -> Result<Forecast, ProviderError> {
            Ok(self.forecast.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl PredictionProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn predict(
            &self,
            _observation: &Observation,
            _position: &Position,
        ) -> Result<Forecast, ProviderError> {
            Err(ProviderError::Unavailable("model offline".to_string()))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl PredictionProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn predict(
            &self,
            _observation: &Observation,
            _position: &Position,
        ) -> Result<Forecast, ProviderError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Forecast::fallback())
        }
    }

    fn long_forecast(confidence: f64) -> Forecast {
        Forecast {
            direction: Direction::Long,
            confidence,
            expected_profit: 100.0,
            strength: 1.0,
        }
    }

    fn observation() -> Observation {
        Observation::new("BTC-USD", 50000.0, 10.0).with_indicators(400.0, 55.0)
    }

    #[tokio::test]
    async fn test_all_providers_failing_yields_fallback() {
        let aggregator = PredictionAggregator::new(
            vec![Arc::new(FailingProvider), Arc::new(FailingProvider)],
            Duration::from_millis(100),
            0.5,
        );
        let forecast = aggregator
            .aggregate(&observation(), &Position::flat("BTC-USD"))
            .await;
        assert_eq!(forecast, Forecast::fallback());
    }

    #[tokio::test]
    async fn test_provider_fault_is_isolated() {
        let aggregator = PredictionAggregator::new(
            vec![
                Arc::new(FailingProvider),
                Arc::new(FixedProvider {
                    name: "good",
                    forecast: long_forecast(0.8),
                }),
            ],
            Duration::from_millis(100),
            0.5,
        );
        let forecast = aggregator
            .aggregate(&observation(), &Position::flat("BTC-USD"))
            .await;
        assert_eq!(forecast.direction, Direction::Long);
        assert!((forecast.confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let aggregator = PredictionAggregator::new(
            vec![
                Arc::new(SlowProvider),
                Arc::new(FixedProvider {
                    name: "good",
                    forecast: long_forecast(0.6),
                }),
            ],
            Duration::from_millis(50),
            0.5,
        );
        let forecast = aggregator
            .aggregate(&observation(), &Position::flat("BTC-USD"))
            .await;
        assert_eq!(forecast.direction, Direction::Long);
    }

    #[tokio::test]
    async fn test_opposing_forecasts_net_out() {
        let aggregator = PredictionAggregator::new(
            vec![
                Arc::new(FixedProvider {
                    name: "bull",
                    forecast: long_forecast(0.9),
                }),
                Arc::new(FixedProvider {
                    name: "bear",
                    forecast: Forecast {
                        direction: Direction::Short,
                        confidence: 0.3,
                        expected_profit: 50.0,
                        strength: 0.5,
                    },
                }),
            ],
            Duration::from_millis(100),
            0.5,
        );
        let forecast = aggregator
            .aggregate(&observation(), &Position::flat("BTC-USD"))
            .await;
        assert_eq!(forecast.direction, Direction::Long);
        assert!((forecast.confidence - 0.3).abs() < 1e-9); // (0.9 - 0.3) / 2
    }

    #[tokio::test]
    async fn test_reversal_signal_is_damped() {
        let aggregator = PredictionAggregator::new(
            vec![Arc::new(FixedProvider {
                name: "bear",
                forecast: Forecast {
                    direction: Direction::Short,
                    confidence: 0.8,
                    expected_profit: 100.0,
                    strength: 1.0,
                },
            })],
            Duration::from_millis(100),
            0.5,
        );
        let open_long = Position::open("BTC-USD", Direction::Long, 1.0, 50000.0);
        let forecast = aggregator.aggregate(&observation(), &open_long).await;
        assert_eq!(forecast.direction, Direction::Short);
        assert!((forecast.confidence - 0.4).abs() < 1e-9);
    }
}
