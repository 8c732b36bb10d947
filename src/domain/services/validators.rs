//! Validator Registry
//!
//! Every registered validator runs against each candidate, always all of
//! them, so a rejection carries the complete list of failing reasons.
//! Overall validity requires every validator to pass; the aggregate
//! score is the sum of passing scores over the validator count.

use tracing::debug;

use chrono::Timelike;

use crate::domain::entities::candidate::TradeCandidate;
use crate::domain::entities::observation::Observation;
use crate::domain::entities::position::Position;
use crate::domain::services::risk_ledger::RiskState;

/// Result of one validator for one candidate. Produced fresh per cycle,
/// never persisted.
#[derive(Debug, Clone)]
pub struct ValidatorResult {
    pub name: &'static str,
    pub passed: bool,
    pub reason: String,
    pub score: f64,
    pub warning: Option<String>,
}

impl ValidatorResult {
    fn pass(name: &'static str, reason: impl Into<String>, score: f64) -> Self {
        Self {
            name,
            passed: true,
            reason: reason.into(),
            score,
            warning: None,
        }
    }

    fn fail(name: &'static str, reason: impl Into<String>, score: f64) -> Self {
        Self {
            name,
            passed: false,
            reason: reason.into(),
            score,
            warning: None,
        }
    }

    fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

/// Everything a validator may inspect. The adaptive threshold is copied
/// in per cycle so validators stay pure and independently testable.
#[derive(Debug)]
pub struct ValidationContext<'a> {
    pub observation: &'a Observation,
    pub candidate: &'a TradeCandidate,
    pub position: &'a Position,
    pub risk: &'a RiskState,
    pub confidence_threshold: f64,
}

pub trait TradeValidator: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &ValidationContext<'_>) -> ValidatorResult;
}

/// Verdict over the whole registry.
#[derive(Debug, Clone)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub score: f64,
    pub results: Vec<ValidatorResult>,
}

impl ValidationVerdict {
    pub fn failure_reasons(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| format!("{}: {}", r.name, r.reason))
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| r.warning.clone())
            .collect()
    }
}

/// Floors and caps for the built-in validators.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub min_expected_profit: f64,
    pub min_risk_reward: f64,
    /// Cap on atr/price; warning zone starts at 80% of the cap.
    pub max_volatility: f64,
    /// UTC hours during which no trade is admitted.
    pub blocked_hours: Vec<u32>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_expected_profit: 10.0,
            min_risk_reward: 1.5,
            max_volatility: 0.05,
            blocked_hours: Vec::new(),
        }
    }
}

pub struct ValidatorRegistry {
    validators: Vec<Box<dyn TradeValidator>>,
}

impl ValidatorRegistry {
    pub fn empty() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    /// Registry with all built-in validators, in evaluation order.
    pub fn standard(config: &ValidatorConfig) -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(ConfidenceValidator));
        registry.register(Box::new(ExpectedProfitValidator {
            floor: config.min_expected_profit,
        }));
        registry.register(Box::new(RiskRewardValidator {
            floor: config.min_risk_reward,
        }));
        registry.register(Box::new(DirectionValidator));
        registry.register(Box::new(VolatilityValidator {
            cap: config.max_volatility,
        }));
        registry.register(Box::new(TradingHoursValidator {
            blocked_hours: config.blocked_hours.clone(),
        }));
        registry
    }

    pub fn register(&mut self, validator: Box<dyn TradeValidator>) {
        self.validators.push(validator);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Run every validator; no short-circuit.
    pub fn run(&self, ctx: &ValidationContext<'_>) -> ValidationVerdict {
        let results: Vec<ValidatorResult> =
            self.validators.iter().map(|v| v.evaluate(ctx)).collect();

        let valid = results.iter().all(|r| r.passed);
        let passing_score: f64 = results.iter().filter(|r| r.passed).map(|r| r.score).sum();
        let score = if results.is_empty() {
            0.0
        } else {
            passing_score / results.len() as f64
        };

        if !valid {
            debug!(
                instrument = %ctx.candidate.instrument,
                failures = ?results.iter().filter(|r| !r.passed).map(|r| r.name).collect::<Vec<_>>(),
                "candidate failed validation"
            );
        }

        ValidationVerdict {
            valid,
            score,
            results,
        }
    }
}

/// Candidate confidence must meet the current adaptive threshold.
pub struct ConfidenceValidator;

impl TradeValidator for ConfidenceValidator {
    fn name(&self) -> &'static str {
        "confidence"
    }

    fn evaluate(&self, ctx: &ValidationContext<'_>) -> ValidatorResult {
        let confidence = ctx.candidate.confidence;
        let threshold = ctx.confidence_threshold;
        if confidence >= threshold {
            ValidatorResult::pass(
                self.name(),
                format!("confidence {:.2} meets threshold {:.2}", confidence, threshold),
                confidence,
            )
        } else {
            ValidatorResult::fail(
                self.name(),
                format!("confidence {:.2} below threshold {:.2}", confidence, threshold),
                confidence,
            )
        }
    }
}

/// Expected profit must clear a configured floor.
pub struct ExpectedProfitValidator {
    pub floor: f64,
}

impl TradeValidator for ExpectedProfitValidator {
    fn name(&self) -> &'static str {
        "expected_profit"
    }

    fn evaluate(&self, ctx: &ValidationContext<'_>) -> ValidatorResult {
        let profit = ctx.candidate.expected_profit;
        let score = if self.floor > 0.0 {
            (profit / self.floor).clamp(0.0, 1.0)
        } else {
            1.0
        };
        if profit >= self.floor {
            ValidatorResult::pass(
                self.name(),
                format!("expected profit {:.2} above floor {:.2}", profit, self.floor),
                score,
            )
        } else {
            ValidatorResult::fail(
                self.name(),
                format!("expected profit {:.2} below floor {:.2}", profit, self.floor),
                score,
            )
        }
    }
}

/// Risk/reward ratio must clear a configured floor.
pub struct RiskRewardValidator {
    pub floor: f64,
}

impl TradeValidator for RiskRewardValidator {
    fn name(&self) -> &'static str {
        "risk_reward"
    }

    fn evaluate(&self, ctx: &ValidationContext<'_>) -> ValidatorResult {
        let ratio = ctx.candidate.risk_reward_ratio;
        let score = if self.floor > 0.0 {
            (ratio / self.floor).clamp(0.0, 1.0)
        } else {
            1.0
        };
        if ratio >= self.floor {
            ValidatorResult::pass(
                self.name(),
                format!("risk/reward {:.2} above floor {:.2}", ratio, self.floor),
                score,
            )
        } else {
            ValidatorResult::fail(
                self.name(),
                format!("risk/reward {:.2} below floor {:.2}", ratio, self.floor),
                score,
            )
        }
    }
}

/// No directional reversal while a position is open.
pub struct DirectionValidator;

impl TradeValidator for DirectionValidator {
    fn name(&self) -> &'static str {
        "direction"
    }

    fn evaluate(&self, ctx: &ValidationContext<'_>) -> ValidatorResult {
        if ctx.position.direction.is_open()
            && ctx.candidate.direction.opposes(ctx.position.direction)
        {
            ValidatorResult::fail(
                self.name(),
                format!(
                    "reversal not allowed: {} candidate against open {} position",
                    ctx.candidate.direction, ctx.position.direction
                ),
                0.0,
            )
        } else {
            ValidatorResult::pass(self.name(), "no conflicting open position", 1.0)
        }
    }
}

/// Instantaneous volatility (atr/price) must stay under a cap, with a
/// warning zone at 80% of the cap.
pub struct VolatilityValidator {
    pub cap: f64,
}

impl TradeValidator for VolatilityValidator {
    fn name(&self) -> &'static str {
        "volatility"
    }

    fn evaluate(&self, ctx: &ValidationContext<'_>) -> ValidatorResult {
        let Some(volatility) = ctx.observation.volatility() else {
            // Missing atr is already penalized by data quality scoring.
            return ValidatorResult::pass(self.name(), "volatility unavailable", 0.5)
                .with_warning("atr missing, volatility not assessed");
        };

        let score = (1.0 - volatility / self.cap).clamp(0.0, 1.0);
        if volatility > self.cap {
            ValidatorResult::fail(
                self.name(),
                format!("volatility {:.4} above cap {:.4}", volatility, self.cap),
                score,
            )
        } else if volatility > 0.8 * self.cap {
            ValidatorResult::pass(
                self.name(),
                format!("volatility {:.4} within cap {:.4}", volatility, self.cap),
                score,
            )
            .with_warning(format!(
                "volatility {:.4} in warning zone (>80% of cap)",
                volatility
            ))
        } else {
            ValidatorResult::pass(
                self.name(),
                format!("volatility {:.4} within cap {:.4}", volatility, self.cap),
                score,
            )
        }
    }
}

/// Rejects candidates during configured UTC hours.
pub struct TradingHoursValidator {
    pub blocked_hours: Vec<u32>,
}

impl TradeValidator for TradingHoursValidator {
    fn name(&self) -> &'static str {
        "trading_hours"
    }

    fn evaluate(&self, ctx: &ValidationContext<'_>) -> ValidatorResult {
        let hour = ctx.observation.timestamp.hour();
        if self.blocked_hours.contains(&hour) {
            ValidatorResult::fail(
                self.name(),
                format!("hour {:02}:00 UTC is blacklisted", hour),
                0.0,
            )
        } else {
            ValidatorResult::pass(self.name(), "hour not restricted", 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::position::Direction;
    use crate::domain::services::risk_ledger::{RiskLedger, RiskLimits};
    use chrono::{TimeZone, Utc};

    fn candidate() -> TradeCandidate {
        TradeCandidate {
            instrument: "BTC-USD".to_string(),
            direction: Direction::Long,
            entry: 100.0,
            stop: 95.0,
            targets: vec![110.0],
            expected_profit: 100.0,
            win_probability: 0.6,
            confidence: 0.8,
            raw_size: 2.0,
            risk_reward_ratio: 2.0,
            kelly_fraction: 0.1,
        }
    }

    fn observation() -> Observation {
        Observation::new("BTC-USD", 100.0, 10.0).with_indicators(1.0, 50.0)
    }

    fn risk_state() -> RiskState {
        RiskLedger::new(RiskLimits::default(), 10000.0)
            .state()
            .clone()
    }

    fn run_registry(
        registry: &ValidatorRegistry,
        observation: &Observation,
        candidate: &TradeCandidate,
        position: &Position,
        threshold: f64,
    ) -> ValidationVerdict {
        let risk = risk_state();
        registry.run(&ValidationContext {
            observation,
            candidate,
            position,
            risk: &risk,
            confidence_threshold: threshold,
        })
    }

    #[test]
    fn test_standard_registry_passes_clean_candidate() {
        let registry = ValidatorRegistry::standard(&ValidatorConfig::default());
        let verdict = run_registry(
            &registry,
            &observation(),
            &candidate(),
            &Position::flat("BTC-USD"),
            0.75,
        );
        assert!(verdict.valid, "failures: {:?}", verdict.failure_reasons());
        assert!(verdict.score > 0.0);
    }

    #[test]
    fn test_confidence_below_threshold_fails_with_score() {
        // Scenario B: confidence 0.70 against threshold 0.75.
        let registry = ValidatorRegistry::standard(&ValidatorConfig::default());
        let mut c = candidate();
        c.confidence = 0.70;
        let verdict = run_registry(
            &registry,
            &observation(),
            &c,
            &Position::flat("BTC-USD"),
            0.75,
        );

        assert!(!verdict.valid);
        let confidence_result = verdict
            .results
            .iter()
            .find(|r| r.name == "confidence")
            .unwrap();
        assert!(!confidence_result.passed);
        assert!((confidence_result.score - 0.70).abs() < 1e-9);
        // Every other validator still ran.
        assert_eq!(verdict.results.len(), 6);
    }

    #[test]
    fn test_reversal_rejected_while_position_open() {
        // Scenario C: long candidate against an open short.
        let registry = ValidatorRegistry::standard(&ValidatorConfig::default());
        let open_short = Position::open("BTC-USD", Direction::Short, 1.0, 100.0);
        let verdict = run_registry(&registry, &observation(), &candidate(), &open_short, 0.75);

        assert!(!verdict.valid);
        assert!(verdict
            .failure_reasons()
            .iter()
            .any(|r| r.contains("reversal not allowed")));
    }

    #[test]
    fn test_same_direction_addon_allowed() {
        let registry = ValidatorRegistry::standard(&ValidatorConfig::default());
        let open_long = Position::open("BTC-USD", Direction::Long, 1.0, 100.0);
        let verdict = run_registry(&registry, &observation(), &candidate(), &open_long, 0.75);
        assert!(verdict.valid);
    }

    #[test]
    fn test_volatility_cap_and_warning_zone() {
        let validator = VolatilityValidator { cap: 0.05 };
        let risk = risk_state();
        let c = candidate();

        // 0.045 = 90% of cap: pass with warning.
        let obs = Observation::new("BTC-USD", 100.0, 10.0).with_indicators(4.5, 50.0);
        let result = validator.evaluate(&ValidationContext {
            observation: &obs,
            candidate: &c,
            position: &Position::flat("BTC-USD"),
            risk: &risk,
            confidence_threshold: 0.75,
        });
        assert!(result.passed);
        assert!(result.warning.is_some());

        // 0.06 above cap: fail.
        let obs = Observation::new("BTC-USD", 100.0, 10.0).with_indicators(6.0, 50.0);
        let result = validator.evaluate(&ValidationContext {
            observation: &obs,
            candidate: &c,
            position: &Position::flat("BTC-USD"),
            risk: &risk,
            confidence_threshold: 0.75,
        });
        assert!(!result.passed);
    }

    #[test]
    fn test_blocked_hour_rejected() {
        let validator = TradingHoursValidator {
            blocked_hours: vec![3, 4],
        };
        let risk = risk_state();
        let c = candidate();
        let mut obs = observation();
        obs.timestamp = Utc.with_ymd_and_hms(2026, 3, 2, 3, 15, 0).unwrap();

        let result = validator.evaluate(&ValidationContext {
            observation: &obs,
            candidate: &c,
            position: &Position::flat("BTC-USD"),
            risk: &risk,
            confidence_threshold: 0.75,
        });
        assert!(!result.passed);
        assert!(result.reason.contains("03:00"));
    }

    #[test]
    fn test_aggregate_score_counts_only_passing() {
        let registry = ValidatorRegistry::standard(&ValidatorConfig::default());
        let mut c = candidate();
        c.confidence = 0.1; // confidence validator fails with score 0.1
        let verdict = run_registry(
            &registry,
            &observation(),
            &c,
            &Position::flat("BTC-USD"),
            0.75,
        );

        let expected: f64 = verdict
            .results
            .iter()
            .filter(|r| r.passed)
            .map(|r| r.score)
            .sum::<f64>()
            / verdict.results.len() as f64;
        assert!((verdict.score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_registry_names_enumerable() {
        let registry = ValidatorRegistry::standard(&ValidatorConfig::default());
        assert_eq!(
            registry.names(),
            vec![
                "confidence",
                "expected_profit",
                "risk_reward",
                "direction",
                "volatility",
                "trading_hours"
            ]
        );
    }
}
