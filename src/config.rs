//! Engine configuration
//!
//! Every tunable has a safe default; `EngineConfig::from_env` overlays
//! `SENTRA_*` environment variables (a `.env` file is honored when
//! present) and validates ranges before the engine starts.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::application::actors::execution_actor::ExecutionConfig;
use crate::application::actors::reconciliation_actor::ReconciliationConfig;
use crate::domain::errors::EngineError;
use crate::domain::services::confidence::ConfidenceThreshold;
use crate::domain::services::preflight::PreflightConfig;
use crate::domain::services::risk_ledger::RiskLimits;
use crate::domain::services::sizer::SizerConfig;
use crate::domain::services::validators::ValidatorConfig;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Instruments the engine trades and reconciles.
    pub instruments: Vec<String>,
    pub risk_limits: RiskLimits,
    pub preflight: PreflightConfig,
    pub validators: ValidatorConfig,
    pub sizer: SizerConfig,
    pub threshold: ConfidenceThreshold,
    pub execution: ExecutionConfig,
    pub reconciliation_interval: Duration,
    pub reconciliation_query_timeout: Duration,
    /// Per-call budget for prediction providers.
    pub provider_timeout: Duration,
    /// Per-call budget for the opportunity optimizer.
    pub optimizer_timeout: Duration,
    /// Confidence multiplier applied to signals that would reverse an
    /// open position.
    pub reversal_damping: f64,
    /// Where the crash-recovery snapshot is written. `None` disables
    /// persistence.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instruments: vec!["BTC-USD".to_string()],
            risk_limits: RiskLimits::default(),
            preflight: PreflightConfig::default(),
            validators: ValidatorConfig::default(),
            sizer: SizerConfig::default(),
            threshold: ConfidenceThreshold::default(),
            execution: ExecutionConfig::default(),
            reconciliation_interval: Duration::from_secs(30),
            reconciliation_query_timeout: Duration::from_secs(5),
            provider_timeout: Duration::from_secs(2),
            optimizer_timeout: Duration::from_secs(2),
            reversal_damping: 0.5,
            snapshot_path: Some(PathBuf::from("sentra_snapshot.json")),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `SENTRA_*` environment variables.
    pub fn from_env() -> Result<Self, EngineError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Some(list) = read_var("SENTRA_INSTRUMENTS") {
            config.instruments = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(v) = parse_var::<f64>("SENTRA_MAX_DAILY_LOSS")? {
            config.risk_limits.max_daily_loss = v;
        }
        if let Some(v) = parse_var::<u32>("SENTRA_MAX_DAILY_TRADES")? {
            config.risk_limits.max_daily_trades = v;
        }
        if let Some(v) = parse_var::<u32>("SENTRA_MAX_CONSECUTIVE_LOSSES")? {
            config.risk_limits.max_consecutive_losses = v;
        }

        if let Some(v) = parse_var::<f64>("SENTRA_MIN_DATA_QUALITY")? {
            config.preflight.min_data_quality = v;
        }
        if let Some(v) = parse_var::<f64>("SENTRA_MAX_DRAWDOWN")? {
            config.preflight.max_drawdown = v;
        }

        if let Some(v) = parse_var::<f64>("SENTRA_MIN_EXPECTED_PROFIT")? {
            config.validators.min_expected_profit = v;
        }
        if let Some(v) = parse_var::<f64>("SENTRA_MIN_RISK_REWARD")? {
            config.validators.min_risk_reward = v;
        }
        if let Some(v) = parse_var::<f64>("SENTRA_MAX_VOLATILITY")? {
            config.validators.max_volatility = v;
        }
        if let Some(list) = read_var("SENTRA_BLOCKED_HOURS") {
            config.validators.blocked_hours = parse_hours(&list)?;
        }

        if let Some(v) = parse_var::<f64>("SENTRA_MAX_RISK_PER_TRADE")? {
            config.sizer.max_risk_per_trade = v;
        }

        if let Some(v) = parse_var::<f64>("SENTRA_CONFIDENCE_BASE")? {
            config.threshold.base = v;
            config.threshold.current = v;
        }
        if let Some(v) = parse_var::<f64>("SENTRA_CONFIDENCE_MIN")? {
            config.threshold.min = v;
        }
        if let Some(v) = parse_var::<f64>("SENTRA_CONFIDENCE_MAX")? {
            config.threshold.max = v;
        }
        if let Some(v) = parse_var::<f64>("SENTRA_CONFIDENCE_STEP")? {
            config.threshold.adjustment_step = v;
        }

        if let Some(v) = parse_var::<u64>("SENTRA_CONFIRMATION_TIMEOUT_SECS")? {
            config.execution.confirmation_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>("SENTRA_MONITOR_INTERVAL_SECS")? {
            config.execution.monitor_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<f64>("SENTRA_SYNTHETIC_FAILURE_LOSS")? {
            config.execution.synthetic_failure_loss = v;
        }
        if let Some(v) = parse_var::<u64>("SENTRA_RECONCILIATION_INTERVAL_SECS")? {
            config.reconciliation_interval = Duration::from_secs(v);
        }

        if let Some(path) = read_var("SENTRA_SNAPSHOT_PATH") {
            config.snapshot_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.instruments.is_empty() {
            return Err(EngineError::Configuration(
                "at least one instrument is required".to_string(),
            ));
        }
        if self.risk_limits.max_daily_loss >= 0.0 {
            return Err(EngineError::Configuration(format!(
                "max daily loss must be negative, got {}",
                self.risk_limits.max_daily_loss
            )));
        }
        if !(0.0..=1.0).contains(&self.preflight.min_data_quality) {
            return Err(EngineError::Configuration(format!(
                "min data quality {} outside [0, 1]",
                self.preflight.min_data_quality
            )));
        }
        if !(0.0..=1.0).contains(&self.preflight.max_drawdown) {
            return Err(EngineError::Configuration(format!(
                "max drawdown {} outside [0, 1]",
                self.preflight.max_drawdown
            )));
        }
        if self.execution.synthetic_failure_loss > 0.0 {
            return Err(EngineError::Configuration(
                "synthetic failure loss must not be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reversal_damping) {
            return Err(EngineError::Configuration(format!(
                "reversal damping {} outside [0, 1]",
                self.reversal_damping
            )));
        }
        if let Some(hour) = self.validators.blocked_hours.iter().find(|h| **h > 23) {
            return Err(EngineError::Configuration(format!(
                "blocked hour {hour} outside 0..=23"
            )));
        }
        self.threshold
            .validate()
            .map_err(EngineError::Configuration)?;
        Ok(())
    }

    pub fn reconciliation(&self) -> ReconciliationConfig {
        ReconciliationConfig {
            instruments: self.instruments.clone(),
            interval: self.reconciliation_interval,
            query_timeout: self.reconciliation_query_timeout,
        }
    }
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, EngineError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            warn!(var = name, value = %raw, "unparseable configuration value");
            EngineError::Configuration(format!("invalid value for {name}: {raw}"))
        }),
        Err(_) => Ok(None),
    }
}

/// Comma-separated UTC hours, e.g. "3,4,5".
fn parse_hours(list: &str) -> Result<Vec<u32>, EngineError> {
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| EngineError::Configuration(format!("invalid blocked hour: {s}")))
        })
        .collect()
}
