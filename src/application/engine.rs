//! Decision Engine
//!
//! Coordinates one full decision cycle per market observation:
//!
//! preflight -> aggregate forecasts -> build candidate -> validate ->
//! size -> dispatch
//!
//! Every stage can end the cycle early; "no trade" is the normal
//! outcome, not an error. The engine owns the risk ledger and the
//! confidence gate and shares them with the execution actor; actors are
//! reached over their message channels only.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::application::actors::execution_actor::{
    DispatchOutcome, ExecutionActor, ExecutionMessage,
};
use crate::application::actors::reconciliation_actor::{
    get_position, ReconciliationActor, ReconciliationMessage,
};
use crate::application::events::{EngineEvent, EventBus};
use crate::config::EngineConfig;
use crate::domain::connector::VenueConnector;
use crate::domain::entities::observation::Observation;
use crate::domain::entities::position::AccountSnapshot;
use crate::domain::entities::trade::{CompletedTrade, OrderCommand, TradeStatus};
use crate::domain::errors::EngineError;
use crate::domain::services::confidence::ConfidenceGate;
use crate::domain::services::optimizer::{CandidateBuilder, OpportunityOptimizer};
use crate::domain::services::prediction::{PredictionAggregator, PredictionProvider};
use crate::domain::services::preflight::{PreflightGate, PreflightInputs};
use crate::domain::services::risk_ledger::RiskLedger;
use crate::domain::services::sizer::PositionSizer;
use crate::domain::services::stops::ExitPolicy;
use crate::domain::services::validators::{ValidationContext, ValidatorRegistry};
use crate::persistence::snapshot::{self, EngineSnapshot};

/// How a decision cycle ended. Every variant short of `Dispatched` is a
/// normal no-trade outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Preflight gate rejected the observation.
    PreflightRejected { reasons: Vec<String> },
    /// Merged forecast was flat or empty.
    NoSignal,
    /// Optimizer produced no viable candidate.
    NoCandidate,
    /// One or more validators rejected the candidate.
    ValidationRejected { reasons: Vec<String> },
    /// The execution actor refused the dispatch.
    DispatchRejected { reason: String },
    /// A sized order is now pending with the venue.
    Dispatched { trade_id: u64, size: u64 },
}

/// End-of-session totals derived from the archived trade history.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub failures: usize,
    pub net_pnl: f64,
    pub final_threshold: f64,
}

impl SessionReport {
    pub fn win_rate(&self) -> f64 {
        let decided = self.wins + self.losses;
        if decided == 0 {
            0.0
        } else {
            self.wins as f64 / decided as f64
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    connector: Arc<dyn VenueConnector>,
    aggregator: PredictionAggregator,
    optimizer: Arc<dyn OpportunityOptimizer>,
    builder: CandidateBuilder,
    preflight: PreflightGate,
    registry: ValidatorRegistry,
    sizer: PositionSizer,
    ledger: Arc<Mutex<RiskLedger>>,
    gate: Arc<Mutex<ConfidenceGate>>,
    market: Arc<RwLock<HashMap<String, Observation>>>,
    reconciler: mpsc::Sender<ReconciliationMessage>,
    execution: mpsc::Sender<ExecutionMessage>,
    bus: EventBus,
    /// History restored from a snapshot, prepended to this session's.
    restored_history: Vec<CompletedTrade>,
}

impl Engine {
    /// Validate the configuration, restore persisted state and spawn
    /// the actors. At least one prediction provider is required.
    pub async fn start(
        config: EngineConfig,
        connector: Arc<dyn VenueConnector>,
        providers: Vec<Arc<dyn PredictionProvider>>,
        optimizer: Arc<dyn OpportunityOptimizer>,
        exit_policies: Vec<Arc<dyn ExitPolicy>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        if providers.is_empty() {
            return Err(EngineError::Configuration(
                "at least one prediction provider is required".to_string(),
            ));
        }

        let restored = match &config.snapshot_path {
            Some(path) => snapshot::load(path).await,
            None => None,
        };

        let baseline_equity = match connector.query_account().await {
            Ok(account) => account.equity,
            Err(e) => {
                warn!(error = %e, "account unavailable at startup, baseline equity unknown");
                0.0
            }
        };

        let (ledger, gate, restored_history) = match restored {
            Some(snap) => (
                RiskLedger::restore(config.risk_limits.clone(), snap.risk),
                ConfidenceGate::new(snap.threshold),
                snap.history,
            ),
            None => (
                RiskLedger::new(config.risk_limits.clone(), baseline_equity),
                ConfidenceGate::new(config.threshold.clone()),
                Vec::new(),
            ),
        };
        let ledger = Arc::new(Mutex::new(ledger));
        let gate = Arc::new(Mutex::new(gate));
        let market: Arc<RwLock<HashMap<String, Observation>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let bus = EventBus::default();

        let reconciler = ReconciliationActor::spawn(
            Arc::clone(&connector),
            config.reconciliation(),
            bus.clone(),
        );
        let execution = ExecutionActor::spawn(
            Arc::clone(&connector),
            config.execution.clone(),
            reconciler.clone(),
            Arc::clone(&ledger),
            Arc::clone(&gate),
            Arc::clone(&market),
            exit_policies,
            bus.clone(),
        );

        info!(
            instruments = ?config.instruments,
            providers = providers.len(),
            "engine started"
        );

        Ok(Self {
            aggregator: PredictionAggregator::new(
                providers,
                config.provider_timeout,
                config.reversal_damping,
            ),
            builder: CandidateBuilder::new(config.optimizer_timeout),
            preflight: PreflightGate::new(config.preflight.clone()),
            registry: ValidatorRegistry::standard(&config.validators),
            sizer: PositionSizer::new(config.sizer.clone()),
            config,
            connector,
            optimizer,
            ledger,
            gate,
            market,
            reconciler,
            execution,
            bus,
            restored_history,
        })
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    /// Run one decision cycle for a fresh market observation.
    pub async fn on_observation(
        &self,
        observation: Observation,
    ) -> Result<CycleOutcome, EngineError> {
        debug!(
            instrument = %observation.instrument,
            price = observation.price,
            "decision cycle started"
        );

        self.market
            .write()
            .await
            .insert(observation.instrument.clone(), observation.clone());

        let account = match self.connector.query_account().await {
            Ok(account) => Some(account),
            Err(e) => {
                warn!(error = %e, "account query failed");
                None
            }
        };
        let connector_healthy = account.is_some() && self.connector.is_healthy().await;

        let (drawdown, trading_allowed, breach_reasons) = {
            let mut ledger = self.ledger.lock().await;
            if let Some(account) = &account {
                ledger.record_equity(account.equity);
            }
            let drawdown = account
                .as_ref()
                .map(|a| ledger.drawdown(a.equity))
                .unwrap_or(0.0);
            (
                drawdown,
                ledger.is_trading_allowed(),
                ledger.breach_reasons(),
            )
        };
        if !trading_allowed {
            self.bus.emit(EngineEvent::CircuitBreakerTripped {
                reasons: breach_reasons.clone(),
            });
        }

        let trade_in_flight = self.trade_in_flight(&observation.instrument).await?;

        let report = self.preflight.evaluate(
            &observation,
            &PreflightInputs {
                connector_healthy,
                drawdown,
                trading_allowed,
                risk_breach_reasons: breach_reasons,
                trade_in_flight,
            },
        );
        if !report.passed {
            self.bus.emit(EngineEvent::TradeRejected {
                instrument: observation.instrument.clone(),
                reasons: report.reasons.clone(),
            });
            return Ok(CycleOutcome::PreflightRejected {
                reasons: report.reasons,
            });
        }
        // Preflight passed, so the account query succeeded.
        let account: AccountSnapshot = account.ok_or(EngineError::NoResponse)?;

        let position = get_position(&self.reconciler, &observation.instrument)
            .await
            .ok_or(EngineError::NoResponse)?
            .position;

        let forecast = self.aggregator.aggregate(&observation, &position).await;
        if !forecast.direction.is_open() {
            debug!(instrument = %observation.instrument, "no directional signal");
            return Ok(CycleOutcome::NoSignal);
        }

        let Some(candidate) = self
            .builder
            .build(
                self.optimizer.as_ref(),
                &observation,
                &forecast,
                &position,
                &account,
            )
            .await
        else {
            return Ok(CycleOutcome::NoCandidate);
        };

        let verdict = {
            let ledger = self.ledger.lock().await;
            let threshold = self.gate.lock().await.current();
            self.registry.run(&ValidationContext {
                observation: &observation,
                candidate: &candidate,
                position: &position,
                risk: ledger.state(),
                confidence_threshold: threshold,
            })
        };
        for warning in verdict.warnings() {
            warn!(instrument = %observation.instrument, warning, "validator warning");
        }
        if !verdict.valid {
            let reasons = verdict.failure_reasons();
            self.bus.emit(EngineEvent::TradeRejected {
                instrument: observation.instrument.clone(),
                reasons: reasons.clone(),
            });
            return Ok(CycleOutcome::ValidationRejected { reasons });
        }

        let size = self.sizer.size(&candidate, &account, &observation);
        let command = OrderCommand::from_candidate(&candidate, size);
        info!(
            trade_id = command.trade_id,
            instrument = %command.instrument,
            direction = %command.direction,
            size,
            score = verdict.score,
            status = %TradeStatus::Building,
            "candidate admitted, dispatching"
        );

        match self.dispatch(command).await? {
            DispatchOutcome::Accepted { trade_id } => Ok(CycleOutcome::Dispatched { trade_id, size }),
            DispatchOutcome::Rejected { reason } => {
                self.bus.emit(EngineEvent::TradeRejected {
                    instrument: observation.instrument.clone(),
                    reasons: vec![reason.clone()],
                });
                Ok(CycleOutcome::DispatchRejected { reason })
            }
        }
    }

    async fn trade_in_flight(&self, instrument: &str) -> Result<bool, EngineError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.execution
            .send(ExecutionMessage::InFlight {
                instrument: instrument.to_string(),
                reply: reply_tx,
            })
            .await?;
        reply_rx.recv().await.ok_or(EngineError::NoResponse)
    }

    async fn dispatch(&self, command: OrderCommand) -> Result<DispatchOutcome, EngineError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.execution
            .send(ExecutionMessage::Dispatch {
                command,
                reply: reply_tx,
            })
            .await?;
        reply_rx.recv().await.ok_or(EngineError::NoResponse)
    }

    /// Full trade history: restored snapshot entries plus this session.
    pub async fn history(&self) -> Result<Vec<CompletedTrade>, EngineError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.execution
            .send(ExecutionMessage::History { reply: reply_tx })
            .await?;
        let session = reply_rx.recv().await.ok_or(EngineError::NoResponse)?;

        let mut history = self.restored_history.clone();
        history.extend(session);
        Ok(history)
    }

    /// Persist risk counters, threshold and history for crash recovery.
    pub async fn save_snapshot(&self) -> Result<(), EngineError> {
        let Some(path) = &self.config.snapshot_path else {
            return Ok(());
        };

        let history = self.history().await?;
        let snap = EngineSnapshot {
            risk: self.ledger.lock().await.state().clone(),
            threshold: self.gate.lock().await.threshold().clone(),
            history,
            saved_at: chrono::Utc::now(),
        };
        snapshot::save(path, &snap).await
    }

    /// Session-boundary reset: zero the risk counters against current
    /// equity. The only way to re-arm a tripped circuit breaker.
    pub async fn daily_reset(&self) {
        let equity = match self.connector.query_account().await {
            Ok(account) => account.equity,
            Err(e) => {
                warn!(error = %e, "account unavailable for daily reset, keeping peak as baseline");
                self.ledger.lock().await.state().session_peak_equity
            }
        };
        self.ledger.lock().await.daily_reset(equity);
    }

    /// Stop the actors, persist a final snapshot and summarize the
    /// session. The execution actor stops first and hands back its
    /// final history, so trades it abandons at shutdown make it into
    /// the snapshot.
    pub async fn shutdown(self) -> Result<SessionReport, EngineError> {
        info!("engine shutting down");

        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.execution
            .send(ExecutionMessage::Shutdown {
                reply: Some(reply_tx),
            })
            .await
            .ok();
        let session = reply_rx.recv().await.unwrap_or_default();
        self.reconciler
            .send(ReconciliationMessage::Shutdown)
            .await
            .ok();

        let mut history = self.restored_history.clone();
        history.extend(session);

        if let Some(path) = &self.config.snapshot_path {
            let snap = EngineSnapshot {
                risk: self.ledger.lock().await.state().clone(),
                threshold: self.gate.lock().await.threshold().clone(),
                history: history.clone(),
                saved_at: chrono::Utc::now(),
            };
            if let Err(e) = snapshot::save(path, &snap).await {
                warn!(error = %e, "final snapshot failed");
            }
        }

        let wins = history
            .iter()
            .filter(|t| !t.is_failure() && t.realized_pnl() > 0.0)
            .count();
        let losses = history
            .iter()
            .filter(|t| !t.is_failure() && t.realized_pnl() <= 0.0)
            .count();
        let failures = history.iter().filter(|t| t.is_failure()).count();
        let report = SessionReport {
            trades: history.len(),
            wins,
            losses,
            failures,
            net_pnl: history.iter().map(|t| t.realized_pnl()).sum(),
            final_threshold: self.gate.lock().await.current(),
        };

        info!(
            trades = report.trades,
            wins = report.wins,
            losses = report.losses,
            failures = report.failures,
            net_pnl = report.net_pnl,
            "session report"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connector::Confirmation;
    use crate::domain::entities::position::{Direction, Position};
    use crate::domain::errors::{ConnectorError, ConnectorResult, ProviderError};
    use crate::domain::services::optimizer::Opportunity;
    use crate::domain::services::prediction::Forecast;
    use async_trait::async_trait;

    struct StubConnector {
        healthy: bool,
    }

    #[async_trait]
    impl VenueConnector for StubConnector {
        fn name(&self) -> &str {
            "stub"
        }

        async fn query_position(&self, instrument: &str) -> ConnectorResult<Position> {
            Ok(Position::flat(instrument))
        }

        async fn query_account(&self) -> ConnectorResult<AccountSnapshot> {
            if self.healthy {
                Ok(AccountSnapshot::new(10000.0))
            } else {
                Err(ConnectorError::Unavailable("venue down".to_string()))
            }
        }

        async fn submit(&self, _command: &OrderCommand) -> ConnectorResult<bool> {
            Ok(true)
        }

        async fn confirmation(&self, trade_id: u64) -> ConnectorResult<Confirmation> {
            Ok(Confirmation {
                trade_id,
                fill_price: 100.0,
            })
        }

        async fn is_healthy(&self) -> bool {
            self.healthy
        }
    }

    struct BullProvider {
        confidence: f64,
    }

    #[async_trait]
    impl crate::domain::services::prediction::PredictionProvider for BullProvider {
        fn name(&self) -> &str {
            "bull"
        }

        async fn predict(
            &self,
            _observation: &Observation,
            _position: &Position,
        ) -> Result<Forecast, ProviderError> {
            Ok(Forecast {
                direction: Direction::Long,
                confidence: self.confidence,
                expected_profit: 100.0,
                strength: 1.0,
            })
        }
    }

    struct FixedOptimizer;

    #[async_trait]
    impl OpportunityOptimizer for FixedOptimizer {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn optimize(
            &self,
            observation: &Observation,
            _forecast: &Forecast,
            _position: &Position,
            _account: &AccountSnapshot,
        ) -> Result<Option<Opportunity>, ProviderError> {
            Ok(Some(Opportunity {
                entry: observation.price,
                stop: observation.price - 5.0,
                targets: vec![observation.price + 10.0],
                expected_profit: 100.0,
                win_probability: 0.6,
                raw_size: 3.0,
            }))
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            snapshot_path: None,
            ..EngineConfig::default()
        }
    }

    fn observation() -> Observation {
        Observation::new("BTC-USD", 100.0, 10.0).with_indicators(0.5, 55.0)
    }

    async fn engine(connector: StubConnector, provider_confidence: f64) -> Engine {
        Engine::start(
            config(),
            Arc::new(connector),
            vec![Arc::new(BullProvider {
                confidence: provider_confidence,
            })],
            Arc::new(FixedOptimizer),
            vec![],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_requires_providers() {
        let result = Engine::start(
            config(),
            Arc::new(StubConnector { healthy: true }),
            vec![],
            Arc::new(FixedOptimizer),
            vec![],
        )
        .await;
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_clean_observation_dispatches_trade() {
        let engine = engine(StubConnector { healthy: true }, 0.9).await;
        let outcome = engine.on_observation(observation()).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Dispatched { .. }));
    }

    #[tokio::test]
    async fn test_unhealthy_connector_rejected_at_preflight() {
        let engine = engine(StubConnector { healthy: false }, 0.9).await;
        let outcome = engine.on_observation(observation()).await.unwrap();
        match outcome {
            CycleOutcome::PreflightRejected { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("unhealthy")));
            }
            other => panic!("expected preflight rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_low_confidence_rejected_by_validators() {
        let engine = engine(StubConnector { healthy: true }, 0.4).await;
        let mut events = engine.subscribe();

        let outcome = engine.on_observation(observation()).await.unwrap();
        match outcome {
            CycleOutcome::ValidationRejected { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("below threshold")));
            }
            other => panic!("expected validation rejection, got {other:?}"),
        }

        // Rejection was announced.
        match events.recv().await.unwrap() {
            EngineEvent::TradeRejected { instrument, .. } => {
                assert_eq!(instrument, "BTC-USD");
            }
            other => panic!("expected TradeRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_produces_report() {
        let engine = engine(StubConnector { healthy: true }, 0.9).await;
        let report = engine.shutdown().await.unwrap();
        assert_eq!(report.trades, 0);
        assert_eq!(report.win_rate(), 0.0);
    }
}
