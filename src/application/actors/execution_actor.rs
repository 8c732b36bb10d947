//! Execution Actor
//!
//! Supervises every trade from dispatch to its terminal state:
//!
//! `Pending -> Executed -> Monitoring -> { Closed | Failed }`
//!
//! The actor is the single writer of all trade state. Submission and
//! confirmation run in a spawned task per trade so a slow venue never
//! blocks the run loop; monitor tasks poll the reconciled position and
//! report back over an internal event channel. At most one trade per
//! instrument is in flight at any time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::application::actors::reconciliation_actor::{get_position, ReconciliationMessage};
use crate::application::events::{EngineEvent, EventBus};
use crate::domain::connector::VenueConnector;
use crate::domain::entities::observation::Observation;
use crate::domain::entities::trade::{
    CompletedTrade, ExecutedTrade, OrderCommand, PendingTrade, TradeOutcome, TradeStatus,
};
use crate::domain::services::confidence::{ConfidenceGate, ThresholdAdjustment};
use crate::domain::services::risk_ledger::RiskLedger;
use crate::domain::services::stops::{ExitPolicy, StopBounds};

const EXECUTION_CHANNEL_CAPACITY: usize = 64;
const TRADE_EVENT_CHANNEL_CAPACITY: usize = 128;
/// Oldest archived trades are dropped past this bound.
const MAX_HISTORY: usize = 1024;
/// Flat reads tolerated before the fill ever appeared in the position
/// feed. The feed can lag the confirmation by a few polls; a flat read
/// in that window means "not visible yet", not "closed".
const FILL_LAG_TOLERANCE: u32 = 3;

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Window for the submit-vs-confirmation race.
    pub confirmation_timeout: Duration,
    /// Cadence of monitor ticks for executed trades.
    pub monitor_interval: Duration,
    /// Loss fed to the ledger when a dispatched trade fails before
    /// execution. Negative.
    pub synthetic_failure_loss: f64,
    pub stop_bounds: StopBounds,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(10),
            monitor_interval: Duration::from_secs(5),
            synthetic_failure_loss: -10.0,
            stop_bounds: StopBounds::default(),
        }
    }
}

/// Reply to a dispatch request.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Accepted { trade_id: u64 },
    Rejected { reason: String },
}

#[derive(Debug)]
pub enum ExecutionMessage {
    /// Submit a sized order and supervise it to a terminal state.
    Dispatch {
        command: OrderCommand,
        reply: mpsc::Sender<DispatchOutcome>,
    },
    /// Whether the instrument already has a pending or executed trade.
    InFlight {
        instrument: String,
        reply: mpsc::Sender<bool>,
    },
    /// Archived terminal trades for this session.
    History {
        reply: mpsc::Sender<Vec<CompletedTrade>>,
    },
    /// Lifecycle state of a supervised trade, `None` for an unknown id.
    Status {
        trade_id: u64,
        reply: mpsc::Sender<Option<TradeStatus>>,
    },
    /// Stop: abandons pending trades, stops monitors, and replies with
    /// the final archived history when a sender is given.
    Shutdown {
        reply: Option<mpsc::Sender<Vec<CompletedTrade>>>,
    },
}

/// Internal lifecycle notifications from spawned trade tasks.
#[derive(Debug)]
enum TradeEvent {
    Confirmed { trade_id: u64, fill_price: f64 },
    ConfirmTimeout { trade_id: u64 },
    DispatchRejected { trade_id: u64, cause: String },
    ClosedFlat { trade_id: u64, realized_pnl: f64 },
}

pub struct ExecutionActor {
    connector: Arc<dyn VenueConnector>,
    config: ExecutionConfig,
    reconciler: mpsc::Sender<ReconciliationMessage>,
    ledger: Arc<Mutex<RiskLedger>>,
    gate: Arc<Mutex<ConfidenceGate>>,
    market: Arc<RwLock<HashMap<String, Observation>>>,
    exit_policies: Vec<Arc<dyn ExitPolicy>>,
    bus: EventBus,

    pending: HashMap<u64, PendingTrade>,
    executed: HashMap<u64, ExecutedTrade>,
    monitors: HashMap<u64, JoinHandle<()>>,
    history: Vec<CompletedTrade>,
    event_tx: mpsc::Sender<TradeEvent>,
}

impl ExecutionActor {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        connector: Arc<dyn VenueConnector>,
        config: ExecutionConfig,
        reconciler: mpsc::Sender<ReconciliationMessage>,
        ledger: Arc<Mutex<RiskLedger>>,
        gate: Arc<Mutex<ConfidenceGate>>,
        market: Arc<RwLock<HashMap<String, Observation>>>,
        exit_policies: Vec<Arc<dyn ExitPolicy>>,
        bus: EventBus,
    ) -> mpsc::Sender<ExecutionMessage> {
        let (tx, rx) = mpsc::channel(EXECUTION_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(TRADE_EVENT_CHANNEL_CAPACITY);

        let actor = Self {
            connector,
            config,
            reconciler,
            ledger,
            gate,
            market,
            exit_policies,
            bus,
            pending: HashMap::new(),
            executed: HashMap::new(),
            monitors: HashMap::new(),
            history: Vec::new(),
            event_tx,
        };

        tokio::spawn(async move {
            actor.run(rx, event_rx).await;
        });

        info!("ExecutionActor spawned");
        tx
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<ExecutionMessage>,
        mut event_rx: mpsc::Receiver<TradeEvent>,
    ) {
        info!("ExecutionActor started");

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(ExecutionMessage::Dispatch { command, reply }) => {
                            let outcome = self.dispatch(command);
                            if reply.send(outcome).await.is_err() {
                                error!("Failed to send Dispatch reply");
                            }
                        }
                        Some(ExecutionMessage::InFlight { instrument, reply }) => {
                            if reply.send(self.in_flight(&instrument)).await.is_err() {
                                error!("Failed to send InFlight reply");
                            }
                        }
                        Some(ExecutionMessage::History { reply }) => {
                            if reply.send(self.history.clone()).await.is_err() {
                                error!("Failed to send History reply");
                            }
                        }
                        Some(ExecutionMessage::Status { trade_id, reply }) => {
                            if reply.send(self.status_of(trade_id)).await.is_err() {
                                error!("Failed to send Status reply");
                            }
                        }
                        Some(ExecutionMessage::Shutdown { reply }) => {
                            info!("ExecutionActor stopping");
                            self.drain().await;
                            if let Some(reply) = reply {
                                if reply.send(self.history.clone()).await.is_err() {
                                    error!("Failed to send Shutdown reply");
                                }
                            }
                            break;
                        }
                        None => {
                            info!("ExecutionActor stopping");
                            self.drain().await;
                            break;
                        }
                    }
                }
                Some(event) = event_rx.recv() => {
                    self.on_trade_event(event).await;
                }
            }
        }

        info!("ExecutionActor stopped");
    }

    fn in_flight(&self, instrument: &str) -> bool {
        self.pending
            .values()
            .any(|p| p.command.instrument == instrument)
            || self
                .executed
                .values()
                .any(|e| e.command.instrument == instrument)
    }

    /// Current lifecycle state of a trade by id.
    fn status_of(&self, trade_id: u64) -> Option<TradeStatus> {
        if self.pending.contains_key(&trade_id) {
            return Some(TradeStatus::Pending);
        }
        if self.executed.contains_key(&trade_id) {
            return Some(TradeStatus::Monitoring);
        }
        self.history
            .iter()
            .find(|t| t.trade_id == trade_id)
            .map(|t| {
                if t.is_failure() {
                    TradeStatus::Failed
                } else {
                    TradeStatus::Closed
                }
            })
    }

    /// Admit the command as Pending and spawn its submission task. The
    /// one-in-flight-per-instrument rule is enforced here, inside the
    /// single writer, so concurrent dispatches cannot race past it.
    fn dispatch(&mut self, command: OrderCommand) -> DispatchOutcome {
        if self.in_flight(&command.instrument) {
            warn!(
                instrument = %command.instrument,
                "dispatch rejected, trade already in flight"
            );
            return DispatchOutcome::Rejected {
                reason: format!("Trade already in flight for {}", command.instrument),
            };
        }

        let trade_id = command.trade_id;
        info!(
            trade_id,
            instrument = %command.instrument,
            direction = %command.direction,
            size = command.size,
            entry = command.entry,
            status = %TradeStatus::Pending,
            "dispatching trade"
        );

        self.pending.insert(
            trade_id,
            PendingTrade {
                command: command.clone(),
                submitted_at: Utc::now(),
            },
        );

        let connector = Arc::clone(&self.connector);
        let event_tx = self.event_tx.clone();
        let confirmation_timeout = self.config.confirmation_timeout;
        tokio::spawn(async move {
            submit_and_confirm(connector, command, confirmation_timeout, event_tx).await;
        });

        DispatchOutcome::Accepted { trade_id }
    }

    async fn on_trade_event(&mut self, event: TradeEvent) {
        match event {
            TradeEvent::Confirmed {
                trade_id,
                fill_price,
            } => self.on_confirmed(trade_id, fill_price).await,
            TradeEvent::ConfirmTimeout { trade_id } => {
                self.on_failed(trade_id, "confirmation timeout".to_string())
                    .await
            }
            TradeEvent::DispatchRejected { trade_id, cause } => {
                self.on_failed(trade_id, cause).await
            }
            TradeEvent::ClosedFlat {
                trade_id,
                realized_pnl,
            } => self.on_closed(trade_id, realized_pnl).await,
        }
    }

    /// Pending -> Executed: record the opening in the ledger, announce
    /// the fill and start the monitor.
    async fn on_confirmed(&mut self, trade_id: u64, fill_price: f64) {
        let Some(pending) = self.pending.remove(&trade_id) else {
            warn!(trade_id, "confirmation for unknown trade, ignoring");
            return;
        };

        let command = pending.command;
        info!(
            trade_id,
            instrument = %command.instrument,
            fill_price,
            status = %TradeStatus::Executed,
            "trade executed"
        );

        self.ledger.lock().await.record_trade_opened(&command);
        self.bus.emit(EngineEvent::TradeExecuted {
            trade_id,
            instrument: command.instrument.clone(),
            direction: command.direction,
            size: command.size,
            fill_price,
        });

        let executed = ExecutedTrade {
            command: command.clone(),
            fill_price,
            executed_at: Utc::now(),
        };
        self.executed.insert(trade_id, executed);

        let handle = tokio::spawn(monitor_trade(
            command,
            self.config.monitor_interval,
            self.config.stop_bounds.clone(),
            self.reconciler.clone(),
            Arc::clone(&self.market),
            self.exit_policies.clone(),
            self.event_tx.clone(),
            self.bus.clone(),
        ));
        self.monitors.insert(trade_id, handle);
    }

    /// Pending -> Failed: archive with the cause and feed the synthetic
    /// loss to the ledger and the confidence gate. A failed execution is
    /// treated as a loss so repeated venue trouble trips the breaker.
    async fn on_failed(&mut self, trade_id: u64, cause: String) {
        let Some(pending) = self.pending.remove(&trade_id) else {
            warn!(trade_id, cause, "failure for unknown trade, ignoring");
            return;
        };

        let command = pending.command;
        warn!(
            trade_id,
            instrument = %command.instrument,
            cause = %cause,
            status = %TradeStatus::Failed,
            "trade failed before execution"
        );

        self.ledger
            .lock()
            .await
            .record_trade_closed(self.config.synthetic_failure_loss, 0.0);
        self.adjust_threshold(self.config.synthetic_failure_loss, command.confidence)
            .await;

        self.archive(CompletedTrade {
            trade_id,
            instrument: command.instrument,
            direction: command.direction,
            size: command.size,
            fill_price: None,
            confidence: command.confidence,
            outcome: TradeOutcome::Failed { cause },
            closed_at: Utc::now(),
        });
    }

    /// Monitoring -> Closed: archive the realized pnl, release the
    /// exposure and let the confidence gate adapt.
    async fn on_closed(&mut self, trade_id: u64, realized_pnl: f64) {
        let Some(executed) = self.executed.remove(&trade_id) else {
            warn!(trade_id, "close for unknown trade, ignoring");
            return;
        };
        if let Some(handle) = self.monitors.remove(&trade_id) {
            handle.abort();
        }

        let command = executed.command;
        info!(
            trade_id,
            instrument = %command.instrument,
            realized_pnl,
            status = %TradeStatus::Closed,
            "trade closed"
        );

        self.ledger
            .lock()
            .await
            .record_trade_closed(realized_pnl, command.notional());
        self.adjust_threshold(realized_pnl, command.confidence).await;

        self.bus.emit(EngineEvent::TradeCompleted {
            trade_id,
            instrument: command.instrument.clone(),
            realized_pnl,
        });

        self.archive(CompletedTrade {
            trade_id,
            instrument: command.instrument,
            direction: command.direction,
            size: command.size,
            fill_price: Some(executed.fill_price),
            confidence: command.confidence,
            outcome: TradeOutcome::Closed { realized_pnl },
            closed_at: Utc::now(),
        });
    }

    fn archive(&mut self, trade: CompletedTrade) {
        self.history.push(trade);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }

    async fn adjust_threshold(&self, pnl: f64, confidence: f64) {
        let mut gate = self.gate.lock().await;
        let previous = gate.current();
        if gate.on_trade_closed(pnl, confidence) != ThresholdAdjustment::Unchanged {
            self.bus.emit(EngineEvent::ThresholdAdjusted {
                previous,
                current: gate.current(),
            });
        }
    }

    /// Shutdown path: abort monitors and archive anything still pending
    /// as failed. No ledger feed; the session is over.
    async fn drain(&mut self) {
        for (_, handle) in self.monitors.drain() {
            handle.abort();
        }

        let pending: Vec<_> = self.pending.drain().collect();
        for (trade_id, trade) in pending {
            warn!(trade_id, instrument = %trade.command.instrument, "pending trade abandoned at shutdown");
            self.archive(CompletedTrade {
                trade_id,
                instrument: trade.command.instrument,
                direction: trade.command.direction,
                size: trade.command.size,
                fill_price: None,
                confidence: trade.command.confidence,
                outcome: TradeOutcome::Failed {
                    cause: "shutdown".to_string(),
                },
                closed_at: Utc::now(),
            });
        }
    }
}

/// Submit the order and race the confirmation against the timeout.
async fn submit_and_confirm(
    connector: Arc<dyn VenueConnector>,
    command: OrderCommand,
    confirmation_timeout: Duration,
    event_tx: mpsc::Sender<TradeEvent>,
) {
    let trade_id = command.trade_id;

    let accepted = match connector.submit(&command).await {
        Ok(accepted) => accepted,
        Err(e) => {
            let _ = event_tx
                .send(TradeEvent::DispatchRejected {
                    trade_id,
                    cause: e.to_string(),
                })
                .await;
            return;
        }
    };
    if !accepted {
        let _ = event_tx
            .send(TradeEvent::DispatchRejected {
                trade_id,
                cause: "order rejected by venue".to_string(),
            })
            .await;
        return;
    }

    let event = match timeout(confirmation_timeout, connector.confirmation(trade_id)).await {
        Ok(Ok(confirmation)) => TradeEvent::Confirmed {
            trade_id,
            fill_price: confirmation.fill_price,
        },
        Ok(Err(e)) => TradeEvent::DispatchRejected {
            trade_id,
            cause: format!("confirmation failed: {e}"),
        },
        Err(_) => TradeEvent::ConfirmTimeout { trade_id },
    };
    let _ = event_tx.send(event).await;
}

/// Poll the reconciled position until it goes flat, running exit
/// policies each tick. The realized pnl reported on closure is the last
/// venue-reported unrealized pnl seen while the position was open.
async fn monitor_trade(
    command: OrderCommand,
    monitor_interval: Duration,
    bounds: StopBounds,
    reconciler: mpsc::Sender<ReconciliationMessage>,
    market: Arc<RwLock<HashMap<String, Observation>>>,
    exit_policies: Vec<Arc<dyn ExitPolicy>>,
    event_tx: mpsc::Sender<TradeEvent>,
    bus: EventBus,
) {
    let trade_id = command.trade_id;
    let mut ticker = interval(monitor_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it so the position
    // feed has at least one interval to reflect the fill.
    ticker.tick().await;

    let mut stop = command.stop;
    let mut target = command.target;
    let mut last_unrealized = 0.0;
    let mut seen_open = false;
    let mut flat_reads_before_fill = 0u32;

    loop {
        ticker.tick().await;

        let Some(reconciled) = get_position(&reconciler, &command.instrument).await else {
            // Reconciler gone; the actor is shutting down.
            return;
        };
        if reconciled.stale {
            debug!(trade_id, "stale position, skipping monitor tick");
            continue;
        }

        if reconciled.position.is_flat() {
            if !seen_open {
                flat_reads_before_fill += 1;
                if flat_reads_before_fill < FILL_LAG_TOLERANCE {
                    debug!(trade_id, "fill not visible in position feed yet");
                    continue;
                }
                // Either the position opened and closed between polls
                // or the feed never reflected the fill; close out with
                // what was observed.
            }
            let _ = event_tx
                .send(TradeEvent::ClosedFlat {
                    trade_id,
                    realized_pnl: last_unrealized,
                })
                .await;
            return;
        }
        seen_open = true;
        last_unrealized = reconciled.position.unrealized_pnl;

        let observation = market.read().await.get(&command.instrument).cloned();
        let Some(observation) = observation else {
            continue;
        };

        for policy in &exit_policies {
            let Some(proposal) = policy.review(&reconciled.position, &observation).await else {
                continue;
            };
            if let Some(proposed_stop) = proposal.stop {
                let adjusted =
                    bounds.apply_stop(stop, proposed_stop, command.direction, proposal.confidence);
                if adjusted != stop {
                    debug!(
                        trade_id,
                        policy = policy.name(),
                        old_stop = stop,
                        new_stop = adjusted,
                        "stop tightened"
                    );
                    stop = adjusted;
                    bus.emit(EngineEvent::StopAdjusted {
                        trade_id,
                        instrument: command.instrument.clone(),
                        stop,
                    });
                }
            }
            if let Some(proposed_target) = proposal.target {
                if proposal.confidence >= bounds.min_confidence
                    && proposed_target.is_finite()
                    && proposed_target != target
                {
                    debug!(
                        trade_id,
                        policy = policy.name(),
                        old_target = target,
                        new_target = proposed_target,
                        "target revised"
                    );
                    target = proposed_target;
                }
            }
        }
    }
}
