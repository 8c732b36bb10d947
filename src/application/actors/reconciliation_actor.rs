//! Reconciliation Actor
//!
//! Owns the provisional position cache and arbitrates it against the
//! authoritative venue state. Reconciles on its own periodic cadence,
//! independent of the trade pipeline, and opportunistically whenever a
//! pipeline step asks for the current position. On a failed venue read
//! the last-known cache is served with a staleness flag instead of
//! blocking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::application::events::{EngineEvent, EventBus};
use crate::domain::connector::VenueConnector;
use crate::domain::entities::position::Position;

const RECONCILIATION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub instruments: Vec<String>,
    pub interval: Duration,
    pub query_timeout: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            interval: Duration::from_secs(30),
            query_timeout: Duration::from_secs(5),
        }
    }
}

/// Position as served to the pipeline, with its staleness flag.
#[derive(Debug, Clone)]
pub struct ReconciledPosition {
    pub position: Position,
    pub stale: bool,
}

/// Outcome of one reconcile pass over one instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Cache and venue agree; nothing was mutated.
    Consistent,
    /// Cache overwritten with the venue report.
    Corrected { cached_size: f64, venue_size: f64 },
    /// Venue read failed; cache untouched and flagged stale.
    Stale,
}

#[derive(Debug)]
pub enum ReconciliationMessage {
    /// Reconciled position for sizing/validation; performs an
    /// opportunistic authoritative read first.
    GetPosition {
        instrument: String,
        reply: mpsc::Sender<ReconciledPosition>,
    },
    /// Force one reconcile pass for an instrument.
    Reconcile {
        instrument: String,
        reply: mpsc::Sender<ReconcileOutcome>,
    },
    Shutdown,
}

pub struct ReconciliationActor {
    connector: Arc<dyn VenueConnector>,
    config: ReconciliationConfig,
    bus: EventBus,
    cache: HashMap<String, Position>,
    /// Instruments whose last authoritative read failed. A venue outage
    /// on one instrument must not mark the others stale.
    stale: HashSet<String>,
}

impl ReconciliationActor {
    pub fn spawn(
        connector: Arc<dyn VenueConnector>,
        config: ReconciliationConfig,
        bus: EventBus,
    ) -> mpsc::Sender<ReconciliationMessage> {
        let (tx, rx) = mpsc::channel(RECONCILIATION_CHANNEL_CAPACITY);

        let actor = Self {
            connector,
            config,
            bus,
            cache: HashMap::new(),
            stale: HashSet::new(),
        };

        tokio::spawn(async move {
            actor.run(rx).await;
        });

        info!("ReconciliationActor spawned");
        tx
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ReconciliationMessage>) {
        info!("ReconciliationActor started");

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so startup does
        // not race the engine's first observation.
        ticker.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(ReconciliationMessage::GetPosition { instrument, reply }) => {
                            let _ = self.reconcile(&instrument).await;
                            let reconciled = ReconciledPosition {
                                position: self
                                    .cache
                                    .get(&instrument)
                                    .cloned()
                                    .unwrap_or_else(|| Position::flat(&instrument)),
                                stale: self.stale.contains(&instrument),
                            };
                            if reply.send(reconciled).await.is_err() {
                                error!("Failed to send GetPosition reply");
                            }
                        }
                        Some(ReconciliationMessage::Reconcile { instrument, reply }) => {
                            let outcome = self.reconcile(&instrument).await;
                            if reply.send(outcome).await.is_err() {
                                error!("Failed to send Reconcile reply");
                            }
                        }
                        Some(ReconciliationMessage::Shutdown) | None => {
                            info!("ReconciliationActor stopping");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    for instrument in self.config.instruments.clone() {
                        let outcome = self.reconcile(&instrument).await;
                        debug!(instrument = %instrument, ?outcome, "periodic reconcile");
                    }
                }
            }
        }

        info!("ReconciliationActor stopped");
    }

    /// Fetch the authoritative position and arbitrate it against the
    /// cache. The venue is always right: any mismatch overwrites the
    /// cache and emits a mismatch event.
    async fn reconcile(&mut self, instrument: &str) -> ReconcileOutcome {
        let authoritative = match timeout(
            self.config.query_timeout,
            self.connector.query_position(instrument),
        )
        .await
        {
            Ok(Ok(position)) => position,
            Ok(Err(e)) => {
                warn!(instrument, error = %e, "authoritative position read failed, serving stale cache");
                self.stale.insert(instrument.to_string());
                return ReconcileOutcome::Stale;
            }
            Err(_) => {
                warn!(instrument, "authoritative position read timed out, serving stale cache");
                self.stale.insert(instrument.to_string());
                return ReconcileOutcome::Stale;
            }
        };

        self.stale.remove(instrument);

        match self.cache.get(instrument) {
            Some(cached) if !cached.differs_from(&authoritative) => ReconcileOutcome::Consistent,
            cached => {
                let cached_size = cached.map(|p| p.size).unwrap_or(0.0);
                let venue_size = authoritative.size;
                // A first fill is not a mismatch, just cache population.
                let had_entry = cached.is_some();
                self.cache
                    .insert(instrument.to_string(), authoritative.clone());

                if had_entry {
                    warn!(
                        instrument,
                        cached_size, venue_size, "position mismatch, cache overwritten"
                    );
                    self.bus.emit(EngineEvent::ReconciliationMismatch {
                        instrument: instrument.to_string(),
                        cached_size,
                        venue_size,
                    });
                    ReconcileOutcome::Corrected {
                        cached_size,
                        venue_size,
                    }
                } else {
                    ReconcileOutcome::Consistent
                }
            }
        }
    }
}

/// Convenience wrapper for pipeline callers.
pub async fn get_position(
    tx: &mpsc::Sender<ReconciliationMessage>,
    instrument: &str,
) -> Option<ReconciledPosition> {
    let (reply_tx, mut reply_rx) = mpsc::channel(1);
    tx.send(ReconciliationMessage::GetPosition {
        instrument: instrument.to_string(),
        reply: reply_tx,
    })
    .await
    .ok()?;
    reply_rx.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::position::{AccountSnapshot, Direction};
    use crate::domain::entities::trade::OrderCommand;
    use crate::domain::errors::{ConnectorError, ConnectorResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedConnector {
        positions: Mutex<Vec<ConnectorResult<Position>>>,
    }

    impl ScriptedConnector {
        fn new(positions: Vec<ConnectorResult<Position>>) -> Self {
            Self {
                positions: Mutex::new(positions),
            }
        }
    }

    #[async_trait]
    impl VenueConnector for ScriptedConnector {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn query_position(&self, instrument: &str) -> ConnectorResult<Position> {
            let mut positions = self.positions.lock().unwrap();
            if positions.len() > 1 {
                positions.remove(0)
            } else {
                positions
                    .first()
                    .cloned()
                    .unwrap_or_else(|| Ok(Position::flat(instrument)))
            }
        }

        async fn query_account(&self) -> ConnectorResult<AccountSnapshot> {
            Ok(AccountSnapshot::new(10000.0))
        }

        async fn submit(&self, _command: &OrderCommand) -> ConnectorResult<bool> {
            Ok(true)
        }

        async fn confirmation(
            &self,
            _trade_id: u64,
        ) -> ConnectorResult<crate::domain::connector::Confirmation> {
            Err(ConnectorError::Timeout)
        }
    }

    struct PartiallyDownConnector;

    #[async_trait]
    impl VenueConnector for PartiallyDownConnector {
        fn name(&self) -> &str {
            "partial"
        }

        async fn query_position(&self, instrument: &str) -> ConnectorResult<Position> {
            if instrument == "ETH-USD" {
                Err(ConnectorError::QueryFailed("venue down".to_string()))
            } else {
                Ok(Position::open(instrument, Direction::Long, 1.0, 50000.0))
            }
        }

        async fn query_account(&self) -> ConnectorResult<AccountSnapshot> {
            Ok(AccountSnapshot::new(10000.0))
        }

        async fn submit(&self, _command: &OrderCommand) -> ConnectorResult<bool> {
            Ok(true)
        }

        async fn confirmation(
            &self,
            _trade_id: u64,
        ) -> ConnectorResult<crate::domain::connector::Confirmation> {
            Err(ConnectorError::Timeout)
        }
    }

    fn config() -> ReconciliationConfig {
        ReconciliationConfig {
            instruments: vec![],
            interval: Duration::from_secs(3600),
            query_timeout: Duration::from_millis(200),
        }
    }

    async fn reconcile_once(
        tx: &mpsc::Sender<ReconciliationMessage>,
        instrument: &str,
    ) -> ReconcileOutcome {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        tx.send(ReconciliationMessage::Reconcile {
            instrument: instrument.to_string(),
            reply: reply_tx,
        })
        .await
        .unwrap();
        reply_rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn test_consistent_reconcile_is_idempotent() {
        let connector = Arc::new(ScriptedConnector::new(vec![Ok(Position::open(
            "BTC-USD",
            Direction::Long,
            2.0,
            50000.0,
        ))]));
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let tx = ReconciliationActor::spawn(connector, config(), bus);

        // First pass populates the cache without a mismatch event.
        assert_eq!(
            reconcile_once(&tx, "BTC-USD").await,
            ReconcileOutcome::Consistent
        );
        // Second pass with identical venue state mutates nothing.
        assert_eq!(
            reconcile_once(&tx, "BTC-USD").await,
            ReconcileOutcome::Consistent
        );
        assert!(events.try_recv().is_err());

        tx.send(ReconciliationMessage::Shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatch_overwrites_cache_and_emits() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            Ok(Position::open("BTC-USD", Direction::Long, 2.0, 50000.0)),
            Ok(Position::open("BTC-USD", Direction::Long, 3.0, 50000.0)),
        ]));
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let tx = ReconciliationActor::spawn(connector, config(), bus);

        reconcile_once(&tx, "BTC-USD").await;
        let outcome = reconcile_once(&tx, "BTC-USD").await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Corrected {
                cached_size: 2.0,
                venue_size: 3.0
            }
        );

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            EngineEvent::ReconciliationMismatch {
                instrument: "BTC-USD".to_string(),
                cached_size: 2.0,
                venue_size: 3.0,
            }
        );

        // Cache now matches the venue.
        let reconciled = get_position(&tx, "BTC-USD").await.unwrap();
        assert_eq!(reconciled.position.size, 3.0);

        tx.send(ReconciliationMessage::Shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_read_serves_stale_cache() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            Ok(Position::open("BTC-USD", Direction::Long, 2.0, 50000.0)),
            Err(ConnectorError::QueryFailed("venue down".to_string())),
        ]));
        let bus = EventBus::new(8);
        let tx = ReconciliationActor::spawn(connector, config(), bus);

        reconcile_once(&tx, "BTC-USD").await;
        assert_eq!(reconcile_once(&tx, "BTC-USD").await, ReconcileOutcome::Stale);

        let reconciled = get_position(&tx, "BTC-USD").await.unwrap();
        assert!(reconciled.stale);
        assert_eq!(reconciled.position.size, 2.0); // last-known cache

        tx.send(ReconciliationMessage::Shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn test_staleness_is_tracked_per_instrument() {
        let connector = Arc::new(PartiallyDownConnector);
        let bus = EventBus::new(8);
        let tx = ReconciliationActor::spawn(connector, config(), bus);

        assert_eq!(reconcile_once(&tx, "ETH-USD").await, ReconcileOutcome::Stale);

        // The broken instrument is stale; a healthy one read afterwards
        // is not.
        let healthy = get_position(&tx, "BTC-USD").await.unwrap();
        assert!(!healthy.stale);
        assert_eq!(healthy.position.size, 1.0);

        let broken = get_position(&tx, "ETH-USD").await.unwrap();
        assert!(broken.stale);
        assert!(broken.position.is_flat()); // nothing was ever cached

        tx.send(ReconciliationMessage::Shutdown).await.unwrap();
    }
}
