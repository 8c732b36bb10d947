//! Downstream engine events
//!
//! Structured events for dashboards and loggers. Observers are
//! fire-and-forget subscribers on a broadcast channel and are never on
//! the decision path; a lagging or absent observer costs nothing.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::entities::position::Direction;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    TradeExecuted {
        trade_id: u64,
        instrument: String,
        direction: Direction,
        size: u64,
        fill_price: f64,
    },
    TradeCompleted {
        trade_id: u64,
        instrument: String,
        realized_pnl: f64,
    },
    TradeRejected {
        instrument: String,
        reasons: Vec<String>,
    },
    ThresholdAdjusted {
        previous: f64,
        current: f64,
    },
    StopAdjusted {
        trade_id: u64,
        instrument: String,
        stop: f64,
    },
    CircuitBreakerTripped {
        reasons: Vec<String>,
    },
    ReconciliationMismatch {
        instrument: String,
        cached_size: f64,
        venue_size: f64,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish without waiting; dropped when nobody listens.
    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send(event.clone()).is_err() {
            trace!(?event, "no event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
