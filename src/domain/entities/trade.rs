//! Trade lifecycle entities
//!
//! A trade advances through a tagged state machine owned by the
//! execution actor:
//!
//! `Building -> Pending -> Executed -> Monitoring -> { Closed | Failed }`
//!
//! Each trade occupies exactly one state at a time; terminal trades are
//! archived as [`CompletedTrade`] records.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::candidate::TradeCandidate;
use crate::domain::entities::position::Direction;

static NEXT_TRADE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique trade identifier.
pub fn next_trade_id() -> u64 {
    NEXT_TRADE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Order command assembled from a validated, sized candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCommand {
    pub trade_id: u64,
    pub instrument: String,
    pub direction: Direction,
    /// Whole units; the sizer never emits less than 1.
    pub size: u64,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl OrderCommand {
    pub fn from_candidate(candidate: &TradeCandidate, size: u64) -> Self {
        Self {
            trade_id: next_trade_id(),
            instrument: candidate.instrument.clone(),
            direction: candidate.direction,
            size,
            entry: candidate.entry,
            stop: candidate.stop,
            target: candidate.primary_target().unwrap_or(candidate.entry),
            confidence: candidate.confidence,
            created_at: Utc::now(),
        }
    }

    /// Notional exposure this command adds when filled at entry.
    pub fn notional(&self) -> f64 {
        self.size as f64 * self.entry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Building,
    Pending,
    Executed,
    Monitoring,
    Closed,
    Failed,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeStatus::Building => write!(f, "BUILDING"),
            TradeStatus::Pending => write!(f, "PENDING"),
            TradeStatus::Executed => write!(f, "EXECUTED"),
            TradeStatus::Monitoring => write!(f, "MONITORING"),
            TradeStatus::Closed => write!(f, "CLOSED"),
            TradeStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// A dispatched command awaiting venue confirmation.
#[derive(Debug, Clone)]
pub struct PendingTrade {
    pub command: OrderCommand,
    pub submitted_at: DateTime<Utc>,
}

/// A confirmed trade under monitoring.
#[derive(Debug, Clone)]
pub struct ExecutedTrade {
    pub command: OrderCommand,
    pub fill_price: f64,
    pub executed_at: DateTime<Utc>,
}

/// Terminal outcome of a trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Closed { realized_pnl: f64 },
    Failed { cause: String },
}

/// Archived record of a terminal trade, retained in the session history
/// and the persisted snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTrade {
    pub trade_id: u64,
    pub instrument: String,
    pub direction: Direction,
    pub size: u64,
    pub fill_price: Option<f64>,
    pub confidence: f64,
    pub outcome: TradeOutcome,
    pub closed_at: DateTime<Utc>,
}

impl CompletedTrade {
    pub fn realized_pnl(&self) -> f64 {
        match &self.outcome {
            TradeOutcome::Closed { realized_pnl } => *realized_pnl,
            TradeOutcome::Failed { .. } => 0.0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TradeOutcome::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_ids_are_unique() {
        let a = next_trade_id();
        let b = next_trade_id();
        let c = next_trade_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_command_from_candidate() {
        let candidate = TradeCandidate {
            instrument: "ETH-USD".to_string(),
            direction: Direction::Short,
            entry: 3000.0,
            stop: 3060.0,
            targets: vec![2880.0, 2820.0],
            expected_profit: 240.0,
            win_probability: 0.6,
            confidence: 0.75,
            raw_size: 2.0,
            risk_reward_ratio: 2.0,
            kelly_fraction: 0.1,
        };

        let cmd = OrderCommand::from_candidate(&candidate, 2);
        assert_eq!(cmd.instrument, "ETH-USD");
        assert_eq!(cmd.direction, Direction::Short);
        assert_eq!(cmd.size, 2);
        assert_eq!(cmd.target, 2880.0);
        assert_eq!(cmd.notional(), 6000.0);
    }

    #[test]
    fn test_completed_trade_accessors() {
        let closed = CompletedTrade {
            trade_id: 1,
            instrument: "BTC-USD".to_string(),
            direction: Direction::Long,
            size: 1,
            fill_price: Some(100.25),
            confidence: 0.8,
            outcome: TradeOutcome::Closed { realized_pnl: 42.0 },
            closed_at: Utc::now(),
        };
        assert_eq!(closed.realized_pnl(), 42.0);
        assert!(!closed.is_failure());

        let failed = CompletedTrade {
            outcome: TradeOutcome::Failed {
                cause: "confirmation timeout".to_string(),
            },
            ..closed
        };
        assert_eq!(failed.realized_pnl(), 0.0);
        assert!(failed.is_failure());
    }
}
