//! Position and account entities
//!
//! The authoritative position is always the venue's; the copy held here
//! is either a fresh venue report or the reconciler's provisional cache.
//! Invariant: `direction == Flat` exactly when `size == 0`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    /// Sign multiplier for pnl math: +1 long, -1 short, 0 flat.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
            Direction::Flat => 0.0,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Direction::Flat)
    }

    /// True when both sides are open and opposite.
    pub fn opposes(&self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Long, Direction::Short) | (Direction::Short, Direction::Long)
        )
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
            Direction::Flat => write!(f, "FLAT"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub direction: Direction,
    pub size: f64,
    pub avg_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub entry_time: Option<DateTime<Utc>>,
}

impl Position {
    pub fn flat(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            direction: Direction::Flat,
            size: 0.0,
            avg_price: 0.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            entry_time: None,
        }
    }

    pub fn open(
        instrument: impl Into<String>,
        direction: Direction,
        size: f64,
        avg_price: f64,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            direction,
            size,
            avg_price,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            entry_time: Some(Utc::now()),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.direction == Direction::Flat || self.size == 0.0
    }

    /// Checks the flat ⇔ size-zero invariant.
    pub fn is_consistent(&self) -> bool {
        match self.direction {
            Direction::Flat => self.size == 0.0,
            Direction::Long | Direction::Short => self.size > 0.0,
        }
    }

    /// True when the venue report and the cached copy describe a
    /// different position, beyond float noise.
    pub fn differs_from(&self, other: &Position) -> bool {
        const EPS: f64 = 1e-9;
        self.direction != other.direction
            || (self.size - other.size).abs() > EPS
            || (self.avg_price - other.avg_price).abs() > EPS
    }
}

/// Account state as reported by the venue connector, consumed by the
/// optimizer and the position sizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub available_margin: f64,
    pub open_exposure: f64,
}

impl AccountSnapshot {
    pub fn new(equity: f64) -> Self {
        Self {
            equity,
            available_margin: equity,
            open_exposure: 0.0,
        }
    }
}
