//! Risk Ledger & Circuit Breaker
//!
//! Tracks the session's realized pnl, trade count, loss streak and open
//! exposure, and gates new trade admission once any limit is crossed.
//! All mutation goes through the single ledger owned by the engine;
//! the execution actor and the pipeline never touch counters directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::entities::trade::OrderCommand;

/// Hard limits for the circuit breaker. `max_daily_loss` is negative
/// (a pnl floor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_daily_loss: f64,
    pub max_daily_trades: u32,
    pub max_consecutive_losses: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss: -1000.0,
            max_daily_trades: 20,
            max_consecutive_losses: 3,
        }
    }
}

/// Mutable session counters. Snapshotted for crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_pnl: f64,
    pub daily_trade_count: u32,
    pub consecutive_losses: u32,
    pub total_exposure: f64,
    pub session_peak_equity: f64,
    pub session_start: DateTime<Utc>,
}

impl RiskState {
    fn fresh(baseline_equity: f64) -> Self {
        Self {
            daily_pnl: 0.0,
            daily_trade_count: 0,
            consecutive_losses: 0,
            total_exposure: 0.0,
            session_peak_equity: baseline_equity,
            session_start: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct RiskLedger {
    limits: RiskLimits,
    state: RiskState,
}

impl RiskLedger {
    pub fn new(limits: RiskLimits, baseline_equity: f64) -> Self {
        Self {
            limits,
            state: RiskState::fresh(baseline_equity),
        }
    }

    /// Restore counters from a persisted snapshot.
    pub fn restore(limits: RiskLimits, state: RiskState) -> Self {
        Self { limits, state }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Record an admitted trade: bump the day count and open exposure.
    pub fn record_trade_opened(&mut self, command: &OrderCommand) {
        self.state.daily_trade_count += 1;
        self.state.total_exposure += command.notional();
        info!(
            trade_id = command.trade_id,
            instrument = %command.instrument,
            daily_trade_count = self.state.daily_trade_count,
            total_exposure = self.state.total_exposure,
            "trade opened"
        );
    }

    /// Record a terminal trade: fold realized pnl into the day, release
    /// the notional, and advance or reset the loss streak.
    pub fn record_trade_closed(&mut self, pnl: f64, released_notional: f64) {
        self.state.daily_pnl += pnl;
        self.state.total_exposure = (self.state.total_exposure - released_notional).max(0.0);

        if pnl > 0.0 {
            self.state.consecutive_losses = 0;
        } else if pnl < 0.0 {
            self.state.consecutive_losses += 1;
        }

        if !self.is_trading_allowed() {
            warn!(
                daily_pnl = self.state.daily_pnl,
                consecutive_losses = self.state.consecutive_losses,
                "circuit breaker tripped"
            );
        }
    }

    /// Track equity for drawdown: the session peak only ratchets up.
    pub fn record_equity(&mut self, equity: f64) {
        if equity.is_finite() && equity > self.state.session_peak_equity {
            self.state.session_peak_equity = equity;
        }
    }

    /// Current drawdown fraction from the session peak, in [0, 1].
    pub fn drawdown(&self, equity: f64) -> f64 {
        let peak = self.state.session_peak_equity;
        if peak <= 0.0 || !equity.is_finite() {
            return 0.0;
        }
        ((peak - equity) / peak).clamp(0.0, 1.0)
    }

    pub fn is_trading_allowed(&self) -> bool {
        self.breach_reasons().is_empty()
    }

    /// Every limit currently breached, phrased for diagnostics.
    pub fn breach_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.state.daily_pnl <= self.limits.max_daily_loss {
            reasons.push("Daily loss limit reached".to_string());
        }
        if self.state.daily_trade_count >= self.limits.max_daily_trades {
            reasons.push("Daily trade limit reached".to_string());
        }
        if self.state.consecutive_losses >= self.limits.max_consecutive_losses {
            reasons.push("Consecutive loss limit reached".to_string());
        }
        reasons
    }

    /// Session boundary: zero every counter and snapshot a new equity
    /// baseline. The only way to re-arm a tripped breaker.
    pub fn daily_reset(&mut self, baseline_equity: f64) {
        info!(
            previous_pnl = self.state.daily_pnl,
            previous_trades = self.state.daily_trade_count,
            "risk ledger daily reset"
        );
        self.state = RiskState::fresh(baseline_equity);
    }
}
