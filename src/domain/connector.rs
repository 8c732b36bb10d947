//! Venue Connector Trait
//!
//! Common interface for the venue the decision core trades through. The
//! concrete connector (REST, WebSocket, FIX, paper) lives outside this
//! crate; the core only needs query/submit/confirmation primitives.
//! Every call is raced against an explicit timeout by the callers, so
//! implementations may block for as long as their transport does.

use async_trait::async_trait;

use crate::domain::entities::position::{AccountSnapshot, Position};
use crate::domain::entities::trade::OrderCommand;
use crate::domain::errors::ConnectorResult;

/// Fill confirmation delivered by the venue after a submitted order
/// executes.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub trade_id: u64,
    pub fill_price: f64,
}

#[async_trait]
pub trait VenueConnector: Send + Sync {
    /// Name of the venue, for logging.
    fn name(&self) -> &str;

    /// Authoritative position for an instrument.
    async fn query_position(&self, instrument: &str) -> ConnectorResult<Position>;

    /// Current account equity and margin.
    async fn query_account(&self) -> ConnectorResult<AccountSnapshot>;

    /// Submit an order command.
    ///
    /// `Ok(true)` means the venue accepted the order for execution;
    /// `Ok(false)` or `Err(..)` is a dispatch-level rejection.
    async fn submit(&self, command: &OrderCommand) -> ConnectorResult<bool>;

    /// Resolves when the venue confirms execution of `trade_id`.
    ///
    /// Callers bound this with a timeout; implementations should wait
    /// indefinitely rather than poll.
    async fn confirmation(&self, trade_id: u64) -> ConnectorResult<Confirmation>;

    /// Whether the connector believes it is connected and current.
    async fn is_healthy(&self) -> bool {
        true
    }
}
