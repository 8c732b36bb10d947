use thiserror::Error;
use tokio::sync::mpsc;

/// Engine-level errors. Only `Configuration` stops the system; every
/// other failure degrades to "no trade this cycle" or a Failed trade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("No response received from actor")]
    NoResponse,

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl<T> From<mpsc::error::SendError<T>> for EngineError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        EngineError::ChannelSend(e.to_string())
    }
}

/// Common result type for venue connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors surfaced by the venue connector.
#[derive(Debug, Error, Clone)]
pub enum ConnectorError {
    #[error("Connector unavailable: {0}")]
    Unavailable(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Position query failed: {0}")]
    QueryFailed(String),

    #[error("Connector timeout")]
    Timeout,
}

/// Errors surfaced by prediction and optimization providers. Always
/// isolated per call; they contribute a null result, never abort a cycle.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider call failed: {0}")]
    Failed(String),

    #[error("Provider timeout")]
    Timeout,
}
