use thiserror::Error;

use crate::deposit::Chain;
use crate::units::UnitError;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Amount error: {0}")]
    Unit(#[from] UnitError),

    #[error("No watcher registered for {0}")]
    UnknownChain(Chain),
}

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("Price lookup failed: {0}")]
    Lookup(String),

    #[error("No price feed for asset {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Ledger request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Ledger rejected batch: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connect timed out")]
    ConnectTimeout,

    #[error("Ping timeout - no frame received")]
    PingTimeout,

    #[error("Connection closed unexpectedly")]
    Closed,
}
