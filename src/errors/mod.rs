/// Error taxonomy for the recovery core
///
/// Low-level I/O failures (disk, network) are never folded into default values
/// inside the core. They travel up as typed errors until they reach the
/// reconciliation engine, which is the only place that picks a fallback.
use thiserror::Error;

use crate::types::{SessionId, Side, TradeId};

#[derive(Error, Debug)]
pub enum TradeKeeperError {
    #[error("Persistence error ({context}): {message}")]
    Persistence { context: String, message: String },

    #[error("Exchange unavailable: {0}")]
    ExchangeUnavailable(String),

    #[error("Exchange call timed out after {seconds} seconds")]
    ExchangeTimeout { seconds: u64 },

    #[error("Session {session_id} is not active")]
    InvalidSession { session_id: SessionId },

    #[error("Unknown session: {session_id}")]
    UnknownSession { session_id: SessionId },

    #[error("No session is bound to the position registry")]
    NoActiveSession,

    #[error("No open trade for {0}")]
    UnknownTrade(String),

    #[error("Invalid trade parameters: {0}")]
    InvalidTrade(String),

    #[error("Position already open for {symbol} {side}")]
    PositionAlreadyOpen { symbol: String, side: Side },

    #[error("A reconciliation pass is already running")]
    RecoveryInProgress,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TradeKeeperError {
    pub fn persistence(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        TradeKeeperError::Persistence {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub fn unknown_trade(id: TradeId) -> Self {
        TradeKeeperError::UnknownTrade(format!("trade #{}", id))
    }

    /// Storage-level failures: snapshot or ledger could not be read or written.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            TradeKeeperError::Persistence { .. }
                | TradeKeeperError::Database(_)
                | TradeKeeperError::Serialization(_)
                | TradeKeeperError::Io(_)
        )
    }

    /// Transient failures that the next scheduled pass may succeed on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TradeKeeperError::ExchangeUnavailable(_)
                | TradeKeeperError::ExchangeTimeout { .. }
                | TradeKeeperError::RecoveryInProgress
        )
    }

    /// Caller mistakes, surfaced immediately and never retried automatically.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            TradeKeeperError::InvalidSession { .. }
                | TradeKeeperError::UnknownSession { .. }
                | TradeKeeperError::NoActiveSession
                | TradeKeeperError::UnknownTrade(_)
                | TradeKeeperError::InvalidTrade(_)
                | TradeKeeperError::PositionAlreadyOpen { .. }
        )
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            TradeKeeperError::ExchangeUnavailable(_) => Some(10),
            TradeKeeperError::ExchangeTimeout { .. } => Some(5),
            TradeKeeperError::RecoveryInProgress => Some(1),
            _ => None,
        }
    }
}

pub type TradeKeeperResult<T> = Result<T, TradeKeeperError>;
