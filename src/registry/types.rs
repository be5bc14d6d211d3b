use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

use crate::snapshot::SnapshotTrade;
use crate::types::{ExternalId, SessionId, Side, Trade, TradeId, TradeOrigin};

/// Map key for a tracked position. Orphans that have not been persisted yet
/// carry a temporary key until `bind_session` swaps in the ledger id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Trade(TradeId),
    Pending(Uuid),
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKey::Trade(id) => write!(f, "#{}", id),
            EntryKey::Pending(uuid) => write!(f, "pending-{}", uuid.simple()),
        }
    }
}

/// One position this process currently considers open
#[derive(Debug, Clone)]
pub struct TrackedPosition {
    pub key: EntryKey,
    pub internal_id: Option<TradeId>,
    pub external_id: Option<ExternalId>,
    pub broker_order_id: Option<String>,
    pub session_id: Option<SessionId>,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub origin: TradeOrigin,
    /// Confirmed against the exchange during the current process lifetime
    pub recovered: bool,
    /// Orphan waiting for `bind_session` to be persisted
    pub needs_session: bool,
    pub(crate) opened_locally_at: Option<Instant>,
}

impl TrackedPosition {
    pub fn from_trade(trade: &Trade) -> Self {
        Self {
            key: EntryKey::Trade(trade.internal_id),
            internal_id: Some(trade.internal_id),
            external_id: trade.external_id.clone(),
            broker_order_id: trade.broker_order_id.clone(),
            session_id: Some(trade.session_id.clone()),
            symbol: trade.symbol.clone(),
            side: trade.side,
            quantity: trade.quantity,
            entry_price: trade.entry_price,
            entry_time: trade.entry_time,
            origin: trade.origin,
            recovered: false,
            needs_session: false,
            opened_locally_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.key, EntryKey::Pending(_))
    }

    pub fn to_snapshot_trade(&self) -> SnapshotTrade {
        SnapshotTrade {
            internal_id: self.internal_id,
            symbol: self.symbol.clone(),
            side: self.side,
            quantity: self.quantity,
            entry_price: self.entry_price,
        }
    }
}

/// Outcome of one exchange merge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Exchange positions tied to an existing trade (memory or ledger)
    pub matched: usize,
    /// Orphan entries created by this sync
    pub created: usize,
    /// Tracked entries dropped because the exchange no longer reports them
    pub stale: usize,
    /// Exchange entries ignored as repeats of one already handled in this sync
    pub duplicates: usize,
    /// Exchange positions whose quantity disagrees with the open trade already
    /// held for that symbol and side; the trade is flagged, nothing is created
    #[serde(default)]
    pub mismatched: usize,
    /// First ledger write failure or quantity conflict; the affected entries
    /// were left untouched
    pub error: Option<String>,
}

impl SyncResult {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }

    pub(crate) fn record_error(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }
}

/// Which trade `close` should act on
#[derive(Debug, Clone, PartialEq)]
pub enum CloseTarget {
    Id(TradeId),
    Position { symbol: String, side: Side },
}

impl CloseTarget {
    pub fn position(symbol: &str, side: Side) -> Self {
        CloseTarget::Position {
            symbol: symbol.to_string(),
            side,
        }
    }
}

impl fmt::Display for CloseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseTarget::Id(id) => write!(f, "trade #{}", id),
            CloseTarget::Position { symbol, side } => write!(f, "{} {}", symbol, side),
        }
    }
}
