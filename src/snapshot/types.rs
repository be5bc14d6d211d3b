use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{OperationalPhase, SessionId, Side, Trade, TradeId};

/// Serialized subset of an open trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTrade {
    /// None for orphans that were still waiting for a session
    pub internal_id: Option<TradeId>,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
}

impl From<&Trade> for SnapshotTrade {
    fn from(trade: &Trade) -> Self {
        Self {
            internal_id: Some(trade.internal_id),
            symbol: trade.symbol.clone(),
            side: trade.side,
            quantity: trade.quantity,
            entry_price: trade.entry_price,
        }
    }
}

/// On-disk checkpoint. Overwritten on every transition and heartbeat, and
/// deliberately never touched at crash time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Kept as written so that legacy phase names survive a load/save cycle;
    /// interpret through `phase()`
    pub operational_phase: String,
    #[serde(default)]
    pub active_trades: Vec<SnapshotTrade>,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub stopped_manually: bool,
    #[serde(default)]
    pub crash_recovery_needed: bool,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub last_save_time: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn new(
        phase: OperationalPhase,
        active_trades: Vec<SnapshotTrade>,
        session_id: Option<SessionId>,
    ) -> Self {
        Self {
            operational_phase: phase.as_str().to_string(),
            active_trades,
            is_running: false,
            stopped_manually: false,
            crash_recovery_needed: false,
            session_id,
            last_save_time: Utc::now(),
        }
    }

    pub fn phase(&self) -> OperationalPhase {
        OperationalPhase::normalize(&self.operational_phase)
    }

    /// (was running OR crash flagged) AND NOT stopped manually
    pub fn should_auto_restart(&self) -> bool {
        (self.is_running || self.crash_recovery_needed) && !self.stopped_manually
    }
}
