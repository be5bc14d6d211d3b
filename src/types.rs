/// Core domain types shared by the ledger, the registry and the recovery engine
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Ledger-issued internal trade identifier (primary identity inside the system)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(pub i64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(format!("session-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        SessionId(value)
    }
}

/// Identifier used to correlate a trade with broker state.
/// Synthetic until the broker's authoritative id is observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(pub String);

impl ExternalId {
    const SYNTHETIC_PREFIX: &'static str = "SYN-";

    pub fn synthetic() -> Self {
        ExternalId(format!(
            "{}{}",
            Self::SYNTHETIC_PREFIX,
            uuid::Uuid::new_v4().simple()
        ))
    }

    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with(Self::SYNTHETIC_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExternalId {
    fn from(value: &str) -> Self {
        ExternalId(value.to_string())
    }
}

// =============================================================================
// ENUMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    // Exchanges report "Buy"/"Sell" for one-way position mode
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            _ => Err(format!("Unknown side: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(TradeStatus::Open),
            "CLOSED" => Ok(TradeStatus::Closed),
            _ => Err(format!("Unknown trade status: {}", s)),
        }
    }
}

/// Provenance of a trade record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeOrigin {
    /// Opened by the strategy
    Normal,
    /// Discovered on the exchange with no matching ledger row
    RecoveryOrphan,
}

impl TradeOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOrigin::Normal => "NORMAL",
            TradeOrigin::RecoveryOrphan => "RECOVERY_ORPHAN",
        }
    }
}

impl FromStr for TradeOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(TradeOrigin::Normal),
            "RECOVERY_ORPHAN" => Ok(TradeOrigin::RecoveryOrphan),
            _ => Err(format!("Unknown trade origin: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SessionStatus::Active),
            "COMPLETED" => Ok(SessionStatus::Completed),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Coarse operational state of the trading process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationalPhase {
    SeekingEntry,
    ManagingPositions,
}

impl OperationalPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationalPhase::SeekingEntry => "SEEKING_ENTRY",
            OperationalPhase::ManagingPositions => "MANAGING_POSITIONS",
        }
    }

    /// Map a persisted phase string (including legacy per-direction phases)
    /// onto the two-phase model. Unknown values fall back to seeking.
    pub fn normalize(saved: &str) -> Self {
        match saved.trim().to_uppercase().as_str() {
            "MANAGING_POSITIONS" | "IN_POSITION_LONG" | "IN_POSITION_SHORT" => {
                OperationalPhase::ManagingPositions
            }
            _ => OperationalPhase::SeekingEntry,
        }
    }

    /// Phase implied by the number of positions actually open
    pub fn for_open_count(count: usize) -> Self {
        if count > 0 {
            OperationalPhase::ManagingPositions
        } else {
            OperationalPhase::SeekingEntry
        }
    }
}

impl fmt::Display for OperationalPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which sessions a ledger query spans
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionScope {
    Session(SessionId),
    /// Recovery only: the current-session pointer itself may have been lost
    AnySession,
}

impl SessionScope {
    pub fn from_option(session_id: Option<&SessionId>) -> Self {
        match session_id {
            Some(id) => SessionScope::Session(id.clone()),
            None => SessionScope::AnySession,
        }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// A single position lifecycle record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub internal_id: TradeId,
    pub external_id: Option<ExternalId>,
    pub broker_order_id: Option<String>,
    pub session_id: SessionId,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub status: TradeStatus,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub fee: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub origin: TradeOrigin,
    /// Set when reconciliation found the trade open here but gone on the exchange
    pub review_reason: Option<String>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }
}

/// Realized profit of a closed position, net of fees
pub fn realized_pnl(side: Side, entry_price: f64, exit_price: f64, quantity: f64, fee: f64) -> f64 {
    let gross = match side {
        Side::Long => (exit_price - entry_price) * quantity,
        Side::Short => (entry_price - exit_price) * quantity,
    };
    gross - fee
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub symbol: String,
    /// Opaque strategy configuration blob
    pub strategy_config: String,
    pub initial_balance: f64,
    pub final_balance: Option<f64>,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierMapping {
    pub internal_id: TradeId,
    pub external_id: ExternalId,
    pub broker_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub created_at: DateTime<Utc>,
}

/// Live position as reported by the exchange. Never persisted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub avg_price: f64,
}

impl ExchangePosition {
    pub fn new(symbol: &str, side: Side, quantity: f64, avg_price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            avg_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_normalization() {
        assert_eq!(
            OperationalPhase::normalize("IN_POSITION_LONG"),
            OperationalPhase::ManagingPositions
        );
        assert_eq!(
            OperationalPhase::normalize("in_position_short"),
            OperationalPhase::ManagingPositions
        );
        assert_eq!(
            OperationalPhase::normalize("MANAGING_POSITIONS"),
            OperationalPhase::ManagingPositions
        );
        assert_eq!(
            OperationalPhase::normalize("SEEKING_ENTRY"),
            OperationalPhase::SeekingEntry
        );
        assert_eq!(
            OperationalPhase::normalize("WAITING_FOR_SIGNAL"),
            OperationalPhase::SeekingEntry
        );
        assert_eq!(OperationalPhase::normalize(""), OperationalPhase::SeekingEntry);
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!("Buy".parse::<Side>().unwrap(), Side::Long);
        assert_eq!("SHORT".parse::<Side>().unwrap(), Side::Short);
        assert!("flat".parse::<Side>().is_err());
    }

    #[test]
    fn test_realized_pnl_by_side() {
        assert!((realized_pnl(Side::Long, 100.0, 110.0, 2.0, 1.0) - 19.0).abs() < 1e-9);
        assert!((realized_pnl(Side::Short, 100.0, 110.0, 2.0, 1.0) + 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_synthetic_external_ids_are_unique() {
        let a = ExternalId::synthetic();
        let b = ExternalId::synthetic();
        assert!(a.is_synthetic());
        assert_ne!(a, b);
        assert!(!ExternalId::from("1234567").is_synthetic());
    }
}
