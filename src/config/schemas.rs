/// Configuration schemas - all config structures defined once with defaults
///
/// Each struct is defined using the config_struct! macro which provides:
/// - Single-source definition (no repetition)
/// - Embedded defaults
/// - Serde support
use crate::config_struct;

// ============================================================================
// LEDGER CONFIGURATION
// ============================================================================

config_struct! {
    /// Durable trade ledger (SQLite)
    pub struct LedgerConfig {
        /// File name under the data directory, or an absolute path
        database_file: String = "ledger.db".to_string(),
        /// How long a write waits on a locked database before failing
        busy_timeout_ms: u64 = 5000,
    }
}

// ============================================================================
// SNAPSHOT CONFIGURATION
// ============================================================================

config_struct! {
    /// Operational state checkpoint
    pub struct SnapshotConfig {
        file_name: String = "trading_state.json".to_string(),
        heartbeat_interval_secs: u64 = 30,
    }
}

// ============================================================================
// REGISTRY CONFIGURATION
// ============================================================================

config_struct! {
    /// In-memory position registry
    pub struct RegistryConfig {
        /// Allowed quantity deviation when matching local trades to exchange
        /// positions, in percent of the exchange quantity
        quantity_tolerance_pct: f64 = 1.0,
        /// Positions opened by this process are not treated as stale by an
        /// exchange sync within this window
        local_open_grace_secs: u64 = 60,
    }
}

impl RegistryConfig {
    pub fn tolerance_fraction(&self) -> f64 {
        self.quantity_tolerance_pct / 100.0
    }
}

// ============================================================================
// RECOVERY CONFIGURATION
// ============================================================================

config_struct! {
    /// Reconciliation engine and background sync
    pub struct RecoveryConfig {
        enabled: bool = true,
        /// Upper bound for one exchange position query
        exchange_timeout_secs: u64 = 10,
        /// Product category passed to the exchange position query
        position_category: String = "linear".to_string(),
        /// Symbol recorded on sessions created to adopt orphans
        session_symbol: String = "MULTI".to_string(),
        periodic_sync_interval_secs: u64 = 60,
    }
}

// ============================================================================
// EXCHANGE CONFIGURATION
// ============================================================================

config_struct! {
    /// File-backed exchange collaborator used by the binary
    pub struct ExchangeConfig {
        positions_file: String = "exchange_positions.json".to_string(),
    }
}

// ============================================================================
// ROOT CONFIGURATION
// ============================================================================

config_struct! {
    pub struct Config {
        ledger: LedgerConfig = LedgerConfig::default(),
        snapshot: SnapshotConfig = SnapshotConfig::default(),
        registry: RegistryConfig = RegistryConfig::default(),
        recovery: RecoveryConfig = RecoveryConfig::default(),
        exchange: ExchangeConfig = ExchangeConfig::default(),
    }
}

impl Config {
    /// Reject values the core cannot operate with
    pub fn validate(&self) -> Result<(), String> {
        let tolerance = self.registry.quantity_tolerance_pct;
        if !tolerance.is_finite() || !(0.0..100.0).contains(&tolerance) {
            return Err(format!(
                "registry.quantity_tolerance_pct must be within [0, 100), got {}",
                tolerance
            ));
        }
        if self.recovery.exchange_timeout_secs == 0 {
            return Err("recovery.exchange_timeout_secs must be greater than 0".to_string());
        }
        if self.recovery.periodic_sync_interval_secs == 0 {
            return Err("recovery.periodic_sync_interval_secs must be greater than 0".to_string());
        }
        if self.snapshot.heartbeat_interval_secs == 0 {
            return Err("snapshot.heartbeat_interval_secs must be greater than 0".to_string());
        }
        if self.ledger.database_file.trim().is_empty() || self.snapshot.file_name.trim().is_empty() {
            return Err("ledger.database_file and snapshot.file_name must not be empty".to_string());
        }
        Ok(())
    }
}
