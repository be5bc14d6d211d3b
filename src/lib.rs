pub mod arguments;
pub mod config;
pub mod errors; // Structured error handling
pub mod exchange; // Exchange position source (trait + adapters)
pub mod ledger; // SQLite trade ledger
pub mod logger;
pub mod paths;
pub mod recovery; // Crash detection and reconciliation
pub mod registry; // In-memory open position registry
pub mod run;
pub mod shutdown;
pub mod snapshot; // Crash-safe state snapshot
pub mod types;
pub mod worker;
