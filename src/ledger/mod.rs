// Trade ledger - durable sessions, trades and identifier mappings
pub mod db;
pub mod mappings;
pub mod schema;
pub mod sessions;

pub use db::{LedgerStats, TradeLedger};
pub use schema::LEDGER_SCHEMA_VERSION;
