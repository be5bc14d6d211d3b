// Reconciliation - crash detection and state repair at startup
pub mod decision;
pub mod engine;
pub mod report;

pub use decision::{select_action, RecoveryAction};
pub use engine::{
    ReconciliationEngine, RecoveryInfo, RecoveryOutcome, RecoverySettings, RecoveryState,
};
pub use report::{summarize, ReconciliationDiagnostic};
