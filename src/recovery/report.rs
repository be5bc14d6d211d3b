/// Structured diagnostics for passes that need a human
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::decision::RecoveryAction;
use super::engine::RecoveryOutcome;
use crate::logger::{self, LogTag};
use crate::registry::SyncResult;
use crate::snapshot::SnapshotTrade;
use crate::types::{OperationalPhase, SessionId};

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationDiagnostic {
    pub kind: &'static str,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub saved_phase: OperationalPhase,
    pub correct_phase: OperationalPhase,
    pub saved_count: usize,
    pub real_count: usize,
    /// What the decision table chose before the override
    pub table_action: RecoveryAction,
    pub resolved_phase: OperationalPhase,
    pub session_id: Option<SessionId>,
    pub sync: Option<SyncResult>,
    pub saved_trades: Vec<SnapshotTrade>,
    pub real_trades: Vec<SnapshotTrade>,
}

impl ReconciliationDiagnostic {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!("{{\"kind\":\"{}\",\"encode_error\":\"{}\"}}", self.kind, e))
    }

    /// Log at ERROR on the recovery tag
    pub fn emit(&self) {
        logger::error(
            LogTag::Recovery,
            &format!(
                "MANUAL_REVIEW_NEEDED: {}; resuming in {}\n{}",
                self.reason,
                self.resolved_phase,
                self.to_json()
            ),
        );
    }
}

/// One-line summary for operator output
pub fn summarize(outcome: &RecoveryOutcome) -> String {
    let action = outcome
        .action
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| "none".to_string());

    let mut summary = format!(
        "{} phase={} action={} positions={} orphans_created={} orphans_bound={} state={}",
        if outcome.success { "OK" } else { "FAILED" },
        outcome.phase,
        action,
        outcome.real_count,
        outcome.orphans_created,
        outcome.orphans_bound,
        outcome.final_state
    );
    if let Some(error) = &outcome.error {
        summary.push_str(&format!(" error=\"{}\"", error));
    }
    summary
}
