/// Reconciliation engine
///
/// One pass walks CHECKING -> FETCHING_TRUTH -> DIFFING -> ACTION_SELECTED ->
/// EXECUTING -> DONE, or ends in FAILED. This is the only place that turns an
/// error into a fallback: a failed fetch leaves the snapshot untouched so the
/// next pass retries, and every unclear outcome resumes in SEEKING_ENTRY.
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::decision::{select_action, RecoveryAction};
use super::report::ReconciliationDiagnostic;
use crate::config::RecoveryConfig;
use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::exchange::{fetch_positions_with_timeout, ExchangeClient};
use crate::ledger::TradeLedger;
use crate::logger::{self, LogTag};
use crate::registry::{PositionRegistry, SyncResult};
use crate::snapshot::{StateSnapshot, StateSnapshotStore};
use crate::types::{OperationalPhase, SessionId, SessionScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryState {
    Checking,
    FetchingTruth,
    Diffing,
    ActionSelected,
    Executing,
    Done,
    Failed,
}

impl RecoveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryState::Checking => "CHECKING",
            RecoveryState::FetchingTruth => "FETCHING_TRUTH",
            RecoveryState::Diffing => "DIFFING",
            RecoveryState::ActionSelected => "ACTION_SELECTED",
            RecoveryState::Executing => "EXECUTING",
            RecoveryState::Done => "DONE",
            RecoveryState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryState::Done | RecoveryState::Failed)
    }
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of `check_recovery_needed`, fed back into `execute_recovery`
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryInfo {
    pub needed: bool,
    pub reason: String,
    pub snapshot: Option<StateSnapshot>,
    pub saved_phase: OperationalPhase,
    pub saved_count: usize,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub phase: OperationalPhase,
    pub action: Option<RecoveryAction>,
    pub final_state: RecoveryState,
    pub transitions: Vec<RecoveryState>,
    pub real_count: usize,
    pub orphans_created: usize,
    pub orphans_bound: usize,
    pub session_id: Option<SessionId>,
    pub error: Option<String>,
}

impl RecoveryOutcome {
    fn new() -> Self {
        Self {
            success: false,
            phase: OperationalPhase::SeekingEntry,
            action: None,
            final_state: RecoveryState::Checking,
            transitions: vec![RecoveryState::Checking],
            real_count: 0,
            orphans_created: 0,
            orphans_bound: 0,
            session_id: None,
            error: None,
        }
    }

    fn enter(&mut self, state: RecoveryState) {
        logger::debug(
            LogTag::Recovery,
            &format!("{} -> {}", self.final_state, state),
        );
        self.final_state = state;
        self.transitions.push(state);
    }

    fn fail(mut self, stage: &str, error: &TradeKeeperError) -> Self {
        logger::error(
            LogTag::Recovery,
            &format!(
                "Recovery failed during {}: {} (snapshot left unchanged, resuming in {})",
                stage,
                error,
                OperationalPhase::SeekingEntry
            ),
        );
        self.enter(RecoveryState::Failed);
        self.success = false;
        self.phase = OperationalPhase::SeekingEntry;
        self.error = Some(error.to_string());
        self
    }
}

/// Values the engine reads from `[recovery]`
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub enabled: bool,
    pub exchange_timeout: Duration,
    pub position_category: String,
    pub session_symbol: String,
}

impl RecoverySettings {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            enabled: config.enabled,
            exchange_timeout: Duration::from_secs(config.exchange_timeout_secs),
            position_category: config.position_category.clone(),
            session_symbol: config.session_symbol.clone(),
        }
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

pub struct ReconciliationEngine {
    registry: Arc<PositionRegistry>,
    ledger: Arc<TradeLedger>,
    snapshots: Arc<StateSnapshotStore>,
    exchange: Arc<dyn ExchangeClient>,
    settings: RecoverySettings,
    /// Held for the whole pass; a second pass is rejected, not queued
    pass_guard: Mutex<()>,
}

impl ReconciliationEngine {
    pub fn new(
        registry: Arc<PositionRegistry>,
        snapshots: Arc<StateSnapshotStore>,
        exchange: Arc<dyn ExchangeClient>,
        settings: RecoverySettings,
    ) -> Self {
        Self {
            ledger: registry.ledger().clone(),
            registry,
            snapshots,
            exchange,
            settings,
            pass_guard: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<PositionRegistry> {
        &self.registry
    }

    pub fn snapshots(&self) -> &Arc<StateSnapshotStore> {
        &self.snapshots
    }

    /// CHECKING: decide from the last snapshot whether the previous run ended
    /// without a deliberate stop
    pub fn check_recovery_needed(&self) -> TradeKeeperResult<(bool, RecoveryInfo)> {
        let snapshot = self.snapshots.load()?;

        let (needed, reason) = match &snapshot {
            _ if !self.settings.enabled => (false, "recovery disabled in configuration".to_string()),
            None => (false, "no snapshot found (first run)".to_string()),
            Some(s) if s.stopped_manually => (false, "previous run was stopped manually".to_string()),
            Some(s) if s.should_auto_restart() => (
                true,
                if s.crash_recovery_needed {
                    "crash marker set".to_string()
                } else {
                    "previous run did not shut down cleanly".to_string()
                },
            ),
            Some(_) => (false, "previous run was not running".to_string()),
        };

        let info = RecoveryInfo {
            needed,
            reason,
            saved_phase: snapshot
                .as_ref()
                .map(|s| s.phase())
                .unwrap_or(OperationalPhase::SeekingEntry),
            saved_count: snapshot.as_ref().map(|s| s.active_trades.len()).unwrap_or(0),
            session_id: snapshot.as_ref().and_then(|s| s.session_id.clone()),
            snapshot,
        };

        logger::info(
            LogTag::Recovery,
            &format!(
                "Recovery check: needed={} ({}), saved phase {} with {} trade(s)",
                info.needed, info.reason, info.saved_phase, info.saved_count
            ),
        );
        Ok((needed, info))
    }

    /// Run one reconciliation pass.
    ///
    /// Returns `RecoveryInProgress` if another pass holds the guard; every other
    /// failure is reported inside the outcome.
    pub async fn execute_recovery(&self, info: &RecoveryInfo) -> TradeKeeperResult<RecoveryOutcome> {
        let _guard = self
            .pass_guard
            .try_lock()
            .map_err(|_| TradeKeeperError::RecoveryInProgress)?;

        let mut outcome = RecoveryOutcome::new();

        // CHECKING
        if !info.needed {
            outcome.enter(RecoveryState::Done);
            outcome.success = true;
            outcome.phase = info.saved_phase;
            outcome.session_id = info.session_id.clone();
            logger::info(
                LogTag::Recovery,
                &format!("No recovery needed: {}", info.reason),
            );
            return Ok(outcome);
        }

        logger::info(
            LogTag::Recovery,
            &format!("Starting recovery pass: {}", info.reason),
        );

        // FETCHING_TRUTH
        outcome.enter(RecoveryState::FetchingTruth);
        let scope = SessionScope::from_option(info.session_id.as_ref());
        if let Err(e) = self.registry.sync_from_ledger(&scope).await {
            return Ok(outcome.fail("ledger sync", &e));
        }

        let positions = match fetch_positions_with_timeout(
            self.exchange.as_ref(),
            &self.settings.position_category,
            self.settings.exchange_timeout,
        )
        .await
        {
            Ok(positions) => positions,
            Err(e) => return Ok(outcome.fail("exchange query", &e)),
        };

        let sync = match self.registry.sync_from_exchange(&positions).await {
            Ok(sync) => sync,
            Err(e) => return Ok(outcome.fail("exchange merge", &e)),
        };
        outcome.orphans_created = sync.created;

        // DIFFING
        outcome.enter(RecoveryState::Diffing);
        let real_count = self.registry.len().await;
        let correct_phase = OperationalPhase::for_open_count(real_count);
        outcome.real_count = real_count;

        // ACTION_SELECTED
        outcome.enter(RecoveryState::ActionSelected);
        let table_action = select_action(info.saved_phase, correct_phase, info.saved_count, real_count);
        let mut review_reason = sync.error.clone().map(|e| format!("exchange merge incomplete: {}", e));
        logger::info(
            LogTag::Recovery,
            &format!(
                "saved={} ({} trade(s)) real={} ({} position(s)) -> {}",
                info.saved_phase, info.saved_count, correct_phase, real_count, table_action
            ),
        );

        // EXECUTING
        outcome.enter(RecoveryState::Executing);
        match self.bind_session(info).await {
            Ok((session_id, bound)) => {
                outcome.session_id = session_id;
                outcome.orphans_bound = bound;
            }
            Err(e) => {
                logger::error(LogTag::Recovery, &format!("Session binding failed: {}", e));
                outcome.session_id = self.registry.session_id().await;
                review_reason.get_or_insert_with(|| format!("session binding failed: {}", e));
            }
        }

        let action = if review_reason.is_some() {
            RecoveryAction::ManualReviewNeeded
        } else {
            table_action
        };
        let phase = action.resulting_phase(correct_phase);
        outcome.action = Some(action);

        let real_trades = self.registry.snapshot_trades().await;
        if let Some(reason) = &review_reason {
            ReconciliationDiagnostic {
                kind: "reconciliation_manual_review",
                timestamp: Utc::now(),
                reason: reason.clone(),
                saved_phase: info.saved_phase,
                correct_phase,
                saved_count: info.saved_count,
                real_count,
                table_action,
                resolved_phase: phase,
                session_id: outcome.session_id.clone(),
                sync: Some(sync.clone()),
                saved_trades: info
                    .snapshot
                    .as_ref()
                    .map(|s| s.active_trades.clone())
                    .unwrap_or_default(),
                real_trades: real_trades.clone(),
            }
            .emit();
            outcome.error = Some(reason.clone());
        }

        if let Err(e) = self
            .snapshots
            .save_running(phase, real_trades, outcome.session_id.clone())
        {
            return Ok(outcome.fail("snapshot write", &e));
        }

        // DONE
        outcome.enter(RecoveryState::Done);
        outcome.success = true;
        outcome.phase = phase;

        logger::info(
            LogTag::Recovery,
            &format!(
                "Recovery complete: {} -> {} ({} position(s), {} orphan(s) created, {} bound)",
                action, phase, real_count, outcome.orphans_created, outcome.orphans_bound
            ),
        );
        Ok(outcome)
    }

    /// Pick the session orphans are filed under and bind the registry to it.
    /// A new session is only started when there is an orphan to persist.
    async fn bind_session(
        &self,
        info: &RecoveryInfo,
    ) -> TradeKeeperResult<(Option<SessionId>, usize)> {
        let mut session_id = match &info.session_id {
            Some(id) if self.ledger.is_session_active(id)? => Some(id.clone()),
            _ => self.ledger.latest_active_session()?.map(|s| s.session_id),
        };

        if session_id.is_none() && self.registry.pending_orphan_count().await > 0 {
            let id = self.ledger.start_session(
                &self.settings.session_symbol,
                "{\"created_by\":\"recovery\"}",
                0.0,
            )?;
            logger::info(
                LogTag::Recovery,
                &format!("Started session {} to adopt orphan positions", id),
            );
            session_id = Some(id);
        }

        match session_id {
            Some(id) => {
                let bound = self.registry.bind_session(&id).await?;
                Ok((Some(id), bound))
            }
            None => Ok((None, 0)),
        }
    }

    /// Background exchange merge for the periodic worker. Skipped while a
    /// recovery pass is running.
    pub async fn periodic_sync(&self) -> TradeKeeperResult<SyncResult> {
        let _guard = self
            .pass_guard
            .try_lock()
            .map_err(|_| TradeKeeperError::RecoveryInProgress)?;

        let positions = fetch_positions_with_timeout(
            self.exchange.as_ref(),
            &self.settings.position_category,
            self.settings.exchange_timeout,
        )
        .await?;
        let sync = self.registry.sync_from_exchange(&positions).await?;

        if self.registry.pending_orphan_count().await > 0 {
            if let Some(session_id) = self.registry.session_id().await {
                self.registry.bind_session(&session_id).await?;
            }
        }
        Ok(sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::exchange::StaticExchange;
    use crate::types::{ExchangePosition, Side};

    struct Harness {
        engine: ReconciliationEngine,
        exchange: Arc<StaticExchange>,
        _dir: tempfile::TempDir,
    }

    fn harness(positions: Vec<ExchangePosition>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(TradeLedger::open_in_memory().unwrap());
        let registry = Arc::new(PositionRegistry::new(ledger, &RegistryConfig::default()));
        let snapshots = Arc::new(StateSnapshotStore::new(dir.path().join("state.json")));
        let exchange = Arc::new(StaticExchange::new(positions));
        let engine = ReconciliationEngine::new(
            registry,
            snapshots,
            exchange.clone(),
            RecoverySettings::default(),
        );
        Harness {
            engine,
            exchange,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_no_snapshot_means_no_recovery() {
        let h = harness(vec![]);
        let (needed, info) = h.engine.check_recovery_needed().unwrap();
        assert!(!needed);

        let outcome = h.engine.execute_recovery(&info).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.final_state, RecoveryState::Done);
        assert!(outcome.action.is_none());
        assert_eq!(h.exchange.call_count(), 0);
    }

    #[tokio::test]
    async fn test_manual_stop_means_no_recovery() {
        let h = harness(vec![]);
        h.engine
            .snapshots()
            .save_running(OperationalPhase::SeekingEntry, vec![], None)
            .unwrap();
        h.engine.snapshots().mark_stopped_manually().unwrap();

        let (needed, info) = h.engine.check_recovery_needed().unwrap();
        assert!(!needed);
        assert!(info.reason.contains("manually"));
    }

    #[tokio::test]
    async fn test_transitions_follow_state_machine() {
        let h = harness(vec![ExchangePosition::new("BTCUSDT", Side::Long, 0.01, 65000.0)]);
        h.engine
            .snapshots()
            .save_running(OperationalPhase::SeekingEntry, vec![], None)
            .unwrap();

        let (_, info) = h.engine.check_recovery_needed().unwrap();
        let outcome = h.engine.execute_recovery(&info).await.unwrap();
        assert_eq!(
            outcome.transitions,
            vec![
                RecoveryState::Checking,
                RecoveryState::FetchingTruth,
                RecoveryState::Diffing,
                RecoveryState::ActionSelected,
                RecoveryState::Executing,
                RecoveryState::Done,
            ]
        );
        assert_eq!(outcome.action, Some(RecoveryAction::SwitchToManaging));
        assert_eq!(outcome.orphans_bound, 1);
        assert!(outcome.session_id.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_pass_is_rejected() {
        let h = harness(vec![]);
        let _held = h.engine.pass_guard.try_lock().unwrap();
        let (_, info) = h.engine.check_recovery_needed().unwrap();

        let err = h.engine.execute_recovery(&info).await.unwrap_err();
        assert!(matches!(err, TradeKeeperError::RecoveryInProgress));
        assert!(matches!(
            h.engine.periodic_sync().await.unwrap_err(),
            TradeKeeperError::RecoveryInProgress
        ));
    }

    #[tokio::test]
    async fn test_orphan_write_failure_resolves_to_manual_review() {
        let h = harness(vec![ExchangePosition::new("BTCUSDT", Side::Long, 1.0, 1.0)]);
        let ledger = h.engine.registry().ledger().clone();
        let session = ledger.start_session("BTCUSDT", "", 0.0).unwrap();
        h.engine.registry().bind_session(&session).await.unwrap();
        h.engine
            .snapshots()
            .save_running(OperationalPhase::SeekingEntry, vec![], Some(session.clone()))
            .unwrap();
        // the bound session is gone from under the registry: orphan writes fail
        ledger.end_session(&session, 0.0).unwrap();

        let (_, info) = h.engine.check_recovery_needed().unwrap();
        let outcome = h.engine.execute_recovery(&info).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.action, Some(RecoveryAction::ManualReviewNeeded));
        assert_eq!(outcome.phase, OperationalPhase::SeekingEntry);
        assert!(outcome.error.is_some());
        assert_eq!(ledger.count_trades(None).unwrap(), 0);
        assert_eq!(
            h.engine.snapshots().load().unwrap().unwrap().phase(),
            OperationalPhase::SeekingEntry
        );
    }

    #[tokio::test]
    async fn test_periodic_sync_binds_new_orphans() {
        let h = harness(vec![]);
        let ledger = h.engine.registry().ledger().clone();
        let session = ledger.start_session("MULTI", "", 0.0).unwrap();
        h.engine.registry().bind_session(&session).await.unwrap();

        h.exchange
            .set_positions(vec![ExchangePosition::new("ETHUSDT", Side::Short, 2.0, 3000.0)]);
        let sync = h.engine.periodic_sync().await.unwrap();
        assert_eq!(sync.created, 1);
        assert_eq!(ledger.count_trades(None).unwrap(), 1);

        h.exchange.fail_next("502");
        assert!(h.engine.periodic_sync().await.unwrap_err().is_recoverable());
        assert_eq!(h.engine.registry().len().await, 1);
    }
}
