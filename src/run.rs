// Process wiring: build components from configuration and run the lifecycle

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::{
    exchange::{ExchangeClient, FileExchange},
    ledger::TradeLedger,
    logger::{self, LogTag},
    recovery::{self, ReconciliationEngine, RecoveryOutcome, RecoverySettings, RecoveryState},
    registry::PositionRegistry,
    shutdown,
    snapshot::StateSnapshotStore,
    types::SessionScope,
    worker::{self, WorkerIntervals},
};

/// Everything a running process or an operator command needs
pub struct Components {
    pub ledger: Arc<TradeLedger>,
    pub registry: Arc<PositionRegistry>,
    pub snapshots: Arc<StateSnapshotStore>,
    pub engine: Arc<ReconciliationEngine>,
}

impl Components {
    /// Build from the loaded configuration, with an explicit exchange
    pub fn with_exchange(exchange: Arc<dyn ExchangeClient>) -> Result<Self, String> {
        let config = crate::config::get_config_clone();

        let ledger_path = crate::paths::resolve_data_file(&config.ledger.database_file);
        let ledger = Arc::new(
            TradeLedger::open(
                &ledger_path,
                Duration::from_millis(config.ledger.busy_timeout_ms),
            )
            .map_err(|e| format!("Failed to open ledger {}: {}", ledger_path.display(), e))?,
        );

        let snapshots = Arc::new(StateSnapshotStore::new(crate::paths::resolve_data_file(
            &config.snapshot.file_name,
        )));
        let registry = Arc::new(PositionRegistry::new(ledger.clone(), &config.registry));
        let engine = Arc::new(ReconciliationEngine::new(
            registry.clone(),
            snapshots.clone(),
            exchange,
            RecoverySettings::from_config(&config.recovery),
        ));

        logger::debug(
            LogTag::System,
            &format!(
                "Components ready: ledger={} snapshot={}",
                ledger.database_path(),
                snapshots.path().display()
            ),
        );

        Ok(Self {
            ledger,
            registry,
            snapshots,
            engine,
        })
    }

    /// Build with the file-backed exchange named in `[exchange]`
    pub fn from_config() -> Result<Self, String> {
        let positions_file = crate::config::with_config(|cfg| cfg.exchange.positions_file.clone());
        let exchange: Arc<dyn ExchangeClient> = Arc::new(FileExchange::new(
            crate::paths::resolve_data_file(&positions_file),
        ));
        Self::with_exchange(exchange)
    }
}

/// Check the snapshot and run a reconciliation pass if the last run crashed.
/// Must complete before the strategy consumes any signal.
pub async fn run_startup_recovery(components: &Components) -> Result<RecoveryOutcome, String> {
    let (_, info) = components
        .engine
        .check_recovery_needed()
        .map_err(|e| format!("Recovery check failed: {}", e))?;

    let outcome = components
        .engine
        .execute_recovery(&info)
        .await
        .map_err(|e| format!("Recovery pass rejected: {}", e))?;

    let summary = recovery::summarize(&outcome);
    if outcome.success {
        logger::info(LogTag::Recovery, &summary);
    } else {
        logger::warning(LogTag::Recovery, &summary);
    }
    Ok(outcome)
}

async fn prepare_normal_start(
    components: &Components,
    outcome: &RecoveryOutcome,
) -> Result<(), String> {
    let saved_active = match &outcome.session_id {
        Some(id) => components
            .ledger
            .is_session_active(id)
            .map_err(|e| format!("Failed to read session {}: {}", id, e))?,
        None => false,
    };

    let session = match &outcome.session_id {
        Some(id) if saved_active => Some(id.clone()),
        _ => components
            .ledger
            .latest_active_session()
            .map_err(|e| format!("Failed to read sessions: {}", e))?
            .map(|s| s.session_id),
    };

    components
        .registry
        .sync_from_ledger(&SessionScope::from_option(session.as_ref()))
        .await
        .map_err(|e| format!("Failed to load open trades: {}", e))?;

    if let Some(id) = &session {
        components
            .registry
            .bind_session(id)
            .await
            .map_err(|e| format!("Failed to bind session {}: {}", id, e))?;
    }
    Ok(())
}

/// Act on the startup outcome. Returns true when a reconciliation pass is
/// still owed and the worker has to retry it.
///
/// A FAILED pass leaves the snapshot exactly as the crashed run wrote it: no
/// heartbeat goes out until a later pass succeeds.
pub async fn resume_after_recovery(
    components: &Components,
    outcome: &RecoveryOutcome,
) -> Result<bool, String> {
    if outcome.final_state == RecoveryState::Failed {
        logger::warning(
            LogTag::System,
            &format!(
                "Startup recovery failed ({}), holding snapshot until a retry succeeds",
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        );
        return Ok(true);
    }

    // no pass ran: load the ledger's view and announce the process is running
    if outcome.action.is_none() {
        prepare_normal_start(components, outcome).await?;
        worker::write_heartbeat(&components.engine)
            .await
            .map_err(|e| format!("Failed to write startup snapshot: {}", e))?;
    }
    Ok(false)
}

/// Full lifecycle: recovery, background worker, wait for signal, clean stop
pub async fn run_tradekeeper() -> Result<(), String> {
    crate::paths::ensure_all_directories()
        .map_err(|e| format!("Failed to create required directories: {}", e))?;

    logger::info(LogTag::System, "TradeKeeper starting up...");

    let components = Components::from_config()?;
    shutdown::install_panic_hook(components.snapshots.clone());

    let outcome = run_startup_recovery(&components).await?;
    logger::info(
        LogTag::System,
        &format!("Resuming in {}", outcome.phase),
    );

    let recovery_pending = resume_after_recovery(&components, &outcome).await?;

    let worker_shutdown = Arc::new(Notify::new());
    let worker_handle = worker::start_background_worker(
        components.engine.clone(),
        worker_shutdown.clone(),
        WorkerIntervals::from_config(),
        recovery_pending,
    );

    shutdown::wait_for_shutdown_signal().await?;
    shutdown::graceful_shutdown(&components.snapshots, &worker_shutdown, Some(worker_handle)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::exchange::StaticExchange;
    use crate::types::{ExchangePosition, ExternalId, OperationalPhase, Side, TradeOrigin};

    fn components(exchange: Arc<StaticExchange>, dir: &std::path::Path) -> Components {
        let ledger = Arc::new(TradeLedger::open_in_memory().unwrap());
        let registry = Arc::new(PositionRegistry::new(ledger.clone(), &RegistryConfig::default()));
        let snapshots = Arc::new(StateSnapshotStore::new(dir.join("state.json")));
        let engine = Arc::new(ReconciliationEngine::new(
            registry.clone(),
            snapshots.clone(),
            exchange,
            RecoverySettings::default(),
        ));
        Components {
            ledger,
            registry,
            snapshots,
            engine,
        }
    }

    #[tokio::test]
    async fn test_failed_startup_pass_leaves_snapshot_alone() {
        let dir = tempfile::tempdir().unwrap();
        let exchange = Arc::new(StaticExchange::new(vec![ExchangePosition::new(
            "BTCUSDT",
            Side::Long,
            0.5,
            60000.0,
        )]));
        exchange.fail_next("503 Service Unavailable");
        let components = components(exchange.clone(), dir.path());

        let session = components.ledger.start_session("BTCUSDT", "", 0.0).unwrap();
        let id = components
            .ledger
            .record_trade(
                &session,
                "BTCUSDT",
                Side::Long,
                60000.0,
                0.5,
                TradeOrigin::Normal,
                &ExternalId::from("ORDER-1"),
                None,
            )
            .unwrap();
        components.snapshots.mark_crashed(&[]).unwrap();
        let before = components.snapshots.load().unwrap().unwrap();
        assert_eq!(before.phase(), OperationalPhase::SeekingEntry);

        let outcome = run_startup_recovery(&components).await.unwrap();
        assert_eq!(outcome.final_state, RecoveryState::Failed);
        assert!(outcome.action.is_none());

        let pending = resume_after_recovery(&components, &outcome).await.unwrap();
        assert!(pending);
        assert_eq!(components.snapshots.load().unwrap().unwrap(), before);
        assert!(components.snapshots.should_auto_restart().unwrap());
        assert!(components.ledger.get_trade(id).unwrap().unwrap().is_open());
    }

    #[tokio::test]
    async fn test_clean_start_writes_running_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let components = components(Arc::new(StaticExchange::new(vec![])), dir.path());

        let session = components.ledger.start_session("BTCUSDT", "", 0.0).unwrap();
        components
            .ledger
            .record_trade(
                &session,
                "BTCUSDT",
                Side::Long,
                60000.0,
                0.5,
                TradeOrigin::Normal,
                &ExternalId::from("ORDER-1"),
                None,
            )
            .unwrap();
        components.snapshots.mark_stopped_manually().unwrap();

        let outcome = run_startup_recovery(&components).await.unwrap();
        assert_eq!(outcome.final_state, RecoveryState::Done);
        assert!(outcome.action.is_none());

        let pending = resume_after_recovery(&components, &outcome).await.unwrap();
        assert!(!pending);
        assert_eq!(components.registry.session_id().await, Some(session));

        let snapshot = components.snapshots.load().unwrap().unwrap();
        assert!(snapshot.is_running);
        assert!(!snapshot.stopped_manually);
        assert_eq!(snapshot.phase(), OperationalPhase::ManagingPositions);
        assert_eq!(snapshot.active_trades.len(), 1);
    }
}
