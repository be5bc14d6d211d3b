/// Background worker: periodic exchange sync and snapshot heartbeat
///
/// Exchange failures are logged and retried on the next tick; they never
/// empty the registry. After a FAILED startup pass the sync tick re-runs the
/// full reconciliation pass instead, and no heartbeat is written until one
/// completes.
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::logger::{self, LogTag};
use crate::recovery::{self, ReconciliationEngine};
use crate::snapshot::SnapshotTrade;
use crate::types::OperationalPhase;

/// Open set written by the last heartbeat. Read by the panic hook, which
/// cannot wait on the registry lock. None until the first heartbeat.
pub static LAST_KNOWN_TRADES: once_cell::sync::Lazy<SyncMutex<Option<Vec<SnapshotTrade>>>> =
    once_cell::sync::Lazy::new(|| SyncMutex::new(None));

#[derive(Debug, Clone, Copy)]
pub struct WorkerIntervals {
    pub sync: Duration,
    pub heartbeat: Duration,
}

impl WorkerIntervals {
    pub fn from_config() -> Self {
        crate::config::with_config(|cfg| Self {
            sync: Duration::from_secs(cfg.recovery.periodic_sync_interval_secs),
            heartbeat: Duration::from_secs(cfg.snapshot.heartbeat_interval_secs),
        })
    }
}

/// Persist the registry's current open set as a running snapshot
pub async fn write_heartbeat(engine: &ReconciliationEngine) -> TradeKeeperResult<OperationalPhase> {
    let registry = engine.registry();
    let trades = registry.snapshot_trades().await;
    let phase = OperationalPhase::for_open_count(trades.len());
    let session_id = registry.session_id().await;

    *LAST_KNOWN_TRADES.lock() = Some(trades.clone());
    engine.snapshots().save_running(phase, trades, session_id)?;
    Ok(phase)
}

/// Spawn the worker. With `recovery_pending` the sync tick retries the
/// reconciliation pass until one succeeds.
///
/// The task resolves to `true` once no recovery is outstanding, `false` if it
/// was stopped while a pass was still owed.
pub fn start_background_worker(
    engine: Arc<ReconciliationEngine>,
    shutdown: Arc<Notify>,
    intervals: WorkerIntervals,
    recovery_pending: bool,
) -> JoinHandle<bool> {
    tokio::spawn(worker_loop(engine, shutdown, intervals, recovery_pending))
}

/// One retry of the startup pass. Returns true when the pass succeeded.
async fn retry_recovery(engine: &ReconciliationEngine) -> bool {
    let mut info = match engine.check_recovery_needed() {
        Ok((_, info)) => info,
        Err(e) => {
            logger::warning(
                LogTag::Worker,
                &format!("Recovery check failed, retrying next tick: {}", e),
            );
            return false;
        }
    };
    // the startup pass failed, so a pass is owed whatever the snapshot says now
    info.needed = true;

    match engine.execute_recovery(&info).await {
        Ok(outcome) if outcome.success => {
            logger::info(
                LogTag::Worker,
                &format!("Recovery completed on retry: {}", recovery::summarize(&outcome)),
            );
            true
        }
        Ok(outcome) => {
            logger::warning(
                LogTag::Worker,
                &format!("Recovery retry failed: {}", recovery::summarize(&outcome)),
            );
            false
        }
        Err(e) => {
            logger::debug(LogTag::Worker, &format!("Recovery retry skipped: {}", e));
            false
        }
    }
}

async fn worker_loop(
    engine: Arc<ReconciliationEngine>,
    shutdown: Arc<Notify>,
    intervals: WorkerIntervals,
    mut recovery_pending: bool,
) -> bool {
    logger::info(
        LogTag::Worker,
        &format!(
            "Background worker started (sync every {:?}, heartbeat every {:?}{})",
            intervals.sync,
            intervals.heartbeat,
            if recovery_pending { ", recovery pending" } else { "" }
        ),
    );

    let mut sync_tick = interval(intervals.sync);
    let mut heartbeat_tick = interval(intervals.heartbeat);
    sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // both intervals fire immediately; startup has just synced or just failed
    sync_tick.tick().await;
    heartbeat_tick.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                logger::info(LogTag::Worker, "Stopping background worker");
                break;
            }
            _ = sync_tick.tick() => {
                if recovery_pending {
                    recovery_pending = !retry_recovery(&engine).await;
                    continue;
                }
                match engine.periodic_sync().await {
                    Ok(result) => {
                        if !result.is_clean() {
                            logger::warning(
                                LogTag::Worker,
                                &format!(
                                    "Periodic sync incomplete: {}",
                                    result.error.as_deref().unwrap_or("unknown")
                                ),
                            );
                        }
                        if result.created > 0 || result.stale > 0 {
                            if let Err(e) = write_heartbeat(&engine).await {
                                logger::error(
                                    LogTag::Worker,
                                    &format!("Snapshot write after sync failed: {}", e),
                                );
                            }
                        }
                    }
                    Err(TradeKeeperError::RecoveryInProgress) => {
                        logger::debug(LogTag::Worker, "Sync skipped, reconciliation pass running");
                    }
                    Err(e) => {
                        logger::warning(
                            LogTag::Worker,
                            &format!(
                                "Periodic sync failed, retrying in {:?}: {}",
                                intervals.sync, e
                            ),
                        );
                    }
                }
            }
            _ = heartbeat_tick.tick() => {
                if recovery_pending {
                    logger::debug(LogTag::Worker, "Heartbeat held until recovery completes");
                    continue;
                }
                match write_heartbeat(&engine).await {
                    Ok(phase) => logger::verbose(
                        LogTag::Worker,
                        &format!("Heartbeat written ({})", phase),
                    ),
                    Err(e) => logger::error(
                        LogTag::Worker,
                        &format!("Heartbeat snapshot failed: {}", e),
                    ),
                }
            }
        }
    }

    !recovery_pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::exchange::StaticExchange;
    use crate::ledger::TradeLedger;
    use crate::recovery::RecoverySettings;
    use crate::registry::PositionRegistry;
    use crate::snapshot::StateSnapshotStore;
    use crate::types::{ExchangePosition, Side};

    struct Fixture {
        ledger: Arc<TradeLedger>,
        registry: Arc<PositionRegistry>,
        snapshots: Arc<StateSnapshotStore>,
        engine: Arc<ReconciliationEngine>,
        _dir: tempfile::TempDir,
    }

    fn fixture(exchange: Arc<StaticExchange>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(TradeLedger::open_in_memory().unwrap());
        let registry = Arc::new(PositionRegistry::new(ledger.clone(), &RegistryConfig::default()));
        let snapshots = Arc::new(StateSnapshotStore::new(dir.path().join("state.json")));
        let engine = Arc::new(ReconciliationEngine::new(
            registry.clone(),
            snapshots.clone(),
            exchange,
            RecoverySettings::default(),
        ));
        Fixture {
            ledger,
            registry,
            snapshots,
            engine,
            _dir: dir,
        }
    }

    fn fast() -> WorkerIntervals {
        WorkerIntervals {
            sync: Duration::from_millis(20),
            heartbeat: Duration::from_millis(20),
        }
    }

    fn btc() -> ExchangePosition {
        ExchangePosition::new("BTCUSDT", Side::Long, 0.5, 60000.0)
    }

    async fn stop(shutdown: &Notify, handle: JoinHandle<bool>) -> bool {
        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_worker_syncs_and_stops_on_notify() {
        let exchange = Arc::new(StaticExchange::new(vec![btc()]));
        let fx = fixture(exchange.clone());
        let session = fx.ledger.start_session("MULTI", "", 0.0).unwrap();
        fx.registry.bind_session(&session).await.unwrap();

        let shutdown = Arc::new(Notify::new());
        let handle = start_background_worker(fx.engine.clone(), shutdown.clone(), fast(), false);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(stop(&shutdown, handle).await);

        assert!(exchange.call_count() >= 1);
        assert_eq!(fx.registry.len().await, 1);
        assert_eq!(fx.ledger.count_trades(None).unwrap(), 1);

        let snapshot = fx.snapshots.load().unwrap().unwrap();
        assert!(snapshot.is_running);
        assert_eq!(snapshot.phase(), OperationalPhase::ManagingPositions);
        assert_eq!(snapshot.session_id, Some(session));
    }

    #[tokio::test]
    async fn test_worker_retries_failed_startup_recovery() {
        let exchange = Arc::new(StaticExchange::new(vec![btc()]));
        exchange.fail_next("503 Service Unavailable");
        let fx = fixture(exchange.clone());
        fx.snapshots.mark_crashed(&[]).unwrap();

        let (_, info) = fx.engine.check_recovery_needed().unwrap();
        let startup = fx.engine.execute_recovery(&info).await.unwrap();
        assert_eq!(startup.final_state, crate::recovery::RecoveryState::Failed);

        let shutdown = Arc::new(Notify::new());
        let handle = start_background_worker(fx.engine.clone(), shutdown.clone(), fast(), true);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(stop(&shutdown, handle).await);

        assert!(exchange.call_count() >= 2);
        assert_eq!(fx.ledger.count_trades(None).unwrap(), 1);
        let snapshot = fx.snapshots.load().unwrap().unwrap();
        assert!(snapshot.is_running);
        assert!(!snapshot.crash_recovery_needed);
        assert_eq!(snapshot.phase(), OperationalPhase::ManagingPositions);
        assert_eq!(snapshot.active_trades.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_holds_heartbeat_while_exchange_stays_down() {
        let exchange = Arc::new(StaticExchange::new(vec![btc()]));
        for _ in 0..100 {
            exchange.fail_next("connection refused");
        }
        let fx = fixture(exchange.clone());
        fx.snapshots.mark_crashed(&[]).unwrap();
        let before = fx.snapshots.load().unwrap().unwrap();

        let shutdown = Arc::new(Notify::new());
        let handle = start_background_worker(fx.engine.clone(), shutdown.clone(), fast(), true);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!stop(&shutdown, handle).await);

        assert!(exchange.call_count() >= 1);
        assert_eq!(fx.snapshots.load().unwrap().unwrap(), before);
        assert_eq!(fx.ledger.count_trades(None).unwrap(), 0);
    }
}
