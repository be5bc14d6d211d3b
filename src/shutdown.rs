use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::logger::{self, LogTag};
use crate::snapshot::StateSnapshotStore;
use crate::worker::LAST_KNOWN_TRADES;

// ═══════════════════════════════════════════════════════════════════════════════
// SHUTDOWN HANDLING
// ═══════════════════════════════════════════════════════════════════════════════
//
// Clean stop:  signal -> stop worker -> MarkStoppedManually -> flush logs
//              (skipped while a reconciliation pass is still owed)
// Panic:       hook -> MarkCrashed with the last heartbeat's trades (best effort)
// Hard kill:   nothing runs; the stale is_running=true snapshot is the signal
// ═══════════════════════════════════════════════════════════════════════════════

const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for SIGINT / SIGTERM (Ctrl+C on Windows)
pub async fn wait_for_shutdown_signal() -> Result<&'static str, String> {
    #[cfg(unix)]
    let signal_name = {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint =
            signal(SignalKind::interrupt()).map_err(|e| format!("Failed to bind SIGINT: {}", e))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| format!("Failed to bind SIGTERM: {}", e))?;

        tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        }
    };

    #[cfg(not(unix))]
    let signal_name = {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| format!("Failed to listen for shutdown signal: {}", e))?;
        "CTRL_C"
    };

    logger::warning(
        LogTag::Shutdown,
        &format!("Shutdown signal received ({})", signal_name),
    );
    Ok(signal_name)
}

/// Stop the worker and record the deliberate stop.
///
/// The stop is only recorded once the worker confirms no reconciliation pass
/// is owed; otherwise the snapshot is left for the next start to recover from.
pub async fn graceful_shutdown(
    snapshots: &StateSnapshotStore,
    worker_shutdown: &Notify,
    worker: Option<JoinHandle<bool>>,
) -> Result<(), String> {
    logger::info(LogTag::Shutdown, "Initiating graceful shutdown...");

    worker_shutdown.notify_one();
    let reconciled = match worker {
        None => true,
        Some(handle) => match tokio::time::timeout(WORKER_STOP_TIMEOUT, handle).await {
            Ok(Ok(reconciled)) => {
                logger::debug(LogTag::Shutdown, "Worker stopped");
                reconciled
            }
            Ok(Err(e)) => {
                logger::warning(
                    LogTag::Shutdown,
                    &format!("Worker task ended abnormally: {}", e),
                );
                false
            }
            Err(_) => {
                logger::warning(
                    LogTag::Shutdown,
                    &format!("Worker did not stop within {:?}", WORKER_STOP_TIMEOUT),
                );
                false
            }
        },
    };

    if !reconciled {
        logger::warning(
            LogTag::Shutdown,
            "Recovery still pending, leaving snapshot for the next start",
        );
        logger::flush();
        return Ok(());
    }

    let result = snapshots
        .mark_stopped_manually()
        .map_err(|e| format!("Failed to record manual stop: {}", e));

    match &result {
        Ok(()) => logger::info(LogTag::Shutdown, "Shutdown complete"),
        Err(e) => logger::error(LogTag::Shutdown, e),
    }
    logger::flush();
    result
}

/// Chain a panic hook that flags the snapshot for crash recovery.
/// The previous hook still runs afterwards.
pub fn install_panic_hook(snapshots: Arc<StateSnapshotStore>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        // try_lock: the panic may have happened while the heartbeat held it.
        // Without a heartbeat the snapshot on disk already forces recovery.
        let trades = LAST_KNOWN_TRADES.try_lock().and_then(|guard| guard.clone());
        let Some(trades) = trades else {
            logger::error(LogTag::Shutdown, "Panic before first heartbeat, snapshot left as is");
            logger::flush();
            previous(info);
            return;
        };

        match snapshots.mark_crashed(&trades) {
            Ok(()) => logger::error(
                LogTag::Shutdown,
                &format!("Panic: crash marker written ({} trade(s))", trades.len()),
            ),
            Err(e) => logger::error(
                LogTag::Shutdown,
                &format!("Panic: failed to write crash marker: {}", e),
            ),
        }
        logger::flush();
        previous(info);
    }));
}
