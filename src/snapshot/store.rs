/// File-backed snapshot store
///
/// Writes go to a temp file in the same directory, are fsynced, then renamed
/// over the target, so a reader only ever sees the old or the new document.
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::types::{SnapshotTrade, StateSnapshot};
use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::logger::{self, LogTag};
use crate::types::{OperationalPhase, SessionId};

#[derive(Debug, Clone)]
pub struct StateSnapshotStore {
    path: PathBuf,
}

impl StateSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically overwrite the persisted snapshot. `last_save_time` is written as given.
    pub fn save(&self, snapshot: &StateSnapshot) -> TradeKeeperResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| TradeKeeperError::persistence("create snapshot directory", e))?;

        let body = serde_json::to_vec_pretty(snapshot)?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|e| TradeKeeperError::persistence("create snapshot temp file", e))?;
        tmp.write_all(&body)
            .map_err(|e| TradeKeeperError::persistence("write snapshot", e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| TradeKeeperError::persistence("sync snapshot", e))?;
        tmp.persist(&self.path)
            .map_err(|e| TradeKeeperError::persistence("replace snapshot", e.error))?;

        logger::debug(
            LogTag::Snapshot,
            &format!(
                "Saved snapshot phase={} trades={} running={} manual_stop={} crash={}",
                snapshot.operational_phase,
                snapshot.active_trades.len(),
                snapshot.is_running,
                snapshot.stopped_manually,
                snapshot.crash_recovery_needed
            ),
        );
        Ok(())
    }

    /// Last durable snapshot, or None if the process has never saved one
    pub fn load(&self) -> TradeKeeperResult<Option<StateSnapshot>> {
        let body = match std::fs::read(&self.path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TradeKeeperError::persistence("read snapshot", e)),
        };

        let snapshot: StateSnapshot = serde_json::from_slice(&body)
            .map_err(|e| TradeKeeperError::persistence("parse snapshot", e))?;
        Ok(Some(snapshot))
    }

    /// Record a deliberate stop. Idempotent.
    pub fn mark_stopped_manually(&self) -> TradeKeeperResult<()> {
        let mut snapshot = self.load()?.unwrap_or_else(|| {
            StateSnapshot::new(OperationalPhase::SeekingEntry, Vec::new(), None)
        });

        snapshot.stopped_manually = true;
        snapshot.crash_recovery_needed = false;
        snapshot.is_running = false;
        snapshot.last_save_time = Utc::now();
        self.save(&snapshot)?;

        logger::info(LogTag::Snapshot, "Marked as stopped manually");
        Ok(())
    }

    /// Best-effort crash marker. Nothing may depend on this ever running.
    pub fn mark_crashed(&self, trades: &[SnapshotTrade]) -> TradeKeeperResult<()> {
        let session_id = self.load().ok().flatten().and_then(|s| s.session_id);

        let mut snapshot = StateSnapshot::new(
            OperationalPhase::for_open_count(trades.len()),
            trades.to_vec(),
            session_id,
        );
        snapshot.is_running = false;
        snapshot.crash_recovery_needed = true;
        self.save(&snapshot)?;

        logger::warning(
            LogTag::Snapshot,
            &format!("Marked as crashed with {} active trade(s)", trades.len()),
        );
        Ok(())
    }

    /// Heartbeat / transition write for a healthy running process
    pub fn save_running(
        &self,
        phase: OperationalPhase,
        trades: Vec<SnapshotTrade>,
        session_id: Option<SessionId>,
    ) -> TradeKeeperResult<()> {
        let mut snapshot = StateSnapshot::new(phase, trades, session_id);
        snapshot.is_running = true;
        self.save(&snapshot)
    }

    pub fn should_auto_restart(&self) -> TradeKeeperResult<bool> {
        Ok(self
            .load()?
            .map(|snapshot| snapshot.should_auto_restart())
            .unwrap_or(false))
    }
}
