use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::types::{EntryKey, TrackedPosition};
use crate::config::RegistryConfig;
use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::ledger::TradeLedger;
use crate::logger::{self, LogTag};
use crate::snapshot::SnapshotTrade;
use crate::types::{SessionId, SessionScope, TradeOrigin};

pub(super) struct RegistryState {
    pub(super) entries: HashMap<EntryKey, TrackedPosition>,
    pub(super) session_id: Option<SessionId>,
}

/// Mutation-serialized view of the open positions.
///
/// Every mutating operation holds the map lock across its ledger write and
/// only touches the map after the write succeeded. Ledger calls are blocking
/// SQLite transactions run inline under that lock, so other registry callers
/// wait for the write as well as for the map.
pub struct PositionRegistry {
    pub(super) ledger: Arc<TradeLedger>,
    pub(super) state: Mutex<RegistryState>,
    pub(super) tolerance_fraction: f64,
    pub(super) local_open_grace: Duration,
}

impl PositionRegistry {
    pub fn new(ledger: Arc<TradeLedger>, config: &RegistryConfig) -> Self {
        Self {
            ledger,
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                session_id: None,
            }),
            tolerance_fraction: config.tolerance_fraction(),
            local_open_grace: Duration::from_secs(config.local_open_grace_secs),
        }
    }

    pub fn ledger(&self) -> &Arc<TradeLedger> {
        &self.ledger
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.state.lock().await.session_id.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current open set, oldest first
    pub async fn snapshot(&self) -> Vec<TrackedPosition> {
        let state = self.state.lock().await;
        let mut positions: Vec<TrackedPosition> = state.entries.values().cloned().collect();
        positions.sort_by(|a, b| {
            a.entry_time
                .cmp(&b.entry_time)
                .then_with(|| a.internal_id.cmp(&b.internal_id))
        });
        positions
    }

    pub async fn snapshot_trades(&self) -> Vec<SnapshotTrade> {
        self.snapshot()
            .await
            .iter()
            .map(TrackedPosition::to_snapshot_trade)
            .collect()
    }

    pub async fn pending_orphan_count(&self) -> usize {
        self.state
            .lock()
            .await
            .entries
            .values()
            .filter(|entry| entry.needs_session)
            .count()
    }

    /// Attach the registry to an ACTIVE session and persist every orphan that
    /// was waiting for one. Returns the number of orphans bound.
    ///
    /// Fails with `PositionAlreadyOpen` rather than open a second trade for a
    /// symbol and side; that orphan and the ones after it stay pending.
    pub async fn bind_session(&self, session_id: &SessionId) -> TradeKeeperResult<usize> {
        let mut state = self.state.lock().await;

        if !self.ledger.is_session_active(session_id)? {
            return Err(TradeKeeperError::InvalidSession {
                session_id: session_id.clone(),
            });
        }

        if state.session_id.as_ref() != Some(session_id) {
            logger::info(
                LogTag::Registry,
                &format!("Bound to session {}", session_id),
            );
        }
        state.session_id = Some(session_id.clone());

        let mut pending: Vec<EntryKey> = state
            .entries
            .values()
            .filter(|entry| entry.needs_session)
            .map(|entry| entry.key)
            .collect();
        pending.sort_by_key(|key| state.entries.get(key).map(|e| e.entry_time));

        let mut bound = 0;
        for key in pending {
            let Some(entry) = state.entries.get(&key).cloned() else {
                continue;
            };
            let external_id = entry
                .external_id
                .clone()
                .unwrap_or_else(crate::types::ExternalId::synthetic);

            if let Some(existing) =
                self.ledger
                    .find_open_trade(&entry.symbol, entry.side, &SessionScope::AnySession)?
            {
                logger::error(
                    LogTag::Registry,
                    &format!(
                        "Orphan {} {} not persisted, trade #{} is already open",
                        entry.symbol, entry.side, existing
                    ),
                );
                return Err(TradeKeeperError::PositionAlreadyOpen {
                    symbol: entry.symbol,
                    side: entry.side,
                });
            }

            // the entry keeps its pending key if the write fails
            let internal_id = self.ledger.record_trade(
                session_id,
                &entry.symbol,
                entry.side,
                entry.entry_price,
                entry.quantity,
                TradeOrigin::RecoveryOrphan,
                &external_id,
                entry.broker_order_id.as_deref(),
            )?;

            logger::info(
                LogTag::Registry,
                &format!(
                    "Orphan {} {} qty={} persisted as trade #{}",
                    entry.symbol, entry.side, entry.quantity, internal_id
                ),
            );

            state.entries.remove(&key);
            let new_key = EntryKey::Trade(internal_id);
            state.entries.insert(
                new_key,
                TrackedPosition {
                    key: new_key,
                    internal_id: Some(internal_id),
                    external_id: Some(external_id),
                    session_id: Some(session_id.clone()),
                    needs_session: false,
                    ..entry
                },
            );
            bound += 1;
        }

        Ok(bound)
    }

    /// Replace the in-memory map with the ledger's OPEN trades.
    /// Runs before any exchange merge so known trades are never taken for orphans.
    pub async fn sync_from_ledger(&self, scope: &SessionScope) -> TradeKeeperResult<usize> {
        let mut state = self.state.lock().await;
        let trades = self.ledger.list_open_trades(scope)?;

        let mut entries = HashMap::with_capacity(trades.len());
        for trade in &trades {
            let mut entry = TrackedPosition::from_trade(trade);
            if let Some(previous) = state.entries.get(&entry.key) {
                entry.opened_locally_at = previous.opened_locally_at;
                entry.recovered = previous.recovered;
            }
            entries.insert(entry.key, entry);
        }

        let dropped_pending = state.entries.values().filter(|e| e.is_pending()).count();
        if dropped_pending > 0 {
            logger::debug(
                LogTag::Registry,
                &format!(
                    "Discarding {} unbound orphan(s); the next exchange sync rediscovers them",
                    dropped_pending
                ),
            );
        }
        state.entries = entries;

        logger::info(
            LogTag::Registry,
            &format!("Loaded {} open trade(s) from ledger", trades.len()),
        );
        Ok(trades.len())
    }
}
