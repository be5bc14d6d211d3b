/// Exchange merge: match live positions to known trades, adopt ledger rows,
/// create orphans for the rest and drop entries the exchange no longer reports.
/// A symbol and side never gets a second OPEN trade: a quantity that disagrees
/// with the one already held is flagged for review instead.
use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

use super::matching::{find_claimed_duplicate, find_loose_match, within_tolerance};
use super::state::{PositionRegistry, RegistryState};
use super::types::{EntryKey, SyncResult, TrackedPosition};
use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::logger::{self, LogTag};
use crate::types::{ExchangePosition, ExternalId, SessionScope, TradeOrigin};

impl PositionRegistry {
    /// Merge the exchange's open positions into the registry.
    ///
    /// A ledger read failure aborts the merge with an error. Positions matched,
    /// adopted or persisted earlier in the same merge stay in the map (each is
    /// backed by a durable row); no stale entry is dropped.
    ///
    /// A failed orphan or flag write, or a quantity conflict, is reported
    /// through `SyncResult::error`; the entry it concerned is left untouched
    /// and the rest of the merge proceeds.
    pub async fn sync_from_exchange(
        &self,
        positions: &[ExchangePosition],
    ) -> TradeKeeperResult<SyncResult> {
        let mut state = self.state.lock().await;
        let mut result = SyncResult::default();
        let mut claimed: HashSet<EntryKey> = HashSet::new();

        for position in positions {
            if !position.quantity.is_finite() || position.quantity <= 0.0 {
                logger::warning(
                    LogTag::Registry,
                    &format!(
                        "Ignoring exchange position {} {} with quantity {}",
                        position.symbol, position.side, position.quantity
                    ),
                );
                continue;
            }

            // 1. in-memory loose match
            if let Some(key) = find_loose_match(
                &state.entries,
                &claimed,
                &position.symbol,
                position.side,
                position.quantity,
                self.tolerance_fraction,
            ) {
                if let Some(entry) = state.entries.get_mut(&key) {
                    entry.recovered = true;
                }
                claimed.insert(key);
                result.matched += 1;
                logger::debug(
                    LogTag::Registry,
                    &format!(
                        "Matched {} {} qty={} to {}",
                        position.symbol, position.side, position.quantity, key
                    ),
                );
                continue;
            }

            // 2. ledger lookup across every session
            if let Some(key) = self.adopt_from_ledger(&mut state, &claimed, position)? {
                claimed.insert(key);
                result.matched += 1;
                continue;
            }

            // 3/4. re-check for a position already handled in this merge
            if let Some(key) = find_claimed_duplicate(
                &state.entries,
                &claimed,
                &position.symbol,
                position.side,
                position.quantity,
                self.tolerance_fraction,
            ) {
                result.duplicates += 1;
                logger::warning(
                    LogTag::Registry,
                    &format!(
                        "Exchange reported {} {} qty={} twice, already handled as {}",
                        position.symbol, position.side, position.quantity, key
                    ),
                );
                continue;
            }

            // 5. same symbol and side already open with another quantity
            if let Some(key) = self.claim_conflicting(&mut state, &claimed, position, &mut result)? {
                claimed.insert(key);
                result.mismatched += 1;
                continue;
            }

            match self.create_orphan(&mut state, position) {
                Ok(key) => {
                    claimed.insert(key);
                    result.created += 1;
                }
                Err(e) => {
                    logger::error(
                        LogTag::Registry,
                        &format!(
                            "Failed to persist orphan {} {} qty={}: {}",
                            position.symbol, position.side, position.quantity, e
                        ),
                    );
                    result.record_error(format!(
                        "orphan {} {}: {}",
                        position.symbol, position.side, e
                    ));
                }
            }
        }

        self.drop_stale(&mut state, &claimed, &mut result);

        logger::info(
            LogTag::Registry,
            &format!(
                "Exchange sync: {} position(s), matched={} created={} stale={} duplicates={} mismatched={}{}",
                positions.len(),
                result.matched,
                result.created,
                result.stale,
                result.duplicates,
                result.mismatched,
                result
                    .error
                    .as_ref()
                    .map(|e| format!(" error={}", e))
                    .unwrap_or_default()
            ),
        );
        Ok(result)
    }

    fn adopt_from_ledger(
        &self,
        state: &mut RegistryState,
        claimed: &HashSet<EntryKey>,
        position: &ExchangePosition,
    ) -> TradeKeeperResult<Option<EntryKey>> {
        let candidates =
            self.ledger
                .open_trades_for(&position.symbol, position.side, &SessionScope::AnySession)?;

        // newest first; rows already tracked were rejected by the memory match
        let Some(trade) = candidates.iter().find(|trade| {
            let key = EntryKey::Trade(trade.internal_id);
            !claimed.contains(&key)
                && !state.entries.contains_key(&key)
                && within_tolerance(trade.quantity, position.quantity, self.tolerance_fraction)
        }) else {
            return Ok(None);
        };

        let mut entry = TrackedPosition::from_trade(trade);
        entry.recovered = true;
        let key = entry.key;
        state.entries.insert(key, entry);

        logger::info(
            LogTag::Registry,
            &format!(
                "Adopted ledger trade #{} ({} {} qty={}) from session {}",
                trade.internal_id, trade.symbol, trade.side, trade.quantity, trade.session_id
            ),
        );
        Ok(Some(key))
    }

    /// Find the position already open for this symbol and side, in memory
    /// first and then in the ledger. The conflict is flagged for review and
    /// the existing entry is kept so the merge does not report it stale.
    fn claim_conflicting(
        &self,
        state: &mut RegistryState,
        claimed: &HashSet<EntryKey>,
        position: &ExchangePosition,
        result: &mut SyncResult,
    ) -> TradeKeeperResult<Option<EntryKey>> {
        let in_memory = state
            .entries
            .values()
            .filter(|entry| entry.symbol == position.symbol && entry.side == position.side)
            .min_by_key(|entry| claimed.contains(&entry.key))
            .map(|entry| (entry.key, entry.internal_id, entry.quantity));

        let (key, internal_id, held_qty) = match in_memory {
            Some(found) => found,
            None => {
                let candidates = self.ledger.open_trades_for(
                    &position.symbol,
                    position.side,
                    &SessionScope::AnySession,
                )?;
                let Some(trade) = candidates.first() else {
                    return Ok(None);
                };
                let mut entry = TrackedPosition::from_trade(trade);
                entry.recovered = true;
                let key = entry.key;
                state.entries.insert(key, entry);
                (key, Some(trade.internal_id), trade.quantity)
            }
        };

        let reason = format!(
            "exchange reports qty {} but {} is open with qty {}",
            position.quantity, key, held_qty
        );
        logger::warning(
            LogTag::Registry,
            &format!(
                "{} {}: {}, flagged for review",
                position.symbol, position.side, reason
            ),
        );

        if let Some(id) = internal_id {
            if let Err(e) = self.ledger.flag_for_review(id, &reason) {
                logger::error(
                    LogTag::Registry,
                    &format!("Failed to flag trade #{} for review: {}", id, e),
                );
            }
        }
        let conflict = TradeKeeperError::PositionAlreadyOpen {
            symbol: position.symbol.clone(),
            side: position.side,
        };
        result.record_error(format!("{} ({})", conflict, reason));
        Ok(Some(key))
    }

    fn create_orphan(
        &self,
        state: &mut RegistryState,
        position: &ExchangePosition,
    ) -> TradeKeeperResult<EntryKey> {
        let external_id = ExternalId::synthetic();

        let entry = match state.session_id.clone() {
            Some(session_id) => {
                let internal_id = self.ledger.record_trade(
                    &session_id,
                    &position.symbol,
                    position.side,
                    position.avg_price,
                    position.quantity,
                    TradeOrigin::RecoveryOrphan,
                    &external_id,
                    None,
                )?;
                TrackedPosition {
                    key: EntryKey::Trade(internal_id),
                    internal_id: Some(internal_id),
                    external_id: Some(external_id),
                    broker_order_id: None,
                    session_id: Some(session_id),
                    symbol: position.symbol.clone(),
                    side: position.side,
                    quantity: position.quantity,
                    entry_price: position.avg_price,
                    entry_time: Utc::now(),
                    origin: TradeOrigin::RecoveryOrphan,
                    recovered: true,
                    needs_session: false,
                    opened_locally_at: None,
                }
            }
            None => TrackedPosition {
                key: EntryKey::Pending(Uuid::new_v4()),
                internal_id: None,
                external_id: Some(external_id),
                broker_order_id: None,
                session_id: None,
                symbol: position.symbol.clone(),
                side: position.side,
                quantity: position.quantity,
                entry_price: position.avg_price,
                entry_time: Utc::now(),
                origin: TradeOrigin::RecoveryOrphan,
                recovered: true,
                needs_session: true,
                opened_locally_at: None,
            },
        };

        logger::warning(
            LogTag::Registry,
            &format!(
                "Orphan position {} {} qty={} @ {} registered as {}{}",
                entry.symbol,
                entry.side,
                entry.quantity,
                entry.entry_price,
                entry.key,
                if entry.needs_session {
                    " (waiting for session)"
                } else {
                    ""
                }
            ),
        );

        let key = entry.key;
        state.entries.insert(key, entry);
        Ok(key)
    }

    /// Remove entries the exchange did not report. Ledger rows stay OPEN and
    /// are flagged for review; recent local opens are kept.
    fn drop_stale(
        &self,
        state: &mut RegistryState,
        claimed: &HashSet<EntryKey>,
        result: &mut SyncResult,
    ) {
        let stale: Vec<EntryKey> = state
            .entries
            .values()
            .filter(|entry| !claimed.contains(&entry.key))
            .filter(|entry| {
                entry
                    .opened_locally_at
                    .map(|at| at.elapsed() >= self.local_open_grace)
                    .unwrap_or(true)
            })
            .map(|entry| entry.key)
            .collect();

        for key in stale {
            let Some(entry) = state.entries.remove(&key) else {
                continue;
            };
            result.stale += 1;

            let Some(internal_id) = entry.internal_id else {
                logger::info(
                    LogTag::Registry,
                    &format!(
                        "Unbound orphan {} {} no longer on exchange, dropped",
                        entry.symbol, entry.side
                    ),
                );
                continue;
            };

            let reason = format!(
                "absent from exchange at {} (last qty {})",
                Utc::now().to_rfc3339(),
                entry.quantity
            );
            if let Err(e) = self.ledger.flag_for_review(internal_id, &reason) {
                logger::error(
                    LogTag::Registry,
                    &format!("Failed to flag trade #{} for review: {}", internal_id, e),
                );
                result.record_error(format!("flag trade #{}: {}", internal_id, e));
            }
        }
    }
}
