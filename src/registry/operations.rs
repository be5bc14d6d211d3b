/// Strategy-facing open/close operations
use chrono::Utc;
use std::time::Instant;

use super::state::PositionRegistry;
use super::types::{CloseTarget, EntryKey, TrackedPosition};
use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::logger::{self, LogTag};
use crate::types::{ExternalId, SessionScope, Side, TradeId, TradeOrigin};

impl PositionRegistry {
    /// Record a position the strategy has already placed on the exchange
    pub async fn open(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        entry_price: f64,
    ) -> TradeKeeperResult<TradeId> {
        let mut state = self.state.lock().await;

        let session_id = state
            .session_id
            .clone()
            .ok_or(TradeKeeperError::NoActiveSession)?;

        if state
            .entries
            .values()
            .any(|entry| entry.symbol == symbol && entry.side == side)
        {
            return Err(TradeKeeperError::PositionAlreadyOpen {
                symbol: symbol.to_string(),
                side,
            });
        }

        let external_id = ExternalId::synthetic();
        let internal_id = self.ledger.record_trade(
            &session_id,
            symbol,
            side,
            entry_price,
            quantity,
            TradeOrigin::Normal,
            &external_id,
            None,
        )?;

        let key = EntryKey::Trade(internal_id);
        state.entries.insert(
            key,
            TrackedPosition {
                key,
                internal_id: Some(internal_id),
                external_id: Some(external_id),
                broker_order_id: None,
                session_id: Some(session_id),
                symbol: symbol.to_string(),
                side,
                quantity,
                entry_price,
                entry_time: Utc::now(),
                origin: TradeOrigin::Normal,
                recovered: false,
                needs_session: false,
                opened_locally_at: Some(Instant::now()),
            },
        );

        logger::info(
            LogTag::Registry,
            &format!(
                "Opened {} {} qty={} @ {} as trade #{}",
                symbol, side, quantity, entry_price, internal_id
            ),
        );
        Ok(internal_id)
    }

    /// Close a trade by id or by (symbol, side). Falls back to the ledger when
    /// the trade has not been loaded into memory.
    pub async fn close(
        &self,
        target: CloseTarget,
        exit_price: f64,
        fee: f64,
    ) -> TradeKeeperResult<f64> {
        let mut state = self.state.lock().await;

        let internal_id = match &target {
            CloseTarget::Id(id) => *id,
            CloseTarget::Position { symbol, side } => {
                let in_memory = state
                    .entries
                    .values()
                    .filter(|entry| &entry.symbol == symbol && entry.side == *side)
                    .max_by_key(|entry| entry.entry_time)
                    .cloned();

                match in_memory {
                    Some(entry) => entry.internal_id.ok_or_else(|| {
                        TradeKeeperError::UnknownTrade(format!(
                            "{} {} (orphan not yet persisted)",
                            symbol, side
                        ))
                    })?,
                    None => {
                        let scope = SessionScope::from_option(state.session_id.as_ref());
                        let found = match self.ledger.find_open_trade(symbol, *side, &scope)? {
                            Some(id) => Some(id),
                            None if scope != SessionScope::AnySession => self
                                .ledger
                                .find_open_trade(symbol, *side, &SessionScope::AnySession)?,
                            None => None,
                        };
                        found.ok_or_else(|| {
                            TradeKeeperError::UnknownTrade(format!("{} {}", symbol, side))
                        })?
                    }
                }
            }
        };

        let pnl = self.ledger.close_trade(internal_id, exit_price, fee)?;
        state.entries.remove(&EntryKey::Trade(internal_id));

        logger::info(
            LogTag::Registry,
            &format!("Closed {} (trade #{}) pnl={:.6}", target, internal_id, pnl),
        );
        Ok(pnl)
    }

    /// Store the broker's order id for a trade once the exchange confirms it
    pub async fn attach_broker_order_id(
        &self,
        internal_id: TradeId,
        broker_order_id: &str,
    ) -> TradeKeeperResult<()> {
        let mut state = self.state.lock().await;
        self.ledger
            .update_broker_order_id(internal_id, broker_order_id)?;

        if let Some(entry) = state.entries.get_mut(&EntryKey::Trade(internal_id)) {
            entry.broker_order_id = Some(broker_order_id.to_string());
        }
        Ok(())
    }
}
