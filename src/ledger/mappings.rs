/// Internal <-> external trade identifier mapping
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::db::{format_time, parse_text, parse_time, TradeLedger};
use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::logger::{self, LogTag};
use crate::types::{ExternalId, IdentifierMapping, Side, TradeId};

const MAPPING_COLUMNS: &str =
    "internal_trade_id, external_trade_id, bybit_order_id, symbol, side, created_at";

fn row_to_mapping(row: &Row) -> rusqlite::Result<IdentifierMapping> {
    Ok(IdentifierMapping {
        internal_id: TradeId(row.get(0)?),
        external_id: ExternalId(row.get(1)?),
        broker_order_id: row.get(2)?,
        symbol: row.get(3)?,
        side: parse_text::<Side>(row, 4)?,
        created_at: parse_time(row, 5)?,
    })
}

/// Insert the mapping row and mirror the ids onto the trade row.
/// Runs inside the caller's transaction.
pub(super) fn insert_mapping(
    conn: &Connection,
    internal_id: TradeId,
    external_id: &ExternalId,
    broker_order_id: Option<&str>,
    symbol: &str,
    side: Side,
) -> TradeKeeperResult<()> {
    conn.execute(
        r#"
        INSERT INTO trade_id_mapping (
            internal_trade_id, external_trade_id, bybit_order_id, symbol, side, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            internal_id.0,
            external_id.as_str(),
            broker_order_id,
            symbol,
            side.as_str(),
            format_time(&Utc::now())
        ],
    )?;

    conn.execute(
        "UPDATE trades SET external_trade_id = ?2, bybit_order_id = COALESCE(?3, bybit_order_id),
             updated_at = datetime('now')
         WHERE id = ?1",
        params![internal_id.0, external_id.as_str(), broker_order_id],
    )?;
    Ok(())
}

impl TradeLedger {
    /// Map an existing trade to its external identifier
    pub fn add_mapping(
        &self,
        internal_id: TradeId,
        external_id: &ExternalId,
        broker_order_id: Option<&str>,
        symbol: &str,
        side: Side,
    ) -> TradeKeeperResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM trades WHERE id = ?1",
                params![internal_id.0],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(TradeKeeperError::unknown_trade(internal_id));
        }

        insert_mapping(&tx, internal_id, external_id, broker_order_id, symbol, side)?;
        tx.commit()?;

        logger::debug(
            LogTag::Ledger,
            &format!("Mapped trade #{} <-> {}", internal_id, external_id),
        );
        Ok(())
    }

    pub fn resolve_internal(&self, external_id: &ExternalId) -> TradeKeeperResult<Option<TradeId>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                "SELECT internal_trade_id FROM trade_id_mapping WHERE external_trade_id = ?1",
                params![external_id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id.map(TradeId))
    }

    pub fn resolve_external(&self, internal_id: TradeId) -> TradeKeeperResult<Option<ExternalId>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                "SELECT external_trade_id FROM trade_id_mapping WHERE internal_trade_id = ?1",
                params![internal_id.0],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id.map(ExternalId))
    }

    /// Record the broker's order id once it becomes known
    pub fn update_broker_order_id(
        &self,
        internal_id: TradeId,
        broker_order_id: &str,
    ) -> TradeKeeperResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE trades SET bybit_order_id = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![internal_id.0, broker_order_id],
        )?;
        if updated == 0 {
            return Err(TradeKeeperError::unknown_trade(internal_id));
        }
        tx.execute(
            "UPDATE trade_id_mapping SET bybit_order_id = ?2 WHERE internal_trade_id = ?1",
            params![internal_id.0, broker_order_id],
        )?;
        tx.commit()?;

        logger::debug(
            LogTag::Ledger,
            &format!("Trade #{} broker order id -> {}", internal_id, broker_order_id),
        );
        Ok(())
    }

    pub fn get_mapping(&self, internal_id: TradeId) -> TradeKeeperResult<Option<IdentifierMapping>> {
        let conn = self.conn.lock();
        let mapping = conn
            .query_row(
                &format!(
                    "SELECT {} FROM trade_id_mapping WHERE internal_trade_id = ?1",
                    MAPPING_COLUMNS
                ),
                params![internal_id.0],
                row_to_mapping,
            )
            .optional()?;
        Ok(mapping)
    }

    pub fn list_mappings(&self, limit: usize) -> TradeKeeperResult<Vec<IdentifierMapping>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM trade_id_mapping ORDER BY id DESC LIMIT ?1",
            MAPPING_COLUMNS
        ))?;
        let mappings = stmt
            .query_map(params![limit as i64], row_to_mapping)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeOrigin;

    #[test]
    fn test_record_trade_creates_mapping() {
        let ledger = TradeLedger::open_in_memory().unwrap();
        let session = ledger.start_session("BTCUSDT", "", 1.0).unwrap();
        let external = ExternalId::synthetic();

        let id = ledger
            .record_trade(
                &session,
                "BTCUSDT",
                Side::Short,
                100.0,
                1.0,
                TradeOrigin::RecoveryOrphan,
                &external,
                None,
            )
            .unwrap();

        assert_eq!(ledger.resolve_internal(&external).unwrap(), Some(id));
        assert_eq!(ledger.resolve_external(id).unwrap(), Some(external.clone()));

        let trade = ledger.get_trade(id).unwrap().unwrap();
        assert_eq!(trade.external_id, Some(external));
        assert_eq!(trade.origin, TradeOrigin::RecoveryOrphan);
    }

    #[test]
    fn test_duplicate_external_id_rejected() {
        let ledger = TradeLedger::open_in_memory().unwrap();
        let session = ledger.start_session("BTCUSDT", "", 1.0).unwrap();
        let external = ExternalId::from("ORDER-1");

        ledger
            .record_trade(&session, "BTCUSDT", Side::Long, 1.0, 1.0, TradeOrigin::Normal, &external, None)
            .unwrap();
        let err = ledger
            .record_trade(&session, "BTCUSDT", Side::Long, 1.0, 1.0, TradeOrigin::Normal, &external, None)
            .unwrap_err();
        assert!(err.is_persistence());
        // the failed transaction left no trade behind
        assert_eq!(ledger.count_trades(None).unwrap(), 1);
    }

    #[test]
    fn test_update_broker_order_id() {
        let ledger = TradeLedger::open_in_memory().unwrap();
        let session = ledger.start_session("BTCUSDT", "", 1.0).unwrap();
        let id = ledger
            .add_trade(&session, "BTCUSDT", Side::Long, 1.0, 1.0, TradeOrigin::Normal)
            .unwrap();
        ledger
            .add_mapping(id, &ExternalId::synthetic(), None, "BTCUSDT", Side::Long)
            .unwrap();

        ledger.update_broker_order_id(id, "bybit-42").unwrap();
        assert_eq!(
            ledger.get_trade(id).unwrap().unwrap().broker_order_id.as_deref(),
            Some("bybit-42")
        );
        assert_eq!(
            ledger.get_mapping(id).unwrap().unwrap().broker_order_id.as_deref(),
            Some("bybit-42")
        );
        assert!(ledger.update_broker_order_id(TradeId(77), "x").is_err());
        assert_eq!(ledger.list_mappings(10).unwrap().len(), 1);
    }
}
