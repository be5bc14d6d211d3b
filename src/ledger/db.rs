/// Durable trade ledger backed by SQLite
///
/// The ledger is the single source of historical truth and the only component
/// allowed to declare a trade CLOSED. Every write is committed (with
/// `synchronous=FULL` on file databases) before the call returns.
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::schema::*;
use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::logger::{self, LogTag};
use crate::types::{
    realized_pnl, ExternalId, SessionId, SessionScope, Side, Trade, TradeId, TradeOrigin,
    TradeStatus,
};

/// Counters for operator output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_trades: u64,
    pub open_trades: u64,
    pub closed_trades: u64,
    pub orphan_trades: u64,
    pub flagged_trades: u64,
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub schema_version: u32,
}

/// Durable trade store over one local SQLite file.
///
/// Every method is synchronous: it takes the connection lock and runs one
/// statement or transaction to completion. Called from async code this
/// blocks the calling worker thread for that long (WAL, local disk, bounded
/// by `busy_timeout`); callers keep the ledger off any path that must not
/// wait on disk.
pub struct TradeLedger {
    pub(super) conn: Mutex<Connection>,
    database_path: String,
}

impl TradeLedger {
    /// Open (or create) the ledger database file
    pub fn open(path: &Path, busy_timeout: Duration) -> TradeKeeperResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| TradeKeeperError::persistence("open ledger database", e))?;
        conn.busy_timeout(busy_timeout)?;

        Self::initialize(conn, path.to_string_lossy().to_string(), true)
    }

    /// Private in-memory ledger (tests, dry runs)
    pub fn open_in_memory() -> TradeKeeperResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, ":memory:".to_string(), false)
    }

    fn initialize(conn: Connection, database_path: String, file_backed: bool) -> TradeKeeperResult<Self> {
        if file_backed {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "FULL")?;
        }
        conn.pragma_update(None, "foreign_keys", true)?;

        conn.execute(SCHEMA_SESSIONS, [])?;
        conn.execute(SCHEMA_TRADES, [])?;
        conn.execute(SCHEMA_TRADE_ID_MAPPING, [])?;
        conn.execute(SCHEMA_LEDGER_METADATA, [])?;
        for index_sql in LEDGER_INDEXES {
            conn.execute(index_sql, [])?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO ledger_metadata (key, value) VALUES ('schema_version', ?1)",
            params![LEDGER_SCHEMA_VERSION.to_string()],
        )?;

        logger::debug(
            LogTag::Ledger,
            &format!("Ledger schema ready at {}", database_path),
        );

        Ok(Self {
            conn: Mutex::new(conn),
            database_path,
        })
    }

    pub fn database_path(&self) -> &str {
        &self.database_path
    }

    // =========================================================================
    // TRADES
    // =========================================================================

    /// Record a new OPEN trade under an ACTIVE session
    pub fn add_trade(
        &self,
        session_id: &SessionId,
        symbol: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        origin: TradeOrigin,
    ) -> TradeKeeperResult<TradeId> {
        validate_trade_input(symbol, entry_price, quantity)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        ensure_session_active(&tx, session_id)?;
        let id = insert_trade(&tx, session_id, symbol, side, entry_price, quantity, origin)?;
        tx.commit()?;

        logger::info(
            LogTag::Ledger,
            &format!(
                "Recorded trade #{} {} {} qty={} @ {} ({})",
                id,
                symbol,
                side,
                quantity,
                entry_price,
                origin.as_str()
            ),
        );
        Ok(id)
    }

    /// Record a new OPEN trade and its identifier mapping in one transaction,
    /// so a trade never exists without a mapping row
    pub fn record_trade(
        &self,
        session_id: &SessionId,
        symbol: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        origin: TradeOrigin,
        external_id: &ExternalId,
        broker_order_id: Option<&str>,
    ) -> TradeKeeperResult<TradeId> {
        validate_trade_input(symbol, entry_price, quantity)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        ensure_session_active(&tx, session_id)?;
        let id = insert_trade(&tx, session_id, symbol, side, entry_price, quantity, origin)?;
        super::mappings::insert_mapping(&tx, id, external_id, broker_order_id, symbol, side)?;
        tx.commit()?;

        logger::info(
            LogTag::Ledger,
            &format!(
                "Recorded trade #{} {} {} qty={} @ {} ({}, ext {})",
                id,
                symbol,
                side,
                quantity,
                entry_price,
                origin.as_str(),
                external_id
            ),
        );
        Ok(id)
    }

    /// Close an OPEN trade and return its realized pnl.
    /// Closing an already-closed trade returns the pnl recorded the first time.
    pub fn close_trade(&self, id: TradeId, exit_price: f64, fee: f64) -> TradeKeeperResult<f64> {
        if !exit_price.is_finite() || exit_price < 0.0 || !fee.is_finite() {
            return Err(TradeKeeperError::InvalidTrade(format!(
                "exit_price={} fee={}",
                exit_price, fee
            )));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let row = tx
            .query_row(
                "SELECT status, side, entry_price, quantity, realized_pnl FROM trades WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok((
                        parse_text::<TradeStatus>(row, 0)?,
                        parse_text::<Side>(row, 1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((status, side, entry_price, quantity, recorded_pnl)) = row else {
            return Err(TradeKeeperError::unknown_trade(id));
        };

        if status == TradeStatus::Closed {
            logger::debug(
                LogTag::Ledger,
                &format!("Trade #{} already closed, returning recorded pnl", id),
            );
            return Ok(recorded_pnl.unwrap_or(0.0));
        }

        let pnl = realized_pnl(side, entry_price, exit_price, quantity, fee);
        tx.execute(
            r#"
            UPDATE trades SET
                status = 'CLOSED', exit_price = ?2, exit_time = ?3, fee = ?4,
                realized_pnl = ?5, review_reason = NULL, updated_at = datetime('now')
            WHERE id = ?1 AND status = 'OPEN'
            "#,
            params![id.0, exit_price, format_time(&Utc::now()), fee, pnl],
        )?;
        tx.commit()?;

        logger::info(
            LogTag::Ledger,
            &format!("Closed trade #{} @ {} (pnl {:.6})", id, exit_price, pnl),
        );
        Ok(pnl)
    }

    pub fn get_trade(&self, id: TradeId) -> TradeKeeperResult<Option<Trade>> {
        let conn = self.conn.lock();
        let trade = conn
            .query_row(
                &format!("SELECT {} FROM trades WHERE id = ?1", TRADE_COLUMNS),
                params![id.0],
                row_to_trade,
            )
            .optional()?;
        Ok(trade)
    }

    /// Most recently opened OPEN trade for (symbol, side) in the scope
    pub fn find_open_trade(
        &self,
        symbol: &str,
        side: Side,
        scope: &SessionScope,
    ) -> TradeKeeperResult<Option<TradeId>> {
        Ok(self
            .open_trades_for(symbol, side, scope)?
            .first()
            .map(|trade| trade.internal_id))
    }

    /// All OPEN trades for (symbol, side) in the scope, newest first
    pub fn open_trades_for(
        &self,
        symbol: &str,
        side: Side,
        scope: &SessionScope,
    ) -> TradeKeeperResult<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM trades
             WHERE symbol = ?1 AND side = ?2 AND status = 'OPEN'
               AND (?3 IS NULL OR session_id = ?3)
             ORDER BY entry_time DESC, id DESC",
            TRADE_COLUMNS
        ))?;
        let trades = stmt
            .query_map(
                params![symbol, side.as_str(), scope_param(scope)],
                row_to_trade,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trades)
    }

    pub fn list_open_trades(&self, scope: &SessionScope) -> TradeKeeperResult<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM trades
             WHERE status = 'OPEN' AND (?1 IS NULL OR session_id = ?1)
             ORDER BY entry_time ASC, id ASC",
            TRADE_COLUMNS
        ))?;
        let trades = stmt
            .query_map(params![scope_param(scope)], row_to_trade)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trades)
    }

    /// Mark an OPEN trade as needing operator review. The trade stays OPEN.
    pub fn flag_for_review(&self, id: TradeId, reason: &str) -> TradeKeeperResult<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE trades SET review_reason = ?2, updated_at = datetime('now')
             WHERE id = ?1 AND status = 'OPEN'",
            params![id.0, reason],
        )?;
        if updated == 0 {
            return Err(TradeKeeperError::unknown_trade(id));
        }

        logger::warning(
            LogTag::Ledger,
            &format!("Trade #{} flagged for review: {}", id, reason),
        );
        Ok(())
    }

    pub fn list_flagged_trades(&self) -> TradeKeeperResult<Vec<Trade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM trades WHERE status = 'OPEN' AND review_reason IS NOT NULL ORDER BY id",
            TRADE_COLUMNS
        ))?;
        let trades = stmt
            .query_map([], row_to_trade)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trades)
    }

    pub fn count_trades(&self, origin: Option<TradeOrigin>) -> TradeKeeperResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE (?1 IS NULL OR origin = ?1)",
            params![origin.map(|o| o.as_str())],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn stats(&self) -> TradeKeeperResult<LedgerStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> TradeKeeperResult<u64> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };

        Ok(LedgerStats {
            total_trades: count("SELECT COUNT(*) FROM trades")?,
            open_trades: count("SELECT COUNT(*) FROM trades WHERE status = 'OPEN'")?,
            closed_trades: count("SELECT COUNT(*) FROM trades WHERE status = 'CLOSED'")?,
            orphan_trades: count("SELECT COUNT(*) FROM trades WHERE origin = 'RECOVERY_ORPHAN'")?,
            flagged_trades: count(
                "SELECT COUNT(*) FROM trades WHERE status = 'OPEN' AND review_reason IS NOT NULL",
            )?,
            total_sessions: count("SELECT COUNT(*) FROM sessions")?,
            active_sessions: count("SELECT COUNT(*) FROM sessions WHERE status = 'ACTIVE'")?,
            schema_version: LEDGER_SCHEMA_VERSION,
        })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn validate_trade_input(symbol: &str, entry_price: f64, quantity: f64) -> TradeKeeperResult<()> {
    if symbol.trim().is_empty() {
        return Err(TradeKeeperError::InvalidTrade("empty symbol".to_string()));
    }
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(TradeKeeperError::InvalidTrade(format!("quantity={}", quantity)));
    }
    if !entry_price.is_finite() || entry_price < 0.0 {
        return Err(TradeKeeperError::InvalidTrade(format!("entry_price={}", entry_price)));
    }
    Ok(())
}

pub(super) fn ensure_session_active(conn: &Connection, session_id: &SessionId) -> TradeKeeperResult<()> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM sessions WHERE session_id = ?1",
            params![session_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    match status.as_deref() {
        Some("ACTIVE") => Ok(()),
        _ => Err(TradeKeeperError::InvalidSession {
            session_id: session_id.clone(),
        }),
    }
}

fn insert_trade(
    conn: &Connection,
    session_id: &SessionId,
    symbol: &str,
    side: Side,
    entry_price: f64,
    quantity: f64,
    origin: TradeOrigin,
) -> TradeKeeperResult<TradeId> {
    conn.execute(
        r#"
        INSERT INTO trades (
            session_id, symbol, side, quantity, entry_price, entry_time, status, origin
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'OPEN', ?7)
        "#,
        params![
            session_id.as_str(),
            symbol,
            side.as_str(),
            quantity,
            entry_price,
            format_time(&Utc::now()),
            origin.as_str()
        ],
    )?;
    Ok(TradeId(conn.last_insert_rowid()))
}

fn scope_param(scope: &SessionScope) -> Option<&str> {
    match scope {
        SessionScope::Session(id) => Some(id.as_str()),
        SessionScope::AnySession => None,
    }
}

/// Fixed-width UTC timestamps so lexical order equals time order
pub(super) fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
}

pub(super) fn parse_text<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

pub(super) fn parse_time(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

pub(super) fn parse_optional_time(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e.to_string()))
    })
    .transpose()
}

pub(super) fn row_to_trade(row: &Row) -> rusqlite::Result<Trade> {
    Ok(Trade {
        internal_id: TradeId(row.get(0)?),
        session_id: SessionId(row.get(1)?),
        symbol: row.get(2)?,
        side: parse_text(row, 3)?,
        quantity: row.get(4)?,
        entry_price: row.get(5)?,
        entry_time: parse_time(row, 6)?,
        status: parse_text(row, 7)?,
        exit_price: row.get(8)?,
        exit_time: parse_optional_time(row, 9)?,
        fee: row.get(10)?,
        realized_pnl: row.get(11)?,
        origin: parse_text(row, 12)?,
        broker_order_id: row.get(13)?,
        external_id: row.get::<_, Option<String>>(14)?.map(ExternalId),
        review_reason: row.get(15)?,
    })
}
