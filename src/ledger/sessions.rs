/// Session lifecycle: a session groups the trades of one strategy run
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::db::{format_time, parse_optional_time, parse_text, parse_time, TradeLedger};
use super::schema::SESSION_COLUMNS;
use crate::errors::{TradeKeeperError, TradeKeeperResult};
use crate::logger::{self, LogTag};
use crate::types::{Session, SessionId, SessionStatus};

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        session_id: SessionId(row.get(0)?),
        symbol: row.get(1)?,
        strategy_config: row.get(2)?,
        initial_balance: row.get(3)?,
        final_balance: row.get(4)?,
        status: parse_text::<SessionStatus>(row, 5)?,
        start_time: parse_time(row, 6)?,
        end_time: parse_optional_time(row, 7)?,
    })
}

impl TradeLedger {
    pub fn start_session(
        &self,
        symbol: &str,
        strategy_config: &str,
        initial_balance: f64,
    ) -> TradeKeeperResult<SessionId> {
        let session_id = SessionId::generate();

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO sessions (session_id, symbol, strategy_config, initial_balance, status, start_time)
            VALUES (?1, ?2, ?3, ?4, 'ACTIVE', ?5)
            "#,
            params![
                session_id.as_str(),
                symbol,
                strategy_config,
                initial_balance,
                format_time(&Utc::now())
            ],
        )?;

        logger::info(
            LogTag::Ledger,
            &format!("Started session {} ({})", session_id, symbol),
        );
        Ok(session_id)
    }

    /// Mark a session COMPLETED. Its OPEN trades are left untouched; a warning
    /// is emitted so the operator can reconcile them.
    pub fn end_session(&self, session_id: &SessionId, final_balance: f64) -> TradeKeeperResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM sessions WHERE session_id = ?1",
                params![session_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match status.as_deref() {
            None => {
                return Err(TradeKeeperError::UnknownSession {
                    session_id: session_id.clone(),
                })
            }
            Some("COMPLETED") => {
                logger::debug(
                    LogTag::Ledger,
                    &format!("Session {} already completed", session_id),
                );
                return Ok(());
            }
            Some(_) => {}
        }

        let open_trades: i64 = tx.query_row(
            "SELECT COUNT(*) FROM trades WHERE session_id = ?1 AND status = 'OPEN'",
            params![session_id.as_str()],
            |row| row.get(0),
        )?;

        tx.execute(
            "UPDATE sessions SET status = 'COMPLETED', final_balance = ?2, end_time = ?3
             WHERE session_id = ?1",
            params![session_id.as_str(), final_balance, format_time(&Utc::now())],
        )?;
        tx.commit()?;

        if open_trades > 0 {
            logger::warning(
                LogTag::Ledger,
                &format!(
                    "Session {} ended with {} trade(s) still OPEN",
                    session_id, open_trades
                ),
            );
        } else {
            logger::info(LogTag::Ledger, &format!("Ended session {}", session_id));
        }
        Ok(())
    }

    pub fn get_session(&self, session_id: &SessionId) -> TradeKeeperResult<Option<Session>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE session_id = ?1", SESSION_COLUMNS),
                params![session_id.as_str()],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    pub fn is_session_active(&self, session_id: &SessionId) -> TradeKeeperResult<bool> {
        Ok(self
            .get_session(session_id)?
            .map(|s| s.is_active())
            .unwrap_or(false))
    }

    /// Most recently started ACTIVE session
    pub fn latest_active_session(&self) -> TradeKeeperResult<Option<Session>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions WHERE status = 'ACTIVE'
                     ORDER BY start_time DESC, rowid DESC LIMIT 1",
                    SESSION_COLUMNS
                ),
                [],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    /// Sessions newest first
    pub fn list_sessions(&self, limit: usize) -> TradeKeeperResult<Vec<Session>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions ORDER BY start_time DESC, rowid DESC LIMIT ?1",
            SESSION_COLUMNS
        ))?;
        let sessions = stmt
            .query_map(params![limit as i64], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionScope, Side, TradeOrigin};

    #[test]
    fn test_session_lifecycle() {
        let ledger = TradeLedger::open_in_memory().unwrap();
        let id = ledger.start_session("BTCUSDT", r#"{"leverage":3}"#, 1000.0).unwrap();

        let session = ledger.get_session(&id).unwrap().unwrap();
        assert!(session.is_active());
        assert_eq!(session.strategy_config, r#"{"leverage":3}"#);
        assert!(ledger.is_session_active(&id).unwrap());

        ledger.end_session(&id, 1100.0).unwrap();
        let ended = ledger.get_session(&id).unwrap().unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert_eq!(ended.final_balance, Some(1100.0));
        assert!(ended.end_time.is_some());

        // second end is a no-op
        ledger.end_session(&id, 0.0).unwrap();
        assert_eq!(
            ledger.get_session(&id).unwrap().unwrap().final_balance,
            Some(1100.0)
        );
    }

    #[test]
    fn test_end_unknown_session() {
        let ledger = TradeLedger::open_in_memory().unwrap();
        let err = ledger.end_session(&SessionId::from("nope"), 0.0).unwrap_err();
        assert!(matches!(err, TradeKeeperError::UnknownSession { .. }));
    }

    #[test]
    fn test_end_session_keeps_open_trades_open() {
        let ledger = TradeLedger::open_in_memory().unwrap();
        let id = ledger.start_session("BTCUSDT", "", 1000.0).unwrap();
        let trade = ledger
            .add_trade(&id, "BTCUSDT", Side::Long, 1.0, 1.0, TradeOrigin::Normal)
            .unwrap();

        ledger.end_session(&id, 1000.0).unwrap();
        assert!(ledger.get_trade(trade).unwrap().unwrap().is_open());
        assert_eq!(
            ledger.list_open_trades(&SessionScope::AnySession).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_latest_active_session() {
        let ledger = TradeLedger::open_in_memory().unwrap();
        assert!(ledger.latest_active_session().unwrap().is_none());

        let first = ledger.start_session("BTCUSDT", "", 1.0).unwrap();
        let second = ledger.start_session("ETHUSDT", "", 1.0).unwrap();
        assert_eq!(
            ledger.latest_active_session().unwrap().unwrap().session_id,
            second
        );

        ledger.end_session(&second, 1.0).unwrap();
        assert_eq!(
            ledger.latest_active_session().unwrap().unwrap().session_id,
            first
        );
        assert_eq!(ledger.list_sessions(10).unwrap().len(), 2);
    }
}
