// =============================================================================
// DATABASE SCHEMA DEFINITIONS
// =============================================================================

pub const LEDGER_SCHEMA_VERSION: u32 = 1;

pub const SCHEMA_SESSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    strategy_config TEXT NOT NULL DEFAULT '',
    initial_balance REAL NOT NULL,
    final_balance REAL,
    status TEXT NOT NULL, -- 'ACTIVE' or 'COMPLETED'
    start_time TEXT NOT NULL,
    end_time TEXT
);
"#;

pub const SCHEMA_TRADES: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL, -- 'long' or 'short'
    quantity REAL NOT NULL,
    entry_price REAL NOT NULL,
    entry_time TEXT NOT NULL,
    status TEXT NOT NULL, -- 'OPEN' or 'CLOSED'
    exit_price REAL,
    exit_time TEXT,
    fee REAL,
    realized_pnl REAL,
    origin TEXT NOT NULL, -- 'NORMAL' or 'RECOVERY_ORPHAN'
    bybit_order_id TEXT,
    external_trade_id TEXT,
    review_reason TEXT, -- set when the exchange no longer reports the position
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (session_id) REFERENCES sessions(session_id)
);
"#;

pub const SCHEMA_TRADE_ID_MAPPING: &str = r#"
CREATE TABLE IF NOT EXISTS trade_id_mapping (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    internal_trade_id INTEGER NOT NULL UNIQUE,
    external_trade_id TEXT NOT NULL UNIQUE,
    bybit_order_id TEXT,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (internal_trade_id) REFERENCES trades(id)
);
"#;

pub const SCHEMA_LEDGER_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

// Lookups by (symbol, side, status=OPEN) and by external id are on the recovery path
pub const LEDGER_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_trades_open_lookup ON trades(symbol, side, status, entry_time DESC);",
    "CREATE INDEX IF NOT EXISTS idx_trades_session_status ON trades(session_id, status);",
    "CREATE INDEX IF NOT EXISTS idx_trades_external_id ON trades(external_trade_id);",
    "CREATE INDEX IF NOT EXISTS idx_trades_bybit_order_id ON trades(bybit_order_id);",
    "CREATE INDEX IF NOT EXISTS idx_mapping_external_id ON trade_id_mapping(external_trade_id);",
    "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status, start_time DESC);",
];

/// Column list shared by every trade SELECT; order matches `row_to_trade`
pub const TRADE_COLUMNS: &str = "id, session_id, symbol, side, quantity, entry_price, entry_time, \
     status, exit_price, exit_time, fee, realized_pnl, origin, bybit_order_id, \
     external_trade_id, review_reason";

pub const SESSION_COLUMNS: &str =
    "session_id, symbol, strategy_config, initial_balance, final_balance, status, start_time, end_time";
