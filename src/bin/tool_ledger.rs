/// Ledger inspection tool
///
/// Read-only views over the trade ledger and the state snapshot, plus the
/// operator actions that are safe to run while the main process is stopped.
///
/// Usage:
/// cargo run --bin tool_ledger -- sessions --limit 10
/// cargo run --bin tool_ledger -- open --session <SESSION_ID>
/// cargo run --bin tool_ledger -- flagged
/// cargo run --bin tool_ledger -- end-session <SESSION_ID> --final-balance 1000
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{modifiers, presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::path::PathBuf;
use std::time::Duration;

use tradekeeper::{
    config::{load_config, load_config_from_path, with_config},
    ledger::TradeLedger,
    paths,
    snapshot::StateSnapshotStore,
    types::{SessionId, SessionScope, Trade},
};

#[derive(Parser, Debug)]
#[command(name = "tool_ledger")]
#[command(about = "Inspect the TradeKeeper ledger and state snapshot")]
struct Args {
    /// Data directory (same as the main binary's --data-dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List recent sessions
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List open trades, optionally for one session
    Open {
        #[arg(long)]
        session: Option<String>,
    },
    /// List open trades flagged for manual review
    Flagged,
    /// List identifier mappings, newest first
    Mappings {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Ledger counters
    Stats,
    /// Print the state snapshot
    Snapshot,
    /// Mark a session COMPLETED
    EndSession {
        session_id: String,
        #[arg(long, default_value_t = 0.0)]
        final_balance: f64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(dir) = args.data_dir.clone() {
        paths::set_base_directory(dir).map_err(anyhow::Error::msg)?;
    }
    match &args.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    }
    .map_err(anyhow::Error::msg)
    .context("loading config")?;

    if let Command::Snapshot = args.command {
        return print_snapshot();
    }

    let ledger = open_ledger()?;
    match args.command {
        Command::Sessions { limit } => print_sessions(&ledger, limit),
        Command::Open { session } => {
            let session = session.map(SessionId::from);
            let trades = ledger.list_open_trades(&SessionScope::from_option(session.as_ref()))?;
            print_trades("OPEN TRADES", &trades);
            Ok(())
        }
        Command::Flagged => {
            let trades = ledger.list_flagged_trades()?;
            print_trades("FLAGGED FOR REVIEW", &trades);
            Ok(())
        }
        Command::Mappings { limit } => print_mappings(&ledger, limit),
        Command::Stats => {
            let stats = ledger.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::EndSession {
            session_id,
            final_balance,
        } => {
            let id = SessionId::from(session_id);
            ledger
                .end_session(&id, final_balance)
                .with_context(|| format!("ending session {}", id))?;
            println!("Session {} completed", id);
            Ok(())
        }
        Command::Snapshot => print_snapshot(),
    }
}

fn open_ledger() -> Result<TradeLedger> {
    let (file, busy_ms) = with_config(|cfg| {
        (
            cfg.ledger.database_file.clone(),
            cfg.ledger.busy_timeout_ms,
        )
    });
    let path = paths::resolve_data_file(&file);
    if !path.exists() {
        bail!("No ledger at {}", path.display());
    }
    Ok(TradeLedger::open(&path, Duration::from_millis(busy_ms))
        .with_context(|| format!("opening {}", path.display()))?)
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(modifiers::UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

fn print_sessions(ledger: &TradeLedger, limit: usize) -> Result<()> {
    let sessions = ledger.list_sessions(limit)?;
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(header(&["Session", "Symbol", "Status", "Started", "Ended", "Balance"]));
    for session in &sessions {
        let status = if session.is_active() {
            Cell::new(session.status.as_str()).fg(Color::Green)
        } else {
            Cell::new(session.status.as_str())
        };
        let balance = match session.final_balance {
            Some(final_balance) => format!("{:.2} -> {:.2}", session.initial_balance, final_balance),
            None => format!("{:.2}", session.initial_balance),
        };
        table.add_row(vec![
            Cell::new(session.session_id.as_str()),
            Cell::new(&session.symbol),
            status,
            Cell::new(session.start_time.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(
                session
                    .end_time
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(balance),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn print_trades(title: &str, trades: &[Trade]) {
    println!("{} ({})", title, trades.len());
    if trades.is_empty() {
        return;
    }

    let mut table = new_table();
    table.set_header(header(&[
        "#", "Symbol", "Side", "Qty", "Entry", "External", "Origin", "Review",
    ]));
    for trade in trades {
        let review = match &trade.review_reason {
            Some(reason) => Cell::new(reason).fg(Color::Yellow),
            None => Cell::new("-"),
        };
        table.add_row(vec![
            Cell::new(trade.internal_id.to_string()),
            Cell::new(&trade.symbol),
            Cell::new(trade.side.as_str()),
            Cell::new(format!("{:.6}", trade.quantity)),
            Cell::new(format!("{:.4}", trade.entry_price)),
            Cell::new(
                trade
                    .external_id
                    .as_ref()
                    .map(|id| id.as_str().to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(trade.origin.as_str()),
            review,
        ]);
    }
    println!("{}", table);
}

fn print_mappings(ledger: &TradeLedger, limit: usize) -> Result<()> {
    let mappings = ledger.list_mappings(limit)?;
    if mappings.is_empty() {
        println!("No identifier mappings");
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(header(&["#", "External", "Broker order", "Symbol", "Side", "Created"]));
    for mapping in &mappings {
        let external = if mapping.external_id.is_synthetic() {
            Cell::new(mapping.external_id.as_str()).fg(Color::DarkGrey)
        } else {
            Cell::new(mapping.external_id.as_str())
        };
        table.add_row(vec![
            Cell::new(mapping.internal_id.to_string()),
            external,
            Cell::new(mapping.broker_order_id.as_deref().unwrap_or("-")),
            Cell::new(&mapping.symbol),
            Cell::new(mapping.side.as_str()),
            Cell::new(mapping.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn print_snapshot() -> Result<()> {
    let file_name = with_config(|cfg| cfg.snapshot.file_name.clone());
    let store = StateSnapshotStore::new(paths::resolve_data_file(&file_name));
    match store.load()? {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            println!("Auto restart: {}", snapshot.should_auto_restart());
        }
        None => println!("No snapshot at {}", store.path().display()),
    }
    Ok(())
}
