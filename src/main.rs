use anyhow::{anyhow, Context};
use std::path::PathBuf;

use tradekeeper::{
    arguments::{
        get_config_path_override, get_data_dir_override, is_check_mode, is_recover_mode,
        is_run_mode, is_status_mode, is_stop_mode, patterns, print_debug_info, print_help,
    },
    logger::{self as logger, LogTag},
    run::{self, Components},
    snapshot::StateSnapshotStore,
};

/// Main entry point for TradeKeeper
///
/// Modes (execute and exit): --check, --recover, --stop, --status.
/// Without a mode flag (or with --run) the process recovers and then keeps the
/// sync worker running until SIGINT/SIGTERM.
#[tokio::main]
async fn main() {
    if let Some(dir) = get_data_dir_override() {
        if let Err(e) = tradekeeper::paths::set_base_directory(PathBuf::from(dir)) {
            eprintln!("Failed to set data directory: {}", e);
            std::process::exit(1);
        }
    }

    // Logger needs the logs directory to exist
    if let Err(e) = tradekeeper::paths::ensure_all_directories() {
        eprintln!("Failed to create required directories: {}", e);
        std::process::exit(1);
    }

    logger::init();

    if patterns::is_help_requested() {
        print_help();
        std::process::exit(0);
    }

    let config_result = match get_config_path_override() {
        Some(path) => tradekeeper::config::load_config_from_path(&PathBuf::from(path)),
        None => tradekeeper::config::load_config(),
    };
    if let Err(e) = config_result {
        logger::error(LogTag::Config, &format!("Failed to load config: {}", e));
        logger::flush();
        std::process::exit(1);
    }

    print_debug_info();

    let code = match run_mode().await {
        Ok(code) => code,
        Err(e) => {
            logger::error(LogTag::System, &format!("{:#}", e));
            1
        }
    };

    logger::flush();
    std::process::exit(code);
}

async fn run_mode() -> anyhow::Result<i32> {
    // =========================================================================
    // SPECIAL MODES (execute and exit)
    // =========================================================================

    if is_stop_mode() {
        let snapshots = snapshot_store();
        snapshots
            .mark_stopped_manually()
            .with_context(|| format!("marking {} as stopped", snapshots.path().display()))?;
        logger::info(LogTag::System, "Recorded manual stop");
        return Ok(0);
    }

    if is_status_mode() {
        print_status()?;
        return Ok(0);
    }

    if is_check_mode() {
        let components = Components::from_config().map_err(|e| anyhow!(e))?;
        let (needed, info) = components
            .engine
            .check_recovery_needed()
            .context("checking recovery state")?;
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(if needed { 3 } else { 0 });
    }

    if is_recover_mode() {
        let components = Components::from_config().map_err(|e| anyhow!(e))?;
        let outcome = run::run_startup_recovery(&components)
            .await
            .map_err(|e| anyhow!(e))?;
        println!("{}", tradekeeper::recovery::summarize(&outcome));
        return Ok(if outcome.success { 0 } else { 2 });
    }

    // =========================================================================
    // MAIN EXECUTION
    // =========================================================================

    if !is_run_mode() {
        logger::debug(LogTag::System, "No mode flag given, running (--run)");
    }
    run::run_tradekeeper().await.map_err(|e| anyhow!(e))?;
    logger::info(LogTag::System, "TradeKeeper stopped");
    Ok(0)
}

fn snapshot_store() -> StateSnapshotStore {
    let file_name = tradekeeper::config::with_config(|cfg| cfg.snapshot.file_name.clone());
    StateSnapshotStore::new(tradekeeper::paths::resolve_data_file(&file_name))
}

fn print_status() -> anyhow::Result<()> {
    let snapshots = snapshot_store();
    match snapshots.load().context("reading snapshot")? {
        Some(snapshot) => {
            println!("Snapshot ({}):", snapshots.path().display());
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            println!("Auto restart: {}", snapshot.should_auto_restart());
        }
        None => println!("No snapshot at {}", snapshots.path().display()),
    }

    let components = Components::from_config().map_err(|e| anyhow!(e))?;
    let stats = components.ledger.stats().context("reading ledger stats")?;
    println!("Ledger ({}):", components.ledger.database_path());
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
