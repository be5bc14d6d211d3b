/// Centralized argument handling for TradeKeeper
///
/// The main binary reads flags through these helpers instead of a derive parser so
/// that library code (logger, config) can consult the same argument list.
///
/// Features:
/// - Centralized CMD_ARGS storage with thread-safe access
/// - Mode and debug flag checking functions
/// - Help text
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::env;

use crate::logger::LogTag;

/// Global command-line arguments storage
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Override the collected arguments (binaries with their own parsing, tests)
pub fn set_cmd_args(args: Vec<String>) {
    *CMD_ARGS.lock() = args;
}

pub fn get_cmd_args() -> Vec<String> {
    CMD_ARGS.lock().clone()
}

pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Value of the argument following `flag`, if any
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .filter(|value| !value.starts_with("--"))
        .cloned()
}

// =============================================================================
// MODE FLAGS
// =============================================================================

/// Only report whether recovery is needed, then exit
pub fn is_check_mode() -> bool {
    has_arg("--check")
}

/// Run a single reconciliation pass, then exit
pub fn is_recover_mode() -> bool {
    has_arg("--recover")
}

/// Record a manual stop in the snapshot, then exit
pub fn is_stop_mode() -> bool {
    has_arg("--stop")
}

/// Print snapshot and ledger summary, then exit
pub fn is_status_mode() -> bool {
    has_arg("--status")
}

/// Recover, then keep running the sync worker until a shutdown signal
pub fn is_run_mode() -> bool {
    has_arg("--run")
}

pub fn get_config_path_override() -> Option<String> {
    get_arg_value("--config")
}

pub fn get_data_dir_override() -> Option<String> {
    get_arg_value("--data-dir")
}

// =============================================================================
// DEBUG FLAGS
// =============================================================================

/// All `--debug-<tag>` flags present on the command line
pub fn get_enabled_debug_modes() -> Vec<String> {
    LogTag::ALL
        .iter()
        .map(|tag| tag.to_debug_key())
        .filter(|key| has_arg(&format!("--debug-{}", key)))
        .collect()
}

/// Log which debug modes are active, if any
pub fn print_debug_info() {
    let modes = get_enabled_debug_modes();
    if !modes.is_empty() {
        crate::logger::info(
            LogTag::System,
            &format!("Debug modes enabled: {}", modes.join(", ")),
        );
    }
}

pub fn print_help() {
    println!("TradeKeeper - crash-safe position recovery");
    println!();
    println!("USAGE:");
    println!("    tradekeeper [MODE] [OPTIONS]");
    println!();
    println!("MODES:");
    println!("    --check              Report whether recovery is needed");
    println!("    --recover            Run one reconciliation pass");
    println!("    --run                Recover, then run the periodic sync worker (default)");
    println!("    --stop               Mark the last run as stopped manually");
    println!("    --status             Print snapshot and ledger summary");
    println!();
    println!("OPTIONS:");
    println!("    --config <path>      Configuration file (default: <data>/config.toml)");
    println!("    --data-dir <path>    Base directory for data and logs");
    println!("    --debug-<tag>        Debug logs for a tag (ledger, registry, recovery, ...)");
    println!("    --verbose            Very detailed logs");
    println!("    --quiet              Only warnings and errors");
    println!("    --no-log-file        Console logging only");
    println!("    -h, --help           Show this help");
}

pub mod patterns {
    use super::*;

    pub fn is_help_requested() -> bool {
        has_arg("--help") || has_arg("-h")
    }

    pub fn is_quiet_mode() -> bool {
        has_arg("--quiet") || has_arg("-q")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test: CMD_ARGS is process-global and tests run in parallel
    #[test]
    fn test_argument_helpers() {
        set_cmd_args(vec![
            "tradekeeper".to_string(),
            "--recover".to_string(),
            "--debug-ledger".to_string(),
            "--config".to_string(),
            "/tmp/tk.toml".to_string(),
            "--data-dir".to_string(),
            "--quiet".to_string(),
        ]);

        assert!(is_recover_mode());
        assert!(!is_check_mode());
        assert_eq!(get_config_path_override(), Some("/tmp/tk.toml".to_string()));
        // Flag followed by another flag has no value
        assert_eq!(get_data_dir_override(), None);
        assert!(patterns::is_quiet_mode());
        assert_eq!(get_enabled_debug_modes(), vec!["ledger".to_string()]);
    }
}
