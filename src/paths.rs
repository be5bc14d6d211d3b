//! Centralized path resolution for TradeKeeper
//!
//! ## Path Strategy
//!
//! The base directory resolves, in order, to:
//! 1. An explicit override (`--data-dir`, set before first use)
//! 2. `$TRADEKEEPER_HOME`
//! 3. The platform data directory (`dirs::data_local_dir()/TradeKeeper`)
//!
//! ## Directory Structure
//!
//! ```text
//! TradeKeeper/
//! ├── data/
//! │ ├── config.toml
//! │ ├── ledger.db
//! │ └── trading_state.json
//! └── logs/
//!   └── tradekeeper_*.log
//! ```

use once_cell::sync::{Lazy, OnceCell};
use std::path::PathBuf;

const APP_DIR: &str = "TradeKeeper";

static BASE_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

static BASE_DIRECTORY: Lazy<PathBuf> = Lazy::new(resolve_base_directory);

fn resolve_base_directory() -> PathBuf {
    if let Some(dir) = BASE_OVERRIDE.get() {
        return dir.clone();
    }

    if let Ok(dir) = std::env::var("TRADEKEEPER_HOME") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Some(dir) = dirs::data_local_dir() {
        return dir.join(APP_DIR);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(APP_DIR);
    }

    PathBuf::from(APP_DIR)
}

/// Pin the base directory. Must run before any path accessor is called.
pub fn set_base_directory(path: PathBuf) -> Result<(), String> {
    BASE_OVERRIDE
        .set(path)
        .map_err(|_| "Base directory already set".to_string())
}

pub fn get_base_directory() -> PathBuf {
    BASE_DIRECTORY.clone()
}

pub fn get_data_directory() -> PathBuf {
    BASE_DIRECTORY.join("data")
}

pub fn get_logs_directory() -> PathBuf {
    BASE_DIRECTORY.join("logs")
}

pub fn get_config_path() -> PathBuf {
    get_data_directory().join("config.toml")
}

/// Data-directory path for a configured file name (absolute names pass through)
pub fn resolve_data_file(file_name: &str) -> PathBuf {
    let path = PathBuf::from(file_name);
    if path.is_absolute() {
        path
    } else {
        get_data_directory().join(path)
    }
}

pub fn ensure_all_directories() -> Result<(), String> {
    for dir in [get_data_directory(), get_logs_directory()] {
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create directory {}: {}", dir.display(), e))?;
    }
    Ok(())
}
