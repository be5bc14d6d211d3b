use super::schemas::Config;
/// Configuration utilities - loading, reloading, and access helpers
use crate::logger::{self, LogTag};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

/// Global configuration instance
///
/// Access it through `with_config` / `get_config_clone`. Reading before
/// `load_config` yields the built-in defaults.
pub static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

static CONFIG_PATH: OnceCell<PathBuf> = OnceCell::new();

fn parse_config_file(path: &Path) -> Result<Config, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

    let config = toml::from_str::<Config>(&contents)
        .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

    config
        .validate()
        .map_err(|e| format!("Invalid config file '{}': {}", path.display(), e))?;

    Ok(config)
}

/// Load configuration from the default location under the data directory
pub fn load_config() -> Result<(), String> {
    load_config_from_path(&crate::paths::get_config_path())
}

/// Load configuration from a specific TOML file and initialize the global CONFIG.
/// A missing file is not an error: defaults are used.
pub fn load_config_from_path(path: &Path) -> Result<(), String> {
    let config = if path.exists() {
        let config = parse_config_file(path)?;
        logger::info(
            LogTag::Config,
            &format!("Loaded configuration from {}", path.display()),
        );
        config
    } else {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", path.display()),
        );
        Config::default()
    };

    CONFIG
        .set(RwLock::new(config))
        .map_err(|_| "Config already initialized".to_string())?;
    let _ = CONFIG_PATH.set(path.to_path_buf());

    Ok(())
}

/// Re-read the file the configuration was loaded from
pub fn reload_config() -> Result<(), String> {
    let path = CONFIG_PATH
        .get()
        .cloned()
        .ok_or_else(|| "Config not initialized. Call load_config() first.".to_string())?;

    let new_config = parse_config_file(&path)?;

    let config_lock = CONFIG
        .get()
        .ok_or_else(|| "Config not initialized. Call load_config() first.".to_string())?;
    *config_lock.write() = new_config;

    logger::info(LogTag::Config, "Configuration reloaded");
    Ok(())
}

/// Execute a function with read access to the configuration
///
/// ```
/// use tradekeeper::config::with_config;
///
/// let tolerance = with_config(|cfg| cfg.registry.quantity_tolerance_pct);
/// assert!(tolerance >= 0.0);
/// ```
pub fn with_config<F, R>(f: F) -> R
where
    F: FnOnce(&Config) -> R,
{
    let config_lock = CONFIG.get_or_init(|| RwLock::new(Config::default()));
    let config = config_lock.read();
    f(&config)
}

/// Clone of the entire configuration, for holding across await points
pub fn get_config_clone() -> Config {
    with_config(|cfg| cfg.clone())
}

/// Write the current configuration to disk (default: the loaded path)
pub fn save_config(path: Option<&Path>) -> Result<(), String> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => CONFIG_PATH
            .get()
            .cloned()
            .unwrap_or_else(crate::paths::get_config_path),
    };

    let config_str = with_config(|cfg| {
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))
    })?;

    std::fs::write(&path, config_str)
        .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.recovery.exchange_timeout_secs = 4;
        config.registry.quantity_tolerance_pct = 0.5;
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = parse_config_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_parse_config_file_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[recovery]\nexchange_timeout_secs = 0\n").unwrap();

        let err = parse_config_file(&path).unwrap_err();
        assert!(err.contains("exchange_timeout_secs"));
    }
}
