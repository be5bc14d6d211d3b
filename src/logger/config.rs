/// Logger configuration derived from command-line flags
///
/// Stored globally so every call site filters against the same rules.
use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments::get_cmd_args;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Messages above this level are dropped (Debug/Verbose have extra gates)
    pub min_level: LogLevel,
    /// Tags with `--debug-<tag>` enabled
    pub debug_tags: HashSet<String>,
    /// Tags with `--verbose-<tag>` enabled
    pub verbose_tags: HashSet<String>,
    /// If non-empty, only these tags are shown
    pub enabled_tags: HashSet<String>,
    pub console_enabled: bool,
    pub file_enabled: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
            console_enabled: true,
            file_enabled: true,
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

pub fn update_logger_config(f: impl FnOnce(&mut LoggerConfig)) {
    f(&mut LOGGER_CONFIG.write());
}

/// Build the configuration from a set of arguments
pub fn config_from_args(args: &[String]) -> LoggerConfig {
    let mut config = LoggerConfig::default();

    for arg in args {
        if arg == "--verbose" {
            config.min_level = LogLevel::Verbose;
        } else if arg == "--quiet" {
            config.min_level = LogLevel::Warning;
        } else if arg == "--no-log-file" {
            config.file_enabled = false;
        } else if let Some(key) = arg.strip_prefix("--debug-") {
            if LogTag::from_debug_key(key).is_some() {
                config.debug_tags.insert(key.to_lowercase());
                if config.min_level < LogLevel::Debug {
                    config.min_level = LogLevel::Debug;
                }
            }
        } else if let Some(key) = arg.strip_prefix("--verbose-") {
            if LogTag::from_debug_key(key).is_some() {
                config.verbose_tags.insert(key.to_lowercase());
                config.debug_tags.insert(key.to_lowercase());
                config.min_level = LogLevel::Verbose;
            }
        } else if let Some(keys) = arg.strip_prefix("--log-only=") {
            config
                .enabled_tags
                .extend(keys.split(',').map(|k| k.trim().to_lowercase()));
        }
    }

    config
}

/// Scan the process arguments and install the resulting configuration
pub fn init_from_args() {
    set_logger_config(config_from_args(&get_cmd_args()));
}

pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    LOGGER_CONFIG.read().debug_tags.contains(&tag.to_debug_key())
}

pub fn is_verbose_enabled_for_tag(tag: &LogTag) -> bool {
    LOGGER_CONFIG.read().verbose_tags.contains(&tag.to_debug_key())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_debug_flags_enable_tags() {
        let config = config_from_args(&args(&["tradekeeper", "--debug-recovery", "--debug-nonsense"]));
        assert!(config.debug_tags.contains("recovery"));
        assert!(!config.debug_tags.contains("nonsense"));
        assert_eq!(config.min_level, LogLevel::Debug);
    }

    #[test]
    fn test_quiet_and_log_only() {
        let config = config_from_args(&args(&["--quiet", "--log-only=ledger,registry"]));
        assert_eq!(config.min_level, LogLevel::Warning);
        assert!(config.enabled_tags.contains("ledger"));
        assert!(config.enabled_tags.contains("registry"));
    }
}
