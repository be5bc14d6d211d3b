//! Configuration system
//!
//! - `macros`: `config_struct!` for structs with embedded defaults
//! - `schemas`: every configuration section
//! - `utils`: loading, reloading and global access

pub mod macros;
pub mod schemas;
pub mod utils;

pub use schemas::{
    Config, ExchangeConfig, LedgerConfig, RecoveryConfig, RegistryConfig, SnapshotConfig,
};
pub use utils::{
    get_config_clone, load_config, load_config_from_path, reload_config, save_config,
    with_config, CONFIG,
};
