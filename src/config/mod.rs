//! Configuration module for rust-node
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use rust_node::config::load_config_with_env;
//!
//! let config = load_config_with_env("/etc/rust-node/config.json").unwrap();
//! println!("Snapshot dir: {:?}", config.engine.config_dir);
//! ```

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, create_default_config, load_config, load_config_str,
    load_config_with_env,
};
pub use types::{
    Config, EngineConfig, EngineKind, IpcConfig, LifecycleConfig, LogConfig, RulesConfig,
};
