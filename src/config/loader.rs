//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::{Config, EngineKind};
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: engine={:?}, config_dir={:?}",
        config.engine.kind, config.engine.config_dir
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// A missing file is not an error: defaults are used and the environment is
/// still applied.
///
/// Environment variables:
/// - `RUST_NODE_LOG_LEVEL`: Override log level
/// - `RUST_NODE_LOG_FORMAT`: Override log format
/// - `RUST_NODE_IPC_SOCKET`: Override IPC socket path
/// - `RUST_NODE_CONFIG_DIR`: Override snapshot directory
/// - `RUST_NODE_ENGINE_BINARY`: Override engine binary path
/// - `RUST_NODE_ENGINE_KIND`: `process` or `memory`
/// - `DISABLE_HASHED_SET_CHECK`: `true` forces a restart on every start request
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or an override fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound { path }) => {
            info!("No configuration file at {}, using defaults", path);
            Config::default_config()
        }
        Err(e) => return Err(e),
    };

    apply_env_overrides(config, |name| std::env::var(name).ok())
}

/// Apply overrides from a variable lookup
///
/// Split out from [`load_config_with_env`] so tests can inject variables
/// without touching the process environment.
///
/// # Errors
///
/// Returns `ConfigError::EnvError` for unparseable values, or a validation
/// error if the overridden config is invalid.
pub fn apply_env_overrides<F>(mut config: Config, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup("RUST_NODE_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(format) = lookup("RUST_NODE_LOG_FORMAT") {
        config.log.format = format;
        debug!("Log format overridden to {}", config.log.format);
    }

    if let Some(socket) = lookup("RUST_NODE_IPC_SOCKET") {
        config.ipc.socket_path = socket.into();
        debug!("IPC socket path overridden to {:?}", config.ipc.socket_path);
    }

    if let Some(dir) = lookup("RUST_NODE_CONFIG_DIR") {
        config.engine.config_dir = dir.into();
        debug!("Config dir overridden to {:?}", config.engine.config_dir);
    }

    if let Some(binary) = lookup("RUST_NODE_ENGINE_BINARY") {
        config.engine.binary = binary.into();
        debug!("Engine binary overridden to {:?}", config.engine.binary);
    }

    if let Some(kind) = lookup("RUST_NODE_ENGINE_KIND") {
        config.engine.kind = kind.parse::<EngineKind>().map_err(|_| ConfigError::EnvError {
            name: "RUST_NODE_ENGINE_KIND".into(),
            reason: format!("Invalid engine kind: {kind}"),
        })?;
        debug!("Engine kind overridden to {:?}", config.engine.kind);
    }

    if let Some(flag) = lookup("DISABLE_HASHED_SET_CHECK") {
        config.lifecycle.disable_hash_check = parse_bool("DISABLE_HASHED_SET_CHECK", &flag)?;
        debug!(
            "Hash check disabled overridden to {}",
            config.lifecycle.disable_hash_check
        );
    }

    // Re-validate after overrides
    config.validate()?;

    Ok(config)
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::EnvError {
            name: name.into(),
            reason: format!("Invalid boolean: {value}"),
        }),
    }
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
