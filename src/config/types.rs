//! Configuration types for rust-node
//!
//! All sections deserialize with defaults so a minimal `{}` document yields a
//! usable node configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Managed proxy engine
    #[serde(default)]
    pub engine: EngineConfig,

    /// IPC control surface
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Logging
    #[serde(default)]
    pub log: LogConfig,

    /// Start/restart behaviour
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// IP block rules
    #[serde(default)]
    pub rules: RulesConfig,
}

impl Config {
    /// Validate the whole configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.ipc.validate()?;
        self.log.validate()?;
        self.lifecycle.validate()?;
        self.rules.validate()?;
        Ok(())
    }

    /// Configuration used when no file is present
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// Which engine adapter backs the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Spawn and supervise the engine binary
    #[default]
    Process,
    /// In-process reference engine (dry-run nodes, tests)
    Memory,
}

impl std::str::FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::ValidationError(format!(
                "Unknown engine kind: {other}"
            ))),
        }
    }
}

/// Proxy engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Adapter kind
    #[serde(default)]
    pub kind: EngineKind,

    /// Path to the engine binary
    #[serde(default = "default_engine_binary")]
    pub binary: PathBuf,

    /// Directory holding the config snapshot and the engine's working config
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Engine API listen address injected into every config
    #[serde(default = "default_api_listen")]
    pub api_listen: String,

    /// Engine API inbound tag injected into every config
    #[serde(default = "default_api_tag")]
    pub api_tag: String,

    /// Engine log level injected when the caller config has no `log` section
    #[serde(default = "default_engine_log_level")]
    pub log_level: String,
}

impl EngineConfig {
    /// Validate engine configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == EngineKind::Process && self.binary.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "engine binary cannot be empty for the process engine".into(),
            ));
        }

        if self.config_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "engine config_dir cannot be empty".into(),
            ));
        }

        if self.api_tag.is_empty() {
            return Err(ConfigError::ValidationError(
                "engine api_tag cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Path of the durable config snapshot
    pub fn snapshot_path(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            binary: default_engine_binary(),
            config_dir: default_config_dir(),
            api_listen: default_api_listen(),
            api_tag: default_api_tag(),
            log_level: default_engine_log_level(),
        }
    }
}

/// IPC configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcConfig {
    /// Path to Unix socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Socket file mode (octal, e.g., 0o660)
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Enable IPC server
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl IpcConfig {
    /// Validate IPC configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "IPC socket path cannot be empty when IPC is enabled".into(),
            ));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_message_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            enabled: true,
            max_message_size: default_max_message_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {other}"
                )))
            }
        }

        match self.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "Invalid log format: {other}"
            ))),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

/// Start/restart behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Always restart instead of comparing fingerprints
    #[serde(default)]
    pub disable_hash_check: bool,

    /// Post-start health probe attempts
    #[serde(default = "default_health_check_attempts")]
    pub health_check_attempts: u32,

    /// Delay between post-start health probes
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Delay before restoring the last snapshot at process start
    #[serde(default = "default_restore_delay_ms")]
    pub restore_delay_ms: u64,

    /// Restore the last snapshot at process start
    #[serde(default = "default_true")]
    pub restore_on_start: bool,
}

impl LifecycleConfig {
    /// Validate lifecycle configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_check_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "health_check_attempts must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Interval between post-start health probes
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Delay before the restore job runs
    pub fn restore_delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_ms)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            disable_hash_check: false,
            health_check_attempts: default_health_check_attempts(),
            health_check_interval_ms: default_health_check_interval_ms(),
            restore_delay_ms: default_restore_delay_ms(),
            restore_on_start: true,
        }
    }
}

/// IP block rule configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RulesConfig {
    /// Outbound that blocked IPs are routed to
    #[serde(default = "default_block_outbound_tag")]
    pub block_outbound_tag: String,
}

impl RulesConfig {
    /// Validate rule configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_outbound_tag.is_empty() {
            return Err(ConfigError::ValidationError(
                "block_outbound_tag cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            block_outbound_tag: default_block_outbound_tag(),
        }
    }
}

// Default value functions for serde

fn default_engine_binary() -> PathBuf {
    PathBuf::from("/usr/local/bin/xray")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/var/lib/rust-node")
}

fn default_api_listen() -> String {
    "127.0.0.1:61000".into()
}

fn default_api_tag() -> String {
    "REMNAWAVE_API".into()
}

fn default_engine_log_level() -> String {
    "warning".into()
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/rust-node.sock")
}

const fn default_socket_mode() -> u32 {
    0o660
}

const fn default_true() -> bool {
    true
}

const fn default_max_message_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "json".into()
}

const fn default_health_check_attempts() -> u32 {
    10
}

const fn default_health_check_interval_ms() -> u64 {
    2000
}

const fn default_restore_delay_ms() -> u64 {
    1000
}

fn default_block_outbound_tag() -> String {
    "BLOCK".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.kind, EngineKind::Process);
        assert_eq!(config.lifecycle.health_check_attempts, 10);
        assert_eq!(config.lifecycle.health_check_interval(), Duration::from_secs(2));
        assert_eq!(config.rules.block_outbound_tag, "BLOCK");
        assert_eq!(config.ipc.socket_mode, 0o660);
    }

    #[test]
    fn test_snapshot_path() {
        let mut config = EngineConfig::default();
        config.config_dir = PathBuf::from("/tmp/node");
        assert_eq!(config.snapshot_path(), PathBuf::from("/tmp/node/config.json"));
    }

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("memory".parse::<EngineKind>().unwrap(), EngineKind::Memory);
        assert_eq!("PROCESS".parse::<EngineKind>().unwrap(), EngineKind::Process);
        assert!("docker".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.lifecycle.health_check_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log.level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rules.block_outbound_tag.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ipc.max_message_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_memory_engine_needs_no_binary() {
        let json = r#"{ "engine": { "kind": "memory", "binary": "" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
    }
}
