//! Error types for rust-node
//!
//! Errors are grouped by subsystem. Engine and lifecycle errors carry a
//! recovery hint so callers can tell a transient engine hiccup from a broken
//! local environment.

use std::io;

use thiserror::Error;

/// Top-level error type for rust-node
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IPC communication errors
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// Proxy engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// State tracking errors
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Lifecycle faults
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NodeError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::State(_) => false,
            Self::Ipc(e) => e.is_recoverable(),
            Self::Engine(e) => e.is_recoverable(),
            Self::Lifecycle(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

/// Errors reported by a proxy engine adapter
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine is not running
    #[error("Engine is not running")]
    NotRunning,

    /// Engine is already running
    #[error("Engine is already running")]
    AlreadyRunning,

    /// Inbound tag unknown to the engine
    #[error("Inbound not found: {0}")]
    InboundNotFound(String),

    /// User not present on the inbound
    #[error("User {email} not found on inbound {tag}")]
    UserNotFound { tag: String, email: String },

    /// User already present on the inbound
    #[error("User {email} already exists on inbound {tag}")]
    UserExists { tag: String, email: String },

    /// Routing rule unknown to the engine
    #[error("Routing rule not found: {0}")]
    RuleNotFound(String),

    /// Routing rule already installed
    #[error("Routing rule already exists: {0}")]
    RuleExists(String),

    /// Configuration rejected by the engine
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Address that does not parse as an IP
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    /// Credential material rejected before reaching the engine
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Operation not supported by this adapter
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Engine process failure (spawn, exit, signal)
    #[error("Engine process error: {0}")]
    Process(String),

    /// Status query failed
    #[error("Engine unhealthy: {0}")]
    Unhealthy(String),

    /// I/O error
    #[error("Engine I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NotRunning | Self::Unhealthy(_) | Self::Process(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Check if this error means the target was already absent
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::InboundNotFound(_) | Self::UserNotFound { .. } | Self::RuleNotFound(_)
        )
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(op: impl Into<String>) -> Self {
        Self::Unsupported(op.into())
    }

    /// Create an invalid-credential error
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::InvalidCredential(msg.into())
    }
}

/// State tracker errors
#[derive(Debug, Error)]
pub enum StateError {
    /// Configuration blob could not be parsed
    #[error("Invalid configuration blob: {0}")]
    InvalidConfig(String),

    /// Value could not be fingerprinted
    #[error("Failed to fingerprint value: {0}")]
    Fingerprint(String),
}

/// Hard faults raised by the lifecycle controller
///
/// These indicate a broken local environment rather than a normal
/// reconciliation outcome, so they propagate instead of being folded into
/// a `success: false` response.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Durable snapshot write or read failed
    #[error("Config snapshot error at {path}: {reason}")]
    Snapshot { path: String, reason: String },

    /// Merging injected sections into the caller config failed
    #[error("Config merge failed: {0}")]
    ConfigMerge(String),

    /// State rebuild failed
    #[error("State rebuild failed: {0}")]
    State(#[from] StateError),
}

impl LifecycleError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Snapshot { .. })
    }

    /// Create a snapshot error
    pub fn snapshot(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Snapshot {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a config merge error
    pub fn merge(msg: impl Into<String>) -> Self {
        Self::ConfigMerge(msg.into())
    }
}

/// IPC-related errors
#[derive(Debug, Error)]
pub enum IpcError {
    /// Failed to create Unix socket
    #[error("Failed to create IPC socket at {path}: {reason}")]
    SocketCreation { path: String, reason: String },

    /// Failed to bind Unix socket
    #[error("Failed to bind IPC socket to {path}: {reason}")]
    BindError { path: String, reason: String },

    /// Connection error
    #[error("IPC connection error: {0}")]
    ConnectionError(String),

    /// Protocol error (invalid message format)
    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    /// Serialization error
    #[error("IPC serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("IPC I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl IpcError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketCreation { .. } | Self::BindError { .. } | Self::SerializationError(_) => {
                false
            }
            Self::ConnectionError(_) | Self::ProtocolError(_) => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }
}
