//! IPC Protocol definitions
//!
//! Commands and responses exchanged over the control socket. Payloads that
//! mirror control-plane contracts (start, user mutations) keep their
//! camelCase field names; IPC-only fields are `snake_case`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::SystemStats;
use crate::lifecycle::{
    EngineStatus, NodeHealth, RestartRequest, RestartResponse, StartRequest, StartResponse,
    StopResponse,
};
use crate::stats::{CombinedTraffic, InboundTraffic, OutboundTraffic, UserTraffic};
use crate::users::{
    AddUserRequest, AddUsersRequest, MutationResponse, RemoveUserRequest, RemoveUsersRequest,
};

/// IPC command types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Ping to check if the node is alive
    Ping,

    /// Node and engine status
    Status,

    /// Liveness from cached state, never touches the engine
    HealthCheck,

    // ========================================================================
    // Lifecycle
    // ========================================================================
    /// Apply a configuration, skipping the restart if nothing changed
    Start(StartRequest),

    /// Stop the engine
    Stop,

    /// Restart with a new or the last applied configuration
    Restart(RestartRequest),

    // ========================================================================
    // Users
    // ========================================================================
    AddUser(AddUserRequest),

    AddUsers(AddUsersRequest),

    RemoveUser(RemoveUserRequest),

    RemoveUsers(RemoveUsersRequest),

    /// Identities tracked on an inbound
    GetInboundUsers { tag: String },

    GetInboundUsersCount { tag: String },

    // ========================================================================
    // Statistics
    // ========================================================================
    GetUserOnlineStatus { email: String },

    GetUsersStats {
        #[serde(default)]
        reset: bool,
    },

    GetSystemStats,

    GetInboundStats {
        tag: String,
        #[serde(default)]
        reset: bool,
    },

    GetOutboundStats {
        tag: String,
        #[serde(default)]
        reset: bool,
    },

    GetAllInboundsStats {
        #[serde(default)]
        reset: bool,
    },

    GetAllOutboundsStats {
        #[serde(default)]
        reset: bool,
    },

    /// All inbound and outbound stats in one call
    GetCombinedStats {
        #[serde(default)]
        reset: bool,
    },

    // ========================================================================
    // IP blocking
    // ========================================================================
    BlockIp { ip: String },

    UnblockIp { ip: String },

    GetBlockedIps,

    ClearBlockedIps,

    /// Configuration last applied to the engine, with its hash
    GetConfig,

    /// Initiate graceful shutdown of the node
    Shutdown,
}

/// IPC response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Ping response
    Pong,

    /// Status response
    Status(NodeStatus),

    /// Health check response
    Health(NodeHealth),

    Started(StartResponse),

    Stopped(StopResponse),

    Restarted(RestartResponse),

    /// Outcome of a user mutation
    Mutation(MutationResponse),

    InboundUsers { tag: String, users: Vec<String> },

    InboundUsersCount { tag: String, count: usize },

    OnlineStatus { email: String, is_online: bool },

    UsersStats { users: Vec<UserTraffic> },

    InboundStats(InboundTraffic),

    OutboundStats(OutboundTraffic),

    AllInboundsStats { inbounds: Vec<InboundTraffic> },

    AllOutboundsStats { outbounds: Vec<OutboundTraffic> },

    CombinedStats(CombinedTraffic),

    SystemStats(SystemStats),

    Config {
        config: Value,
        config_hash: String,
    },

    BlockedIps { ips: Vec<String> },

    /// Success response (for commands that don't return data)
    Success {
        /// Optional message
        message: Option<String>,
    },

    /// Error response
    Error(ResponseError),
}

impl IpcResponse {
    /// Create a success response with no message
    pub fn success() -> Self {
        Self::Success { message: None }
    }

    /// Create a success response with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success {
            message: Some(msg.into()),
        }
    }

    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ResponseError {
            code,
            message: message.into(),
        })
    }

    /// Check if this is an error response
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Node status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Node version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Engine state as seen by the lifecycle controller
    pub engine: EngineStatus,
    /// Number of inbounds with tracked membership
    pub tracked_inbounds: usize,
    /// Number of blocked IP addresses
    pub blocked_ips: usize,
}

/// Error carried in an [`IpcResponse::Error`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    /// Error code
    pub code: ErrorCode,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ResponseError {}

/// Error codes for IPC responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Unknown error
    Unknown,
    /// Invalid command
    InvalidCommand,
    /// Invalid parameters
    InvalidParameters,
    /// Resource not found
    NotFound,
    /// Engine is not running
    EngineUnavailable,
    /// Operation failed
    OperationFailed,
    /// Node is shutting down
    ShuttingDown,
    /// Internal error
    InternalError,
}

/// Message framing for IPC
///
/// Messages are length-prefixed:
/// - 4 bytes: message length (big-endian u32)
/// - N bytes: JSON message
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1 MB
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a message with length prefix
///
/// # Errors
///
/// Returns an error if the message cannot be serialized or its JSON form
/// does not fit in a `u32` length prefix.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = u32::try_from(json.len()).map_err(serde::ser::Error::custom)?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);

    Ok(buf)
}

/// Decode the JSON body of a length-prefixed message
///
/// # Errors
///
/// Returns an error if the body is not a valid message of type `T`.
pub fn decode_message<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}
