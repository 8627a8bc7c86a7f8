//! Lifecycle requests, responses and state

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::sysinfo::SystemInformation;
use crate::state::FingerprintManifest;

/// Message returned when a start or restart is already executing
pub const START_IN_PROGRESS: &str = "engine start already in progress";

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Processing,
    Running,
    Failed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Processing => write!(f, "processing"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Start options supplied by the control plane
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInternals {
    /// Restart even if fingerprints match
    #[serde(default)]
    pub force_restart: bool,

    /// Fingerprints of the pushed configuration
    #[serde(default, alias = "manifest")]
    pub hashes: Option<FingerprintManifest>,
}

/// Start the engine with a configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub internals: StartInternals,
    pub config: Value,
}

impl StartRequest {
    pub fn new(config: Value) -> Self {
        Self {
            internals: StartInternals::default(),
            config,
        }
    }

    #[must_use]
    pub fn with_manifest(mut self, manifest: FingerprintManifest) -> Self {
        self.internals.hashes = Some(manifest);
        self
    }

    #[must_use]
    pub fn force(mut self) -> Self {
        self.internals.force_restart = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInformation {
    pub version: String,
}

impl NodeInformation {
    pub fn current() -> Self {
        Self {
            version: crate::VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub is_started: bool,
    pub version: Option<String>,
    pub error: Option<String>,
    pub system_information: Option<SystemInformation>,
    pub node_information: NodeInformation,
    /// The engine was left untouched because nothing changed
    #[serde(default)]
    pub skipped: bool,
}

impl StartResponse {
    pub fn started(version: String, skipped: bool) -> Self {
        Self {
            is_started: true,
            version: Some(version),
            error: None,
            system_information: Some(SystemInformation::collect()),
            node_information: NodeInformation::current(),
            skipped,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            is_started: false,
            version: None,
            error: Some(error.into()),
            system_information: None,
            node_information: NodeInformation::current(),
            skipped: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub is_stopped: bool,
}

/// Restart the engine, optionally with a new configuration
///
/// Without `config` the last applied configuration is reused.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartRequest {
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default, alias = "manifest")]
    pub hashes: Option<FingerprintManifest>,
    #[serde(default)]
    pub force_restart: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartResponse {
    pub success: bool,
    pub message: String,
    pub version: Option<String>,
    #[serde(default)]
    pub skipped: bool,
}

impl RestartResponse {
    pub fn restarted(version: String, skipped: bool) -> Self {
        let message = if skipped {
            "configuration unchanged, restart skipped"
        } else {
            "engine restarted"
        };
        Self {
            success: true,
            message: message.to_string(),
            version: Some(version),
            skipped,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            version: None,
            skipped: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub is_running: bool,
    pub state: LifecycleState,
    pub version: Option<String>,
}

/// Node liveness as reported to the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealth {
    pub is_alive: bool,
    /// Last known engine state, no probe is made
    pub engine_online: bool,
    pub engine_version: Option<String>,
    pub node_version: String,
    pub uptime_secs: u64,
}
