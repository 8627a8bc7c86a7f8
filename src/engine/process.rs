//! Engine binary supervisor
//!
//! [`ProcessEngine`] runs the engine as a child process: the configuration is
//! written next to the snapshot and the binary is started with
//! `run -c <path>`. Liveness is the child's exit status.
//!
//! The engine's own gRPC control API is not spoken here, so runtime user,
//! rule and stats operations report [`EngineError::Unsupported`]; changes of
//! that kind reach the engine through a restart with a new configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::credential::EngineUser;
use super::traits::{ProxyEngine, SystemStats};
use crate::error::EngineError;

/// Name of the working config file inside the config directory
pub const ENGINE_CONFIG_FILE: &str = "engine.json";

/// Extract `x.y.z` from `<binary> version` output
///
/// Prefers the number following `Xray`, then any dotted triple, and falls
/// back to `"unknown"`.
pub fn parse_version(output: &str) -> String {
    static XRAY: OnceLock<Option<Regex>> = OnceLock::new();
    static ANY: OnceLock<Option<Regex>> = OnceLock::new();

    let xray = XRAY.get_or_init(|| Regex::new(r"Xray\s+(\d+\.\d+\.\d+)").ok());
    let any = ANY.get_or_init(|| Regex::new(r"(\d+\.\d+\.\d+)").ok());

    [xray, any]
        .into_iter()
        .flatten()
        .find_map(|re| re.captures(output))
        .and_then(|caps| caps.get(1))
        .map_or_else(|| "unknown".to_string(), |m| m.as_str().to_string())
}

struct Running {
    child: Child,
    started_at: Instant,
}

/// Supervises the engine binary as a child process
pub struct ProcessEngine {
    binary: PathBuf,
    config_path: PathBuf,
    running: Mutex<Option<Running>>,
}

impl ProcessEngine {
    /// Create a supervisor for `binary`, keeping its config in `config_dir`
    pub fn new(binary: impl Into<PathBuf>, config_dir: impl AsRef<Path>) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_dir.as_ref().join(ENGINE_CONFIG_FILE),
            running: Mutex::new(None),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    async fn spawn(&self, config: &[u8]) -> Result<Running, EngineError> {
        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.config_path, config).await?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("run")
            .arg("-c")
            .arg(&self.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            EngineError::process(format!("failed to spawn {}: {e}", self.binary.display()))
        })?;

        // An engine that rejects its config exits almost immediately
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Some(status) = child.try_wait()? {
            return Err(EngineError::process(format!(
                "engine exited during startup with {status}"
            )));
        }

        info!(
            "Engine process started: pid={:?}, config={:?}",
            child.id(),
            self.config_path
        );

        Ok(Running {
            child,
            started_at: Instant::now(),
        })
    }

    async fn kill(running: &mut Running) -> Result<(), EngineError> {
        if running.child.try_wait()?.is_none() {
            running.child.kill().await?;
        }
        debug!("Engine process reaped");
        Ok(())
    }
}

#[async_trait]
impl ProxyEngine for ProcessEngine {
    async fn start(&self, config: &[u8]) -> Result<(), EngineError> {
        let mut guard = self.running.lock().await;
        if let Some(running) = guard.as_mut() {
            if running.child.try_wait()?.is_none() {
                return Err(EngineError::AlreadyRunning);
            }
        }
        *guard = Some(self.spawn(config).await?);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let mut guard = self.running.lock().await;
        if let Some(mut running) = guard.take() {
            Self::kill(&mut running).await?;
            info!("Engine process stopped");
        }
        Ok(())
    }

    async fn restart(&self, config: &[u8]) -> Result<(), EngineError> {
        let mut guard = self.running.lock().await;
        if let Some(mut running) = guard.take() {
            Self::kill(&mut running).await?;
        }
        *guard = Some(self.spawn(config).await?);
        Ok(())
    }

    async fn is_running(&self) -> bool {
        let mut guard = self.running.lock().await;
        match guard.as_mut() {
            Some(running) => matches!(running.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn version(&self) -> String {
        match Command::new(&self.binary).arg("version").output().await {
            Ok(output) => parse_version(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                warn!("Failed to query engine version: {}", e);
                "unknown".to_string()
            }
        }
    }

    async fn add_user(&self, _tag: &str, _user: &EngineUser) -> Result<(), EngineError> {
        Err(EngineError::unsupported("add_user"))
    }

    async fn remove_user(&self, _tag: &str, _email: &str) -> Result<(), EngineError> {
        Err(EngineError::unsupported("remove_user"))
    }

    async fn get_stats(
        &self,
        _pattern: &str,
        _reset: bool,
    ) -> Result<HashMap<String, i64>, EngineError> {
        Err(EngineError::unsupported("get_stats"))
    }

    async fn get_system_stats(&self) -> Result<SystemStats, EngineError> {
        let mut guard = self.running.lock().await;
        let running = guard.as_mut().ok_or(EngineError::NotRunning)?;

        if let Some(status) = running.child.try_wait()? {
            return Err(EngineError::Unhealthy(format!("engine exited with {status}")));
        }

        Ok(SystemStats {
            uptime: running.started_at.elapsed().as_secs(),
            ..SystemStats::default()
        })
    }

    async fn get_user_online_status(&self, _email: &str) -> Result<bool, EngineError> {
        Err(EngineError::unsupported("get_user_online_status"))
    }

    async fn add_routing_rule(
        &self,
        _rule_id: &str,
        _ip: &str,
        _outbound_tag: &str,
    ) -> Result<(), EngineError> {
        Err(EngineError::unsupported("add_routing_rule"))
    }

    async fn remove_routing_rule(&self, _rule_id: &str) -> Result<(), EngineError> {
        Err(EngineError::unsupported("remove_routing_rule"))
    }
}
