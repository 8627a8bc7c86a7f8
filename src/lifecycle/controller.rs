//! Engine lifecycle controller
//!
//! [`LifecycleController`] owns every decision to start, stop or restart the
//! engine. Start and restart are single-flight: a second caller arriving while
//! one is executing is turned away at once instead of queueing. Underneath
//! that guard an async state lock serializes start/restart with stop.
//!
//! A start runs these steps in order:
//!
//! 1. Skip check: the engine is running, hashing is enabled, the caller sent
//!    fingerprints and did not force, the engine answers one probe, and the
//!    tracker sees no change.
//! 2. Merge the control sections into the caller configuration.
//! 3. Write the snapshot.
//! 4. Rebuild tracked state.
//! 5. Start (or restart) the engine and verify its health.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::health::{self, RetryPolicy};
use super::merge::{build_engine_config, InjectedSections};
use super::restore::{RestoreJob, RestoreOutcome};
use super::snapshot::SnapshotStore;
use super::types::{
    EngineStatus, LifecycleState, NodeHealth, RestartRequest, RestartResponse, StartRequest,
    StartResponse, StopResponse, START_IN_PROGRESS,
};
use crate::config::Config;
use crate::engine::ProxyEngine;
use crate::error::LifecycleError;
use crate::change::hash_bytes;
use crate::state::{extract_inbound_users, FingerprintManifest, StateTracker};

/// Construction-time controller settings
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub sections: InjectedSections,
    pub health: RetryPolicy,
    pub snapshot_path: PathBuf,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sections: InjectedSections::from_config(&config.engine),
            health: RetryPolicy::from_config(&config.lifecycle),
            snapshot_path: config.engine.snapshot_path(),
        }
    }
}

/// Releases the single-flight flag when dropped
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum LaunchOutcome {
    Started(String),
    Failed(String),
}

/// Orchestrates engine start, stop, restart and recovery
pub struct LifecycleController {
    engine: Arc<dyn ProxyEngine>,
    tracker: Arc<StateTracker>,
    snapshots: SnapshotStore,
    sections: InjectedSections,
    health: RetryPolicy,

    in_flight: AtomicBool,
    state_lock: Mutex<()>,
    phase: RwLock<LifecycleState>,
    version: RwLock<Option<String>>,
    last_config: RwLock<Option<Arc<Vec<u8>>>>,
    /// Bumped whenever the engine process is (re)started or stopped
    generation: AtomicU64,
    started_at: Instant,
}

/// The configuration last handed to the engine
#[derive(Debug, Clone)]
pub struct AppliedConfig {
    pub blob: Arc<Vec<u8>>,
    /// SHA-256 of `blob`
    pub hash: String,
}

impl LifecycleController {
    pub fn new(
        engine: Arc<dyn ProxyEngine>,
        tracker: Arc<StateTracker>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            engine,
            tracker,
            snapshots: SnapshotStore::new(settings.snapshot_path),
            sections: settings.sections,
            health: settings.health,
            in_flight: AtomicBool::new(false),
            state_lock: Mutex::new(()),
            phase: RwLock::new(LifecycleState::Stopped),
            version: RwLock::new(None),
            last_config: RwLock::new(None),
            generation: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn engine(&self) -> &Arc<dyn ProxyEngine> {
        &self.engine
    }

    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Current state; `Processing` while a start or restart executes
    pub fn state(&self) -> LifecycleState {
        if self.in_flight.load(Ordering::Acquire) {
            LifecycleState::Processing
        } else {
            *self.phase.read()
        }
    }

    /// Whether the last completed transition left the engine running
    pub fn is_engine_available(&self) -> bool {
        *self.phase.read() == LifecycleState::Running
    }

    /// Engine version cached by the last successful start
    pub fn version(&self) -> Option<String> {
        self.version.read().clone()
    }

    /// Engine instance counter
    ///
    /// Changes whenever runtime engine state (users and routing rules added
    /// over the API) may have been discarded by a start, restart or stop.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Configuration last applied by start, restart or restore
    pub fn current_config(&self) -> Option<AppliedConfig> {
        self.last_config.read().as_ref().map(|blob| AppliedConfig {
            hash: hash_bytes(blob),
            blob: Arc::clone(blob),
        })
    }

    /// Time since the controller was created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn set_phase(&self, phase: LifecycleState) {
        let previous = std::mem::replace(&mut *self.phase.write(), phase);
        if previous != phase {
            debug!("Lifecycle state {} -> {}", previous, phase);
        }
    }

    /// Apply a configuration, skipping the engine if nothing changed
    ///
    /// Soft failures (engine refused to start, health check failed, another
    /// start in progress) come back as `is_started: false`.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError` if the configuration cannot be merged, the
    /// snapshot cannot be written, or tracked state cannot be rebuilt.
    pub async fn start(
        &self,
        request: StartRequest,
        cancel: &CancellationToken,
    ) -> Result<StartResponse, LifecycleError> {
        let Some(_flight) = FlightGuard::acquire(&self.in_flight) else {
            warn!("Start rejected: {}", START_IN_PROGRESS);
            return Ok(StartResponse::failed(START_IN_PROGRESS));
        };
        let _state = self.state_lock.lock().await;

        let manifest = request.internals.hashes.as_ref();
        if let Some(version) = self
            .check_skip(manifest, request.internals.force_restart)
            .await
        {
            return Ok(StartResponse::started(version, true));
        }

        let blob = build_engine_config(&request.config, &self.sections)?;
        match self.apply(blob, manifest, cancel).await? {
            LaunchOutcome::Started(version) => Ok(StartResponse::started(version, false)),
            LaunchOutcome::Failed(reason) => Ok(StartResponse::failed(reason)),
        }
    }

    /// Stop the engine and forget tracked state
    pub async fn stop(&self) -> StopResponse {
        let _state = self.state_lock.lock().await;

        match self.engine.stop().await {
            Ok(()) => {
                self.generation.fetch_add(1, Ordering::AcqRel);
                self.set_phase(LifecycleState::Stopped);
                self.tracker.cleanup();
                info!("Engine stopped");
                StopResponse { is_stopped: true }
            }
            Err(e) => {
                error!("Failed to stop engine: {}", e);
                StopResponse { is_stopped: false }
            }
        }
    }

    /// Restart the engine, reusing the last configuration when none is given
    ///
    /// # Errors
    ///
    /// Same hard faults as [`start`](Self::start), plus an unreadable snapshot.
    pub async fn restart(
        &self,
        request: RestartRequest,
        cancel: &CancellationToken,
    ) -> Result<RestartResponse, LifecycleError> {
        let Some(_flight) = FlightGuard::acquire(&self.in_flight) else {
            warn!("Restart rejected: {}", START_IN_PROGRESS);
            return Ok(RestartResponse::failed(START_IN_PROGRESS));
        };
        let _state = self.state_lock.lock().await;

        let manifest = request.hashes.as_ref();
        if let Some(version) = self.check_skip(manifest, request.force_restart).await {
            return Ok(RestartResponse::restarted(version, true));
        }

        let blob = match &request.config {
            Some(config) => build_engine_config(config, &self.sections)?,
            None => match self.stored_config()? {
                Some(blob) => blob,
                None => {
                    warn!("Restart requested without configuration and no snapshot exists");
                    return Ok(RestartResponse::failed(
                        "no configuration available to restart with",
                    ));
                }
            },
        };

        match self.apply(blob, manifest, cancel).await? {
            LaunchOutcome::Started(version) => Ok(RestartResponse::restarted(version, false)),
            LaunchOutcome::Failed(reason) => Ok(RestartResponse::failed(reason)),
        }
    }

    /// Start the engine from the durable snapshot
    ///
    /// No fingerprints are available here, so the next control-plane start
    /// will always restart.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError` if the snapshot cannot be read or parsed.
    pub async fn restore_start(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RestoreOutcome, LifecycleError> {
        let Some(_flight) = FlightGuard::acquire(&self.in_flight) else {
            debug!("Restore skipped, a start is in progress");
            return Ok(RestoreOutcome::Busy);
        };
        let _state = self.state_lock.lock().await;

        if self.engine.is_running().await {
            debug!("Restore skipped, engine already running");
            return Ok(RestoreOutcome::AlreadyRunning);
        }

        let Some(blob) = self.snapshots.read()? else {
            info!("No config snapshot at {:?}, nothing to restore", self.snapshots.path());
            return Ok(RestoreOutcome::NoSnapshot);
        };

        info!("Restoring engine from snapshot {:?}", self.snapshots.path());
        self.tracker.rebuild(&blob, None)?;
        *self.last_config.write() = Some(Arc::new(blob.clone()));

        Ok(match self.launch(&blob, cancel).await {
            LaunchOutcome::Started(version) => RestoreOutcome::Started { version },
            LaunchOutcome::Failed(error) => RestoreOutcome::Failed { error },
        })
    }

    /// Run [`restore_start`](Self::restore_start) in the background after `delay`
    pub fn spawn_restore(self: &Arc<Self>, delay: Duration, cancel: CancellationToken) -> RestoreJob {
        let controller = Arc::clone(self);
        RestoreJob::new(tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Ok(RestoreOutcome::Cancelled),
            }

            let outcome = controller.restore_start(&cancel).await;
            match &outcome {
                Ok(RestoreOutcome::Started { version }) => {
                    info!("Engine restored from snapshot, version {}", version);
                }
                Ok(RestoreOutcome::Failed { error }) => warn!("Engine restore failed: {}", error),
                Ok(other) => debug!("Restore finished: {:?}", other),
                Err(e) => error!("Engine restore fault: {}", e),
            }
            outcome
        }))
    }

    /// Engine status, with a live running check
    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            is_running: self.engine.is_running().await,
            state: self.state(),
            version: self.version(),
        }
    }

    /// Node liveness from cached state only
    pub fn health_check(&self) -> NodeHealth {
        NodeHealth {
            is_alive: true,
            engine_online: self.is_engine_available(),
            engine_version: self.version(),
            node_version: crate::VERSION.to_string(),
            uptime_secs: self.uptime().as_secs(),
        }
    }

    /// Cached version if the start can be skipped, `None` otherwise
    async fn check_skip(
        &self,
        manifest: Option<&FingerprintManifest>,
        force_restart: bool,
    ) -> Option<String> {
        if force_restart || !self.tracker.is_hash_check_enabled() {
            return None;
        }
        let manifest = manifest?;
        if *self.phase.read() != LifecycleState::Running {
            return None;
        }

        match health::probe(self.engine.as_ref()).await {
            Ok(_) => {
                if self.tracker.is_restart_needed(manifest) {
                    return None;
                }
                info!("Configuration unchanged, skipping engine restart");
                let cached = self.version();
                match cached {
                    Some(version) => Some(version),
                    None => Some(self.engine.version().await),
                }
            }
            Err(e) => {
                warn!("Engine unhealthy ({}), performing full start", e);
                self.set_phase(LifecycleState::Failed);
                None
            }
        }
    }

    fn stored_config(&self) -> Result<Option<Vec<u8>>, LifecycleError> {
        if let Some(blob) = self.last_config.read().as_ref() {
            return Ok(Some(blob.as_ref().clone()));
        }
        self.snapshots.read()
    }

    async fn apply(
        &self,
        blob: Vec<u8>,
        manifest: Option<&FingerprintManifest>,
        cancel: &CancellationToken,
    ) -> Result<LaunchOutcome, LifecycleError> {
        // Parse before persisting so a rejected config leaves no snapshot
        let inbounds = extract_inbound_users(&blob)?;
        self.snapshots.write(&blob)?;
        self.tracker.rebuild_from(inbounds, manifest);
        let blob = Arc::new(blob);
        *self.last_config.write() = Some(Arc::clone(&blob));

        Ok(self.launch(&blob, cancel).await)
    }

    async fn launch(&self, blob: &[u8], cancel: &CancellationToken) -> LaunchOutcome {
        let result = if self.engine.is_running().await {
            self.engine.restart(blob).await
        } else {
            self.engine.start(blob).await
        };
        // Even a failed (re)start may have dropped the old instance
        self.generation.fetch_add(1, Ordering::AcqRel);

        if let Err(e) = result {
            error!("Engine failed to start: {}", e);
            self.set_phase(LifecycleState::Failed);
            return LaunchOutcome::Failed(format!("failed to start engine: {e}"));
        }

        let outcome = health::verify(self.engine.as_ref(), self.health, cancel).await;
        if !outcome.is_healthy() {
            let reason = outcome.describe();
            error!("Engine started but {}", reason);
            self.set_phase(LifecycleState::Failed);
            return LaunchOutcome::Failed(reason);
        }

        let version = self.engine.version().await;
        *self.version.write() = Some(version.clone());
        self.set_phase(LifecycleState::Running);
        info!("Engine running, version {}", version);

        LaunchOutcome::Started(version)
    }
}
