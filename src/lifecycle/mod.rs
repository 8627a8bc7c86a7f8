//! Engine lifecycle management
//!
//! - [`LifecycleController`]: single-flight start/restart, stop, recovery
//! - [`build_engine_config`]: pure merge of control sections
//! - [`SnapshotStore`]: durable copy of the last applied configuration
//! - [`health`]: probe and bounded verification
//! - [`SystemInformation`]: host facts reported on start

mod controller;
pub mod health;
mod merge;
mod restore;
mod snapshot;
mod sysinfo;
mod types;

pub use controller::{AppliedConfig, ControllerSettings, LifecycleController};
pub use health::{HealthOutcome, RetryPolicy};
pub use merge::{build_engine_config, InjectedSections, API_SERVICES};
pub use restore::{RestoreJob, RestoreOutcome};
pub use snapshot::SnapshotStore;
pub use sysinfo::{parse_cpu_model, parse_mem_total, SystemInformation};
pub use types::{
    EngineStatus, LifecycleState, NodeHealth, NodeInformation, RestartRequest, RestartResponse,
    StartInternals, StartRequest, StartResponse, StopResponse, START_IN_PROGRESS,
};
