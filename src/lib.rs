//! rust-node: node agent between a control plane and a proxy engine
//!
//! The node receives full engine configurations and incremental user
//! mutations from a control plane, and keeps an Xray-style proxy engine in
//! step with them. Restarts are avoided whenever the pushed configuration
//! fingerprints match what is already running.
//!
//! # Architecture
//!
//! ```text
//! control plane → IPC → IpcHandler ─┬→ LifecycleController → ProxyEngine
//!                                   ├→ UserMutator ─────────┘    ↑
//!                                   ├→ RuleMirror ───────────────┤
//!                                   └→ StatsReporter ────────────┘
//!                                          ↓
//!                                     StateTracker ← ChangeDetector
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rust_node::config::load_config_with_env;
//! use rust_node::engine::build_engine;
//! use rust_node::lifecycle::{ControllerSettings, LifecycleController, StartRequest};
//! use rust_node::state::StateTracker;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config_with_env("/etc/rust-node/config.json")?;
//! let controller = LifecycleController::new(
//!     build_engine(&config.engine),
//!     Arc::new(StateTracker::new(!config.lifecycle.disable_hash_check)),
//!     ControllerSettings::from_config(&config),
//! );
//!
//! let request = StartRequest::new(serde_json::json!({"inbounds": []}));
//! let response = controller.start(request, &CancellationToken::new()).await?;
//! println!("started: {}", response.is_started);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`change`]: Canonical fingerprints and change detection
//! - [`config`]: Configuration types and loading
//! - [`engine`]: Proxy engine trait and adapters
//! - [`error`]: Error types
//! - [`ipc`]: IPC server and protocol
//! - [`lifecycle`]: Start/stop/restart with restart avoidance
//! - [`rules`]: IP block rules
//! - [`state`]: Tracked inbounds and user membership
//! - [`stats`]: Traffic statistics
//! - [`users`]: User add/remove across inbounds

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod change;
pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod lifecycle;
pub mod rules;
pub mod state;
pub mod stats;
pub mod users;

// Re-export commonly used types at the crate root
pub use change::ChangeDetector;
pub use config::Config;
pub use engine::{MemoryEngine, ProcessEngine, ProxyEngine};
pub use error::{ConfigError, EngineError, IpcError, LifecycleError, NodeError, StateError};
pub use ipc::{IpcClient, IpcCommand, IpcHandler, IpcResponse, IpcServer};
pub use lifecycle::{LifecycleController, StartRequest, StartResponse};
pub use rules::RuleMirror;
pub use state::{FingerprintManifest, StateTracker};
pub use stats::StatsReporter;
pub use users::UserMutator;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
