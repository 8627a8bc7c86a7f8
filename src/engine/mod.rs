//! Proxy engine adapters
//!
//! - [`ProxyEngine`]: the operations the node needs from an engine
//! - [`MemoryEngine`]: in-process engine for dry runs and tests
//! - [`ProcessEngine`]: supervises the engine binary
//! - [`Credential`], [`EngineUser`]: validated per-protocol user material

mod credential;
mod memory;
mod process;
mod traits;

use std::sync::Arc;

use crate::config::{EngineConfig, EngineKind};

pub use credential::{CipherType, Credential, EngineUser, Protocol};
pub use memory::{CallCounts, MemoryEngine, MEMORY_ENGINE_VERSION};
pub use process::{parse_version, ProcessEngine, ENGINE_CONFIG_FILE};
pub use traits::{ProxyEngine, SystemStats};

/// Build the adapter selected by `config`
pub fn build_engine(config: &EngineConfig) -> Arc<dyn ProxyEngine> {
    match config.kind {
        EngineKind::Process => Arc::new(ProcessEngine::new(&config.binary, &config.config_dir)),
        EngineKind::Memory => Arc::new(MemoryEngine::new()),
    }
}
