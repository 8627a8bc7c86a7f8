//! Proxy engine adapter trait
//!
//! The node never talks to the engine directly; everything goes through
//! [`ProxyEngine`]. Implementations must be cheap to share behind an `Arc`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::credential::EngineUser;
use crate::error::EngineError;

/// Runtime statistics reported by the engine's status query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub uptime: u64,
    pub num_goroutine: u32,
    pub num_gc: u32,
    pub alloc: u64,
    pub total_alloc: u64,
    pub sys: u64,
    pub mallocs: u64,
    pub frees: u64,
    pub live_objects: u64,
    pub pause_total_ns: u64,
}

/// Operations the node invokes on the managed proxy engine
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    /// Start the engine with a complete configuration
    async fn start(&self, config: &[u8]) -> Result<(), EngineError>;

    /// Stop the engine
    async fn stop(&self) -> Result<(), EngineError>;

    /// Replace the running configuration
    async fn restart(&self, config: &[u8]) -> Result<(), EngineError>;

    async fn is_running(&self) -> bool;

    /// Engine version, `"unknown"` if it cannot be determined
    async fn version(&self) -> String;

    /// Install `user` on inbound `tag`
    async fn add_user(&self, tag: &str, user: &EngineUser) -> Result<(), EngineError>;

    /// Remove the user named `email` from inbound `tag`
    async fn remove_user(&self, tag: &str, email: &str) -> Result<(), EngineError>;

    /// Counters whose name contains `pattern`, optionally resetting them
    async fn get_stats(&self, pattern: &str, reset: bool)
        -> Result<HashMap<String, i64>, EngineError>;

    /// Engine status query; also serves as the health probe
    async fn get_system_stats(&self) -> Result<SystemStats, EngineError>;

    async fn get_user_online_status(&self, email: &str) -> Result<bool, EngineError>;

    /// Route traffic from `ip` to `outbound_tag` under rule `rule_id`
    async fn add_routing_rule(
        &self,
        rule_id: &str,
        ip: &str,
        outbound_tag: &str,
    ) -> Result<(), EngineError>;

    async fn remove_routing_rule(&self, rule_id: &str) -> Result<(), EngineError>;
}
