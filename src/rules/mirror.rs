//! Local mirror of engine block rules
//!
//! Every blocked IP maps to one engine routing rule whose id is the MD5 hex
//! digest of the normalized address. The map lock is held across the engine
//! call, so concurrent blocks of the same address reach the engine once.
//!
//! Rules added over the engine API do not survive an engine start or stop.
//! The mirror compares the controller's engine generation on every call and
//! starts over when it has moved.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use futures::future::join_all;
use md5::{Digest, Md5};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::lifecycle::LifecycleController;

/// Routing rule id for a normalized IP address
pub fn rule_id(ip: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize(ip: &str) -> Result<String, EngineError> {
    ip.trim()
        .parse::<IpAddr>()
        .map(|addr| addr.to_string())
        .map_err(|_| EngineError::InvalidAddress(ip.to_string()))
}

/// Rules recorded against one engine instance
#[derive(Default)]
struct BlockedSet {
    generation: u64,
    /// ip -> rule id
    rules: HashMap<String, String>,
}

/// Blocked addresses and their engine rules
pub struct RuleMirror {
    lifecycle: Arc<LifecycleController>,
    outbound_tag: String,
    blocked: RwLock<BlockedSet>,
}

impl RuleMirror {
    pub fn new(lifecycle: Arc<LifecycleController>, outbound_tag: impl Into<String>) -> Self {
        let generation = lifecycle.generation();
        Self {
            lifecycle,
            outbound_tag: outbound_tag.into(),
            blocked: RwLock::new(BlockedSet {
                generation,
                rules: HashMap::new(),
            }),
        }
    }

    pub fn outbound_tag(&self) -> &str {
        &self.outbound_tag
    }

    /// Lock the set, forgetting rules the engine lost on a start or stop
    async fn current(&self) -> RwLockWriteGuard<'_, BlockedSet> {
        let mut blocked = self.blocked.write().await;
        let generation = self.lifecycle.generation();
        if blocked.generation != generation {
            if !blocked.rules.is_empty() {
                info!(
                    "Engine instance changed, forgetting {} blocked IPs",
                    blocked.rules.len()
                );
            }
            blocked.rules.clear();
            blocked.generation = generation;
        }
        blocked
    }

    fn require_engine(&self) -> Result<(), EngineError> {
        if self.lifecycle.is_engine_available() {
            Ok(())
        } else {
            Err(EngineError::NotRunning)
        }
    }

    /// Route `ip` to the block outbound; a no-op if already blocked
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidAddress` for an unparseable address,
    /// `EngineError::NotRunning` if a new rule is needed while the engine is
    /// unavailable, or the engine's error if the rule could not be added.
    pub async fn block(&self, ip: &str) -> Result<(), EngineError> {
        let ip = normalize(ip)?;

        let mut blocked = self.current().await;
        if blocked.rules.contains_key(&ip) {
            debug!("IP {} already blocked", ip);
            return Ok(());
        }
        self.require_engine()?;

        let id = rule_id(&ip);
        match self
            .lifecycle
            .engine()
            .add_routing_rule(&id, &ip, &self.outbound_tag)
            .await
        {
            Ok(()) | Err(EngineError::RuleExists(_)) => {}
            Err(e) => {
                warn!("Failed to block {}: {}", ip, e);
                return Err(e);
            }
        }

        info!("Blocked {} (rule {})", ip, id);
        blocked.rules.insert(ip, id);
        Ok(())
    }

    /// Drop the block rule for `ip`; a no-op if it was never blocked
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidAddress` for an unparseable address,
    /// `EngineError::NotRunning` if a recorded rule must be removed while the
    /// engine is unavailable, or the engine's error if removal failed.
    pub async fn unblock(&self, ip: &str) -> Result<(), EngineError> {
        let ip = normalize(ip)?;

        let mut blocked = self.current().await;
        let Some(id) = blocked.rules.get(&ip).cloned() else {
            debug!("IP {} was not blocked", ip);
            return Ok(());
        };
        self.require_engine()?;

        match self.lifecycle.engine().remove_routing_rule(&id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!("Failed to unblock {}: {}", ip, e);
                return Err(e);
            }
        }

        info!("Unblocked {}", ip);
        blocked.rules.remove(&ip);
        Ok(())
    }

    /// Remove every block rule, returning how many were tracked
    ///
    /// Engine failures are logged; the mirror is emptied regardless.
    pub async fn clear_all(&self) -> usize {
        let mut blocked = self.current().await;
        let engine = self.lifecycle.engine();

        let removals = blocked.rules.iter().map(|(ip, id)| {
            let engine = &engine;
            async move { (ip, engine.remove_routing_rule(id).await) }
        });
        for (ip, result) in join_all(removals).await {
            if let Err(e) = result {
                if !e.is_not_found() {
                    warn!("Failed to remove block rule for {}: {}", ip, e);
                }
            }
        }

        let count = blocked.rules.len();
        blocked.rules.clear();
        info!("Cleared {} blocked IPs", count);
        count
    }

    /// Blocked addresses, sorted
    pub async fn blocked_ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = self.current().await.rules.keys().cloned().collect();
        ips.sort();
        ips
    }
}
