//! In-process engine
//!
//! [`MemoryEngine`] keeps inbounds, users, routing rules and traffic counters
//! in memory. It backs dry-run nodes (`engine.kind = "memory"`) and the test
//! suite, and exposes fault-injection hooks for the latter.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::credential::{Credential, EngineUser};
use super::traits::{ProxyEngine, SystemStats};
use crate::error::EngineError;
use crate::state::extract_inbound_users;

/// Version reported unless overridden
pub const MEMORY_ENGINE_VERSION: &str = "25.1.1";

#[derive(Debug, Clone, PartialEq, Eq)]
struct RoutingRule {
    ip: String,
    outbound_tag: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    running: bool,
    started_at: Option<Instant>,
    config: Vec<u8>,
    // Users loaded from a config have no credential attached
    inbounds: HashMap<String, BTreeMap<String, Option<Credential>>>,
    rules: HashMap<String, RoutingRule>,
    counters: HashMap<String, i64>,
    online: HashSet<String>,
}

impl MemoryState {
    fn require_running(&self) -> Result<(), EngineError> {
        if self.running {
            Ok(())
        } else {
            Err(EngineError::NotRunning)
        }
    }

    fn load(&mut self, config: &[u8]) -> Result<(), EngineError> {
        let inbounds =
            extract_inbound_users(config).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        self.inbounds = inbounds
            .into_iter()
            .map(|inbound| {
                let users = inbound.users.into_iter().map(|u| (u, None)).collect();
                (inbound.tag, users)
            })
            .collect();
        self.rules.clear();
        self.online.clear();
        self.config = config.to_vec();
        self.running = true;
        self.started_at = Some(Instant::now());
        Ok(())
    }
}

/// Snapshot of how often each engine operation was invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub start: u64,
    pub stop: u64,
    pub restart: u64,
    pub add_user: u64,
    pub remove_user: u64,
    pub add_rule: u64,
    pub remove_rule: u64,
    pub probe: u64,
}

#[derive(Debug, Default)]
struct CallCounters {
    start: AtomicU64,
    stop: AtomicU64,
    restart: AtomicU64,
    add_user: AtomicU64,
    remove_user: AtomicU64,
    add_rule: AtomicU64,
    remove_rule: AtomicU64,
    probe: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Take one unit from a failure budget, returning whether one was available
fn take(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Proxy engine living entirely in process memory
#[derive(Debug)]
pub struct MemoryEngine {
    state: RwLock<MemoryState>,
    version: String,
    start_delay: Duration,
    failing_starts: AtomicU32,
    failing_probes: AtomicU32,
    calls: CallCounters,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            version: MEMORY_ENGINE_VERSION.to_string(),
            start_delay: Duration::ZERO,
            failing_starts: AtomicU32::new(0),
            failing_probes: AtomicU32::new(0),
            calls: CallCounters::default(),
        }
    }

    /// Report a different version string
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Make every start/restart take at least `delay`
    #[must_use]
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Fail the next `n` start/restart calls
    pub fn fail_next_starts(&self, n: u32) {
        self.failing_starts.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` status queries
    pub fn fail_next_probes(&self, n: u32) {
        self.failing_probes.store(n, Ordering::SeqCst);
    }

    /// Simulate the engine dying underneath the node
    pub fn crash(&self) {
        let mut state = self.state.write();
        state.running = false;
        state.started_at = None;
    }

    /// Add traffic to a user's counters
    pub fn record_user_traffic(&self, email: &str, uplink: i64, downlink: i64) {
        self.record_traffic("user", email, uplink, downlink);
    }

    /// Add traffic to an inbound's counters
    pub fn record_inbound_traffic(&self, tag: &str, uplink: i64, downlink: i64) {
        self.record_traffic("inbound", tag, uplink, downlink);
    }

    /// Add traffic to an outbound's counters
    pub fn record_outbound_traffic(&self, tag: &str, uplink: i64, downlink: i64) {
        self.record_traffic("outbound", tag, uplink, downlink);
    }

    fn record_traffic(&self, kind: &str, name: &str, uplink: i64, downlink: i64) {
        let mut state = self.state.write();
        *state
            .counters
            .entry(format!("{kind}>>>{name}>>>traffic>>>uplink"))
            .or_default() += uplink;
        *state
            .counters
            .entry(format!("{kind}>>>{name}>>>traffic>>>downlink"))
            .or_default() += downlink;
    }

    /// Mark a user as connected or not
    pub fn set_online(&self, email: &str, online: bool) {
        let mut state = self.state.write();
        if online {
            state.online.insert(email.to_string());
        } else {
            state.online.remove(email);
        }
    }

    /// Users installed on `tag`, sorted
    pub fn users(&self, tag: &str) -> Vec<String> {
        self.state
            .read()
            .inbounds
            .get(tag)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Credential attached to a user, if it was added at runtime
    pub fn credential(&self, tag: &str, email: &str) -> Option<Credential> {
        self.state
            .read()
            .inbounds
            .get(tag)
            .and_then(|users| users.get(email).cloned().flatten())
    }

    /// Installed routing rules as `rule_id -> ip`
    pub fn rules(&self) -> HashMap<String, String> {
        self.state
            .read()
            .rules
            .iter()
            .map(|(id, rule)| (id.clone(), rule.ip.clone()))
            .collect()
    }

    /// Outbound a rule routes to
    pub fn rule_outbound(&self, rule_id: &str) -> Option<String> {
        self.state
            .read()
            .rules
            .get(rule_id)
            .map(|rule| rule.outbound_tag.clone())
    }

    /// Configuration the engine was last started with
    pub fn active_config(&self) -> Vec<u8> {
        self.state.read().config.clone()
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.calls;
        CallCounts {
            start: c.start.load(Ordering::Relaxed),
            stop: c.stop.load(Ordering::Relaxed),
            restart: c.restart.load(Ordering::Relaxed),
            add_user: c.add_user.load(Ordering::Relaxed),
            remove_user: c.remove_user.load(Ordering::Relaxed),
            add_rule: c.add_rule.load(Ordering::Relaxed),
            remove_rule: c.remove_rule.load(Ordering::Relaxed),
            probe: c.probe.load(Ordering::Relaxed),
        }
    }

    async fn boot(&self, config: &[u8]) -> Result<(), EngineError> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }

        if take(&self.failing_starts) {
            self.state.write().running = false;
            return Err(EngineError::process("injected start failure"));
        }

        self.state.write().load(config)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyEngine for MemoryEngine {
    async fn start(&self, config: &[u8]) -> Result<(), EngineError> {
        bump(&self.calls.start);
        if self.state.read().running {
            return Err(EngineError::AlreadyRunning);
        }
        self.boot(config).await?;
        info!("Memory engine started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        bump(&self.calls.stop);
        let mut state = self.state.write();
        state.running = false;
        state.started_at = None;
        state.inbounds.clear();
        state.rules.clear();
        state.online.clear();
        info!("Memory engine stopped");
        Ok(())
    }

    async fn restart(&self, config: &[u8]) -> Result<(), EngineError> {
        bump(&self.calls.restart);
        self.state.write().running = false;
        self.boot(config).await?;
        info!("Memory engine restarted");
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.state.read().running
    }

    async fn version(&self) -> String {
        self.version.clone()
    }

    async fn add_user(&self, tag: &str, user: &EngineUser) -> Result<(), EngineError> {
        bump(&self.calls.add_user);
        let mut state = self.state.write();
        state.require_running()?;

        let users = state
            .inbounds
            .get_mut(tag)
            .ok_or_else(|| EngineError::InboundNotFound(tag.to_string()))?;
        if users.contains_key(&user.email) {
            return Err(EngineError::UserExists {
                tag: tag.to_string(),
                email: user.email.clone(),
            });
        }
        users.insert(user.email.clone(), Some(user.credential.clone()));
        debug!("Added {} user {} to {}", user.credential.protocol(), user.email, tag);
        Ok(())
    }

    async fn remove_user(&self, tag: &str, email: &str) -> Result<(), EngineError> {
        bump(&self.calls.remove_user);
        let mut state = self.state.write();
        state.require_running()?;

        let users = state
            .inbounds
            .get_mut(tag)
            .ok_or_else(|| EngineError::InboundNotFound(tag.to_string()))?;
        if users.remove(email).is_none() {
            return Err(EngineError::UserNotFound {
                tag: tag.to_string(),
                email: email.to_string(),
            });
        }
        debug!("Removed user {} from {}", email, tag);
        Ok(())
    }

    async fn get_stats(
        &self,
        pattern: &str,
        reset: bool,
    ) -> Result<HashMap<String, i64>, EngineError> {
        let mut state = self.state.write();
        state.require_running()?;

        let matched: HashMap<String, i64> = state
            .counters
            .iter()
            .filter(|(name, _)| name.contains(pattern))
            .map(|(name, value)| (name.clone(), *value))
            .collect();

        if reset {
            for name in matched.keys() {
                state.counters.insert(name.clone(), 0);
            }
        }

        Ok(matched)
    }

    async fn get_system_stats(&self) -> Result<SystemStats, EngineError> {
        bump(&self.calls.probe);
        if take(&self.failing_probes) {
            return Err(EngineError::Unhealthy("injected probe failure".into()));
        }

        let state = self.state.read();
        state.require_running()?;

        let users: usize = state.inbounds.values().map(BTreeMap::len).sum();
        Ok(SystemStats {
            uptime: state.started_at.map_or(0, |t| t.elapsed().as_secs()),
            live_objects: users as u64,
            ..SystemStats::default()
        })
    }

    async fn get_user_online_status(&self, email: &str) -> Result<bool, EngineError> {
        let state = self.state.read();
        state.require_running()?;
        Ok(state.online.contains(email))
    }

    async fn add_routing_rule(
        &self,
        rule_id: &str,
        ip: &str,
        outbound_tag: &str,
    ) -> Result<(), EngineError> {
        bump(&self.calls.add_rule);
        let mut state = self.state.write();
        state.require_running()?;

        if state.rules.contains_key(rule_id) {
            return Err(EngineError::RuleExists(rule_id.to_string()));
        }
        state.rules.insert(
            rule_id.to_string(),
            RoutingRule {
                ip: ip.to_string(),
                outbound_tag: outbound_tag.to_string(),
            },
        );
        Ok(())
    }

    async fn remove_routing_rule(&self, rule_id: &str) -> Result<(), EngineError> {
        bump(&self.calls.remove_rule);
        let mut state = self.state.write();
        state.require_running()?;

        state
            .rules
            .remove(rule_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::RuleNotFound(rule_id.to_string()))
    }
}
