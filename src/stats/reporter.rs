//! Traffic and runtime statistics
//!
//! Engine counters are named `kind>>>name>>>traffic>>>direction`, where kind
//! is `user`, `inbound` or `outbound`. The reporter aggregates them per name.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::SystemStats;
use crate::error::EngineError;
use crate::lifecycle::LifecycleController;

const SEPARATOR: &str = ">>>";

/// Traffic direction of a counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Uplink,
    Downlink,
}

/// Split a counter name into `(kind, name, direction)`
pub fn parse_counter(counter: &str) -> Option<(&str, &str, Direction)> {
    let mut parts = counter.split(SEPARATOR);
    let kind = parts.next()?;
    let name = parts.next()?;
    if parts.next()? != "traffic" {
        return None;
    }
    let direction = match parts.next()? {
        "uplink" => Direction::Uplink,
        "downlink" => Direction::Downlink,
        _ => return None,
    };
    if parts.next().is_some() || name.is_empty() {
        return None;
    }
    Some((kind, name, direction))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Traffic {
    uplink: i64,
    downlink: i64,
}

impl Traffic {
    fn add(&mut self, direction: Direction, value: i64) {
        match direction {
            Direction::Uplink => self.uplink += value,
            Direction::Downlink => self.downlink += value,
        }
    }

    fn is_zero(self) -> bool {
        self.uplink == 0 && self.downlink == 0
    }
}

/// Aggregate counters of `kind` by name, sorted by name
fn aggregate(counters: &HashMap<String, i64>, kind: &str) -> BTreeMap<String, Traffic> {
    let mut totals: BTreeMap<String, Traffic> = BTreeMap::new();
    for (counter, value) in counters {
        if let Some((k, name, direction)) = parse_counter(counter) {
            if k == kind {
                totals.entry(name.to_string()).or_default().add(direction, *value);
            }
        }
    }
    totals
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTraffic {
    pub username: String,
    pub uplink: i64,
    pub downlink: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundTraffic {
    pub inbound: String,
    pub uplink: i64,
    pub downlink: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundTraffic {
    pub outbound: String,
    pub uplink: i64,
    pub downlink: i64,
}

/// All inbound and outbound traffic from one query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedTraffic {
    pub inbounds: Vec<InboundTraffic>,
    pub outbounds: Vec<OutboundTraffic>,
}

/// Read-only statistics queries over the running engine
pub struct StatsReporter {
    lifecycle: Arc<LifecycleController>,
}

impl StatsReporter {
    pub fn new(lifecycle: Arc<LifecycleController>) -> Self {
        Self { lifecycle }
    }

    fn require_available(&self) -> Result<(), EngineError> {
        if self.lifecycle.is_engine_available() {
            Ok(())
        } else {
            Err(EngineError::NotRunning)
        }
    }

    async fn counters(&self, pattern: &str, reset: bool) -> Result<HashMap<String, i64>, EngineError> {
        self.require_available()?;
        self.lifecycle
            .engine()
            .get_stats(pattern, reset)
            .await
            .inspect_err(|e| warn!("Failed to query stats '{}': {}", pattern, e))
    }

    pub async fn user_online_status(&self, email: &str) -> Result<bool, EngineError> {
        self.require_available()?;
        self.lifecycle.engine().get_user_online_status(email).await
    }

    /// Per-user traffic; users without traffic are omitted
    pub async fn users_stats(&self, reset: bool) -> Result<Vec<UserTraffic>, EngineError> {
        let counters = self.counters("user>>>", reset).await?;
        Ok(aggregate(&counters, "user")
            .into_iter()
            .filter(|(_, traffic)| !traffic.is_zero())
            .map(|(username, t)| UserTraffic {
                username,
                uplink: t.uplink,
                downlink: t.downlink,
            })
            .collect())
    }

    /// Traffic of one inbound; zero if the engine has no counters for it
    pub async fn inbound_stats(&self, tag: &str, reset: bool) -> Result<InboundTraffic, EngineError> {
        let pattern = format!("inbound>>>{tag}>>>traffic>>>");
        let counters = self.counters(&pattern, reset).await?;
        let t = aggregate(&counters, "inbound").remove(tag).unwrap_or_default();
        Ok(InboundTraffic {
            inbound: tag.to_string(),
            uplink: t.uplink,
            downlink: t.downlink,
        })
    }

    /// Traffic of one outbound; zero if the engine has no counters for it
    pub async fn outbound_stats(&self, tag: &str, reset: bool) -> Result<OutboundTraffic, EngineError> {
        let pattern = format!("outbound>>>{tag}>>>traffic>>>");
        let counters = self.counters(&pattern, reset).await?;
        let t = aggregate(&counters, "outbound").remove(tag).unwrap_or_default();
        Ok(OutboundTraffic {
            outbound: tag.to_string(),
            uplink: t.uplink,
            downlink: t.downlink,
        })
    }

    pub async fn all_inbounds_stats(&self, reset: bool) -> Result<Vec<InboundTraffic>, EngineError> {
        let counters = self.counters("inbound>>>", reset).await?;
        Ok(aggregate(&counters, "inbound")
            .into_iter()
            .map(|(inbound, t)| InboundTraffic {
                inbound,
                uplink: t.uplink,
                downlink: t.downlink,
            })
            .collect())
    }

    pub async fn all_outbounds_stats(&self, reset: bool) -> Result<Vec<OutboundTraffic>, EngineError> {
        let counters = self.counters("outbound>>>", reset).await?;
        Ok(aggregate(&counters, "outbound")
            .into_iter()
            .map(|(outbound, t)| OutboundTraffic {
                outbound,
                uplink: t.uplink,
                downlink: t.downlink,
            })
            .collect())
    }

    /// Inbound and outbound totals, reset together when `reset` is set
    pub async fn combined_stats(&self, reset: bool) -> Result<CombinedTraffic, EngineError> {
        Ok(CombinedTraffic {
            inbounds: self.all_inbounds_stats(reset).await?,
            outbounds: self.all_outbounds_stats(reset).await?,
        })
    }

    pub async fn system_stats(&self) -> Result<SystemStats, EngineError> {
        self.require_available()?;
        self.lifecycle.engine().get_system_stats().await
    }
}
