//! Engine health probing
//!
//! A probe is one status query. The skip-restart decision uses a single
//! probe; post-start verification retries under a [`RetryPolicy`] and can be
//! cancelled between attempts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::LifecycleConfig;
use crate::engine::{ProxyEngine, SystemStats};
use crate::error::EngineError;

/// Attempt budget for post-start verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self::new(config.health_check_attempts, config.health_check_interval())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(2))
    }
}

/// Result of a verification run
#[derive(Debug)]
pub enum HealthOutcome {
    /// Engine answered on the given attempt
    Healthy { attempt: u32 },
    /// Every attempt failed
    Exhausted { attempts: u32, last_error: EngineError },
    /// Caller cancelled before the engine answered
    Cancelled,
}

impl HealthOutcome {
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }

    /// Human-readable failure reason
    pub fn describe(&self) -> String {
        match self {
            Self::Healthy { attempt } => format!("engine healthy after {attempt} attempt(s)"),
            Self::Exhausted {
                attempts,
                last_error,
            } => format!("engine failed health check after {attempts} attempts: {last_error}"),
            Self::Cancelled => "health check cancelled".to_string(),
        }
    }
}

/// Single status query, no retry
///
/// # Errors
///
/// Returns whatever the engine's status query returned.
pub async fn probe(engine: &dyn ProxyEngine) -> Result<SystemStats, EngineError> {
    engine.get_system_stats().await
}

/// Probe until the engine answers, the budget runs out, or `cancel` fires
pub async fn verify(
    engine: &dyn ProxyEngine,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> HealthOutcome {
    let attempts = policy.attempts.max(1);
    let mut last_error = EngineError::NotRunning;

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return HealthOutcome::Cancelled;
        }

        match probe(engine).await {
            Ok(_) => return HealthOutcome::Healthy { attempt },
            Err(e) => {
                debug!("Health probe {}/{} failed: {}", attempt, attempts, e);
                last_error = e;
            }
        }

        if attempt < attempts {
            tokio::select! {
                () = tokio::time::sleep(policy.interval) => {}
                () = cancel.cancelled() => return HealthOutcome::Cancelled,
            }
        }
    }

    HealthOutcome::Exhausted {
        attempts,
        last_error,
    }
}
