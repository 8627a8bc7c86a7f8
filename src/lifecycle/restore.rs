//! Background recovery of the last snapshot after a node restart

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::error;

use crate::error::LifecycleError;

/// How a restore attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// Nothing was ever applied on this node
    NoSnapshot,
    /// The engine was already up; nothing to do
    AlreadyRunning,
    /// A start or restart was executing at the time
    Busy,
    /// Cancelled before the restore began
    Cancelled,
    Started { version: String },
    Failed { error: String },
}

/// Handle to a scheduled restore
pub struct RestoreJob {
    handle: JoinHandle<Result<RestoreOutcome, LifecycleError>>,
}

impl RestoreJob {
    pub(crate) fn new(handle: JoinHandle<Result<RestoreOutcome, LifecycleError>>) -> Self {
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the restore to finish
    ///
    /// A panicked or aborted task is reported as [`RestoreOutcome::Failed`].
    ///
    /// # Errors
    ///
    /// Returns the lifecycle fault the restore ran into, if any.
    pub async fn wait(self) -> Result<RestoreOutcome, LifecycleError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Restore task did not complete: {}", e);
                Ok(RestoreOutcome::Failed {
                    error: e.to_string(),
                })
            }
        }
    }
}
