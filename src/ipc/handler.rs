//! IPC command handler
//!
//! This module processes IPC commands and generates responses.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::protocol::{ErrorCode, IpcCommand, IpcResponse, NodeStatus};
use crate::error::{EngineError, LifecycleError};
use crate::lifecycle::LifecycleController;
use crate::rules::RuleMirror;
use crate::stats::StatsReporter;
use crate::users::UserMutator;

/// IPC command handler
pub struct IpcHandler {
    /// Engine lifecycle
    lifecycle: Arc<LifecycleController>,

    /// User mutations
    users: UserMutator,

    /// IP block rules
    rules: RuleMirror,

    /// Statistics queries
    stats: StatsReporter,

    /// Root token; cancelled on shutdown
    cancel: CancellationToken,

    /// Handler start time
    start_time: Instant,

    /// Node version
    version: String,
}

impl IpcHandler {
    /// Create a handler over `lifecycle`
    ///
    /// Blocked IPs are routed to `block_outbound_tag`. Cancelling `cancel`
    /// aborts in-flight health verification; a `shutdown` command cancels it.
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        block_outbound_tag: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            users: UserMutator::new(Arc::clone(&lifecycle)),
            rules: RuleMirror::new(Arc::clone(&lifecycle), block_outbound_tag),
            stats: StatsReporter::new(Arc::clone(&lifecycle)),
            lifecycle,
            cancel,
            start_time: Instant::now(),
            version: crate::VERSION.to_string(),
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    pub fn rules(&self) -> &RuleMirror {
        &self.rules
    }

    /// Token cancelled when a shutdown is requested
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Handle an IPC command and return a response
    pub async fn handle(&self, command: IpcCommand) -> IpcResponse {
        if self.cancel.is_cancelled() && !matches!(command, IpcCommand::Ping) {
            return IpcResponse::error(ErrorCode::ShuttingDown, "node is shutting down");
        }

        match command {
            IpcCommand::Ping => IpcResponse::Pong,

            IpcCommand::Status => self.handle_status().await,

            IpcCommand::HealthCheck => IpcResponse::Health(self.lifecycle.health_check()),

            IpcCommand::Start(request) => {
                info!(
                    "Start requested (force_restart: {}, manifest: {})",
                    request.internals.force_restart,
                    request.internals.hashes.is_some()
                );
                match self.lifecycle.start(request, &self.cancel).await {
                    Ok(resp) => IpcResponse::Started(resp),
                    Err(e) => lifecycle_fault("start", &e),
                }
            }

            IpcCommand::Stop => IpcResponse::Stopped(self.lifecycle.stop().await),

            IpcCommand::Restart(request) => {
                match self.lifecycle.restart(request, &self.cancel).await {
                    Ok(resp) => IpcResponse::Restarted(resp),
                    Err(e) => lifecycle_fault("restart", &e),
                }
            }

            IpcCommand::AddUser(request) => IpcResponse::Mutation(self.users.add_user(request).await),

            IpcCommand::AddUsers(request) => {
                IpcResponse::Mutation(self.users.add_users_batch(request).await)
            }

            IpcCommand::RemoveUser(request) => {
                IpcResponse::Mutation(self.users.remove_user(request).await)
            }

            IpcCommand::RemoveUsers(request) => {
                IpcResponse::Mutation(self.users.remove_users_batch(request).await)
            }

            IpcCommand::GetInboundUsers { tag } => IpcResponse::InboundUsers {
                users: self.users.inbound_users(&tag),
                tag,
            },

            IpcCommand::GetInboundUsersCount { tag } => IpcResponse::InboundUsersCount {
                count: self.users.inbound_users_count(&tag),
                tag,
            },

            IpcCommand::GetUserOnlineStatus { email } => {
                match self.stats.user_online_status(&email).await {
                    Ok(is_online) => IpcResponse::OnlineStatus { email, is_online },
                    Err(e) => engine_error(&e),
                }
            }

            IpcCommand::GetUsersStats { reset } => match self.stats.users_stats(reset).await {
                Ok(users) => IpcResponse::UsersStats { users },
                Err(e) => engine_error(&e),
            },

            IpcCommand::GetSystemStats => match self.stats.system_stats().await {
                Ok(stats) => IpcResponse::SystemStats(stats),
                Err(e) => engine_error(&e),
            },

            IpcCommand::GetInboundStats { tag, reset } => {
                match self.stats.inbound_stats(&tag, reset).await {
                    Ok(stats) => IpcResponse::InboundStats(stats),
                    Err(e) => engine_error(&e),
                }
            }

            IpcCommand::GetOutboundStats { tag, reset } => {
                match self.stats.outbound_stats(&tag, reset).await {
                    Ok(stats) => IpcResponse::OutboundStats(stats),
                    Err(e) => engine_error(&e),
                }
            }

            IpcCommand::GetAllInboundsStats { reset } => {
                match self.stats.all_inbounds_stats(reset).await {
                    Ok(inbounds) => IpcResponse::AllInboundsStats { inbounds },
                    Err(e) => engine_error(&e),
                }
            }

            IpcCommand::GetAllOutboundsStats { reset } => {
                match self.stats.all_outbounds_stats(reset).await {
                    Ok(outbounds) => IpcResponse::AllOutboundsStats { outbounds },
                    Err(e) => engine_error(&e),
                }
            }

            IpcCommand::GetCombinedStats { reset } => match self.stats.combined_stats(reset).await {
                Ok(stats) => IpcResponse::CombinedStats(stats),
                Err(e) => engine_error(&e),
            },

            IpcCommand::GetConfig => self.handle_get_config(),

            IpcCommand::BlockIp { ip } => match self.rules.block(&ip).await {
                Ok(()) => IpcResponse::success(),
                Err(e) => engine_error(&e),
            },

            IpcCommand::UnblockIp { ip } => match self.rules.unblock(&ip).await {
                Ok(()) => IpcResponse::success(),
                Err(e) => engine_error(&e),
            },

            IpcCommand::GetBlockedIps => IpcResponse::BlockedIps {
                ips: self.rules.blocked_ips().await,
            },

            IpcCommand::ClearBlockedIps => {
                let cleared = self.rules.clear_all().await;
                IpcResponse::success_with_message(format!("Cleared {cleared} blocked IPs"))
            }

            IpcCommand::Shutdown => {
                info!("Shutdown requested over IPC");
                self.cancel.cancel();
                IpcResponse::success_with_message("Shutdown initiated")
            }
        }
    }

    async fn handle_status(&self) -> IpcResponse {
        IpcResponse::Status(NodeStatus {
            version: self.version.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            engine: self.lifecycle.status().await,
            tracked_inbounds: self.lifecycle.tracker().tracked_inbounds().len(),
            blocked_ips: self.rules.blocked_ips().await.len(),
        })
    }

    fn handle_get_config(&self) -> IpcResponse {
        let Some(applied) = self.lifecycle.current_config() else {
            return IpcResponse::error(ErrorCode::NotFound, "no configuration has been applied");
        };
        match serde_json::from_slice(&applied.blob) {
            Ok(config) => IpcResponse::Config {
                config,
                config_hash: applied.hash,
            },
            Err(e) => {
                error!("Applied configuration is not valid JSON: {}", e);
                IpcResponse::error(ErrorCode::InternalError, e.to_string())
            }
        }
    }
}

fn lifecycle_fault(op: &str, e: &LifecycleError) -> IpcResponse {
    error!("Engine {} failed: {}", op, e);
    IpcResponse::error(ErrorCode::InternalError, e.to_string())
}

fn engine_error(e: &EngineError) -> IpcResponse {
    debug!("Engine request failed: {}", e);
    let code = match e {
        EngineError::NotRunning => ErrorCode::EngineUnavailable,
        EngineError::InvalidAddress(_) | EngineError::InvalidCredential(_) => {
            ErrorCode::InvalidParameters
        }
        e if e.is_not_found() => ErrorCode::NotFound,
        _ => ErrorCode::OperationFailed,
    };
    IpcResponse::error(code, e.to_string())
}
