//! User add/remove across inbounds
//!
//! An add is always two phases, even for a brand-new identity:
//!
//! 1. Evict: on every tracked inbound, remove the username from the engine
//!    (best effort) and drop the identity's memberships.
//! 2. Install: add the identity to each target inbound and record it.
//!
//! This keeps an identity on at most the inbounds of its latest request.
//! Each inbound is mutated under its own lock; locks are taken one at a time
//! and never while the tracker lock is held.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::locks::TagLocks;
use super::request::{
    AddUserRequest, AddUsersRequest, MutationResponse, RemoveUserRequest, RemoveUsersRequest,
};
use crate::engine::EngineUser;
use crate::error::EngineError;
use crate::lifecycle::LifecycleController;

const ENGINE_UNAVAILABLE: &str = "engine is not running";

/// Applies user mutations to the engine and the state tracker
pub struct UserMutator {
    lifecycle: Arc<LifecycleController>,
    locks: TagLocks,
}

impl UserMutator {
    pub fn new(lifecycle: Arc<LifecycleController>) -> Self {
        Self {
            lifecycle,
            locks: TagLocks::new(),
        }
    }

    /// Install an identity on the requested inbounds
    ///
    /// Succeeds if at least one inbound accepted the identity; otherwise the
    /// last error is returned.
    pub async fn add_user(&self, request: AddUserRequest) -> MutationResponse {
        if !self.lifecycle.is_engine_available() {
            return MutationResponse::failed(ENGINE_UNAVAILABLE);
        }
        if request.data.is_empty() {
            return MutationResponse::failed("no inbound users supplied");
        }

        let tracker = self.lifecycle.tracker();
        for user in &request.data {
            tracker.add_tracked_inbound(user.tag());
        }

        let usernames: BTreeSet<&str> = request.data.iter().map(|u| u.username()).collect();
        let identity = request.hash_data.vless_uuid.as_str();
        let mut keys: Vec<&str> = vec![identity];
        keys.extend(request.hash_data.prev_vless_uuid.as_deref());
        keys.extend(usernames.iter().copied());

        self.evict(&usernames, &keys).await;

        let mut added = 0usize;
        let mut last_error = None;
        for user in &request.data {
            match self.install(user.tag(), user.to_engine_user(), identity).await {
                Ok(()) => added += 1,
                Err(e) => {
                    warn!(
                        "Failed to add user {} to {}: {}",
                        user.username(),
                        user.tag(),
                        e
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        if added > 0 {
            info!(
                "Added identity to {}/{} inbounds",
                added,
                request.data.len()
            );
            MutationResponse::ok()
        } else {
            MutationResponse::failed(last_error.unwrap_or_else(|| "no inbound accepted the user".into()))
        }
    }

    /// Install many identities; per-user failures are logged, not returned
    pub async fn add_users_batch(&self, request: AddUsersRequest) -> MutationResponse {
        if !self.lifecycle.is_engine_available() {
            return MutationResponse::failed(ENGINE_UNAVAILABLE);
        }

        let tracker = self.lifecycle.tracker();
        for tag in &request.affected_inbound_tags {
            tracker.add_tracked_inbound(tag);
        }
        for user in &request.users {
            for inbound in &user.inbound_data {
                tracker.add_tracked_inbound(&inbound.tag);
            }
        }

        let mut failures = 0usize;
        for user in &request.users {
            let data = &user.user_data;
            let usernames: BTreeSet<&str> = std::iter::once(data.user_id.as_str()).collect();
            let keys: Vec<&str> = [data.vless_uuid.as_str(), data.hash_uuid.as_str(), data.user_id.as_str()]
                .into_iter()
                .filter(|k| !k.is_empty())
                .collect();

            self.evict(&usernames, &keys).await;

            let identity = if data.vless_uuid.is_empty() {
                data.user_id.as_str()
            } else {
                data.vless_uuid.as_str()
            };
            for inbound in &user.inbound_data {
                if let Err(e) = self
                    .install(&inbound.tag, user.engine_user(inbound), identity)
                    .await
                {
                    failures += 1;
                    warn!(
                        "Batch add of {} to {} failed: {}",
                        data.user_id, inbound.tag, e
                    );
                }
            }
        }

        info!(
            "Batch add processed {} users ({} inbound failures)",
            request.users.len(),
            failures
        );
        MutationResponse::ok()
    }

    /// Remove an identity from every tracked inbound
    ///
    /// An inbound where the user was already absent counts as success, so
    /// removing an unknown identity is a no-op success.
    pub async fn remove_user(&self, request: RemoveUserRequest) -> MutationResponse {
        if !self.lifecycle.is_engine_available() {
            return MutationResponse::failed(ENGINE_UNAVAILABLE);
        }

        let keys = [request.hash_data.vless_uuid.as_str(), request.username.as_str()];
        self.remove_everywhere(&request.username, &keys)
            .await
            .into_response()
    }

    /// Remove many identities
    ///
    /// Fails only if no inbound removal succeeded for any user and at least
    /// one failed.
    pub async fn remove_users_batch(&self, request: RemoveUsersRequest) -> MutationResponse {
        if !self.lifecycle.is_engine_available() {
            return MutationResponse::failed(ENGINE_UNAVAILABLE);
        }

        let mut total = RemovalTally::default();
        for item in &request.users {
            let keys = [item.hash_uuid.as_str(), item.user_id.as_str()];
            let tally = self.remove_everywhere(&item.user_id, &keys).await;
            if let Some(e) = tally.last_error.as_deref().filter(|_| tally.removed == 0) {
                warn!("Batch removal of {} failed: {}", item.user_id, e);
            }
            total.merge(tally);
        }

        info!(
            "Batch remove processed {} users ({} inbound removals, {} failures)",
            request.users.len(),
            total.removed,
            total.failed
        );
        total.into_response()
    }

    /// Identities tracked on `tag`
    pub fn inbound_users(&self, tag: &str) -> Vec<String> {
        self.lifecycle.tracker().users_of(tag)
    }

    pub fn inbound_users_count(&self, tag: &str) -> usize {
        self.lifecycle.tracker().user_count(tag)
    }

    /// Tags that currently have a lock object
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    async fn evict(&self, usernames: &BTreeSet<&str>, keys: &[&str]) {
        let engine = self.lifecycle.engine();
        let tracker = self.lifecycle.tracker();

        for tag in tracker.tracked_inbounds() {
            let lock = self.locks.get(&tag);
            let _guard = lock.lock().await;

            for username in usernames {
                match engine.remove_user(&tag, username).await {
                    Ok(()) => debug!("Evicted {} from {}", username, tag),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => debug!("Eviction of {} from {} failed: {}", username, tag, e),
                }
            }
            for key in keys.iter().filter(|k| !k.is_empty()) {
                tracker.remove_membership(key, &tag);
            }
        }
    }

    async fn install(
        &self,
        tag: &str,
        user: Result<EngineUser, EngineError>,
        identity: &str,
    ) -> Result<(), EngineError> {
        let user = user?;
        let lock = self.locks.get(tag);
        let _guard = lock.lock().await;

        self.lifecycle.engine().add_user(tag, &user).await?;
        self.lifecycle.tracker().add_membership(identity, tag);
        Ok(())
    }

    /// Remove `username` from every tracked inbound and drop `keys`
    async fn remove_everywhere(&self, username: &str, keys: &[&str]) -> RemovalTally {
        let engine = self.lifecycle.engine();
        let tracker = self.lifecycle.tracker();

        let mut tally = RemovalTally::default();
        for tag in &tracker.tracked_inbounds() {
            let lock = self.locks.get(tag);
            let _guard = lock.lock().await;

            match engine.remove_user(tag, username).await {
                Ok(()) => {
                    debug!("Removed {} from {}", username, tag);
                    tally.removed += 1;
                }
                Err(e) if e.is_not_found() => tally.removed += 1,
                Err(e) => {
                    debug!("Removal of {} from {} failed: {}", username, tag, e);
                    tally.failed += 1;
                    tally.last_error = Some(e.to_string());
                }
            }
            for key in keys.iter().filter(|k| !k.is_empty()) {
                tracker.remove_membership(key, tag);
            }
        }
        tally
    }
}

/// Per-inbound removal outcomes; an absent user counts as removed
#[derive(Debug, Default)]
struct RemovalTally {
    removed: usize,
    failed: usize,
    last_error: Option<String>,
}

impl RemovalTally {
    fn merge(&mut self, other: Self) {
        self.removed += other.removed;
        self.failed += other.failed;
        if other.last_error.is_some() {
            self.last_error = other.last_error;
        }
    }

    fn into_response(self) -> MutationResponse {
        if self.removed == 0 && self.failed > 0 {
            MutationResponse::failed(
                self.last_error
                    .unwrap_or_else(|| "removal failed on every inbound".into()),
            )
        } else {
            MutationResponse::ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemoryEngine, ProxyEngine};
    use crate::lifecycle::{ControllerSettings, InjectedSections, RetryPolicy, StartRequest};
    use crate::state::StateTracker;
    use crate::users::request::{IdentityKeys, InboundUser, RemoveKeys, RemoveUserItem};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio_util::sync::CancellationToken;

    async fn running_mutator() -> (UserMutator, Arc<MemoryEngine>, TempDir) {
        let dir = tempdir().unwrap();
        let engine = Arc::new(MemoryEngine::new());
        let controller = Arc::new(LifecycleController::new(
            Arc::clone(&engine) as Arc<dyn ProxyEngine>,
            Arc::new(StateTracker::new(true)),
            ControllerSettings {
                sections: InjectedSections::default(),
                health: RetryPolicy::new(2, Duration::from_millis(5)),
                snapshot_path: dir.path().join("config.json"),
            },
        ));
        let config = json!({"inbounds": [
            {"tag": "trojan-a", "settings": {"clients": []}},
            {"tag": "trojan-b", "settings": {"clients": []}}
        ]});
        let resp = controller
            .start(StartRequest::new(config), &CancellationToken::new())
            .await
            .unwrap();
        assert!(resp.is_started);

        (UserMutator::new(controller), engine, dir)
    }

    fn trojan(tag: &str, username: &str, key: &str) -> AddUserRequest {
        AddUserRequest {
            data: vec![InboundUser::Trojan {
                tag: tag.into(),
                username: username.into(),
                password: "pw".into(),
            }],
            hash_data: IdentityKeys {
                vless_uuid: key.into(),
                prev_vless_uuid: None,
            },
        }
    }

    #[tokio::test]
    async fn test_add_moves_identity() {
        let (mutator, engine, _dir) = running_mutator().await;

        assert!(mutator.add_user(trojan("trojan-a", "alice", "k1")).await.success);
        assert!(mutator.add_user(trojan("trojan-b", "alice", "k1")).await.success);

        assert!(mutator.inbound_users("trojan-a").is_empty());
        assert_eq!(mutator.inbound_users("trojan-b"), vec!["k1"]);
        assert!(engine.users("trojan-a").is_empty());
        assert_eq!(engine.users("trojan-b"), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_add_fails_when_every_target_fails() {
        let (mutator, _engine, _dir) = running_mutator().await;

        let resp = mutator.add_user(trojan("missing-in", "bob", "k2")).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("missing-in"));
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop_success() {
        let (mutator, engine, _dir) = running_mutator().await;

        let resp = mutator
            .remove_user(RemoveUserRequest {
                username: "ghost".into(),
                hash_data: RemoveKeys {
                    vless_uuid: "nobody".into(),
                },
            })
            .await;
        assert!(resp.success);
        assert_eq!(mutator.inbound_users_count("trojan-a"), 0);
        assert_eq!(engine.calls().add_user, 0);
    }

    #[tokio::test]
    async fn test_rejects_when_engine_down() {
        let dir = tempdir().unwrap();
        let controller = Arc::new(LifecycleController::new(
            Arc::new(MemoryEngine::new()),
            Arc::new(StateTracker::new(true)),
            ControllerSettings {
                sections: InjectedSections::default(),
                health: RetryPolicy::default(),
                snapshot_path: dir.path().join("config.json"),
            },
        ));
        let mutator = UserMutator::new(controller);

        let resp = mutator.add_user(trojan("trojan-a", "alice", "k1")).await;
        assert_eq!(resp.error.as_deref(), Some(ENGINE_UNAVAILABLE));
        assert_eq!(mutator.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_removals_fail_when_every_inbound_errors() {
        let (mutator, engine, _dir) = running_mutator().await;
        assert!(mutator.add_user(trojan("trojan-a", "alice", "k1")).await.success);

        // Controller still believes the engine is up; every engine call errors
        engine.crash();

        let single = mutator
            .remove_user(RemoveUserRequest {
                username: "alice".into(),
                hash_data: RemoveKeys {
                    vless_uuid: "k1".into(),
                },
            })
            .await;
        assert!(!single.success);
        assert!(single.error.is_some());

        let batch = mutator
            .remove_users_batch(RemoveUsersRequest {
                users: vec![RemoveUserItem {
                    user_id: "alice".into(),
                    hash_uuid: "k1".into(),
                }],
            })
            .await;
        assert!(!batch.success);
        assert!(batch.error.is_some());
    }

    #[tokio::test]
    async fn test_batch_remove_succeeds_if_any_inbound_succeeds() {
        let (mutator, _engine, _dir) = running_mutator().await;
        assert!(mutator.add_user(trojan("trojan-a", "alice", "k1")).await.success);

        let resp = mutator
            .remove_users_batch(RemoveUsersRequest {
                users: vec![
                    RemoveUserItem {
                        user_id: "alice".into(),
                        hash_uuid: "k1".into(),
                    },
                    RemoveUserItem {
                        user_id: "ghost".into(),
                        hash_uuid: String::new(),
                    },
                ],
            })
            .await;
        assert!(resp.success);
        assert_eq!(mutator.inbound_users_count("trojan-a"), 0);
    }
}
