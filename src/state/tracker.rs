//! Tracked inbound and membership state
//!
//! [`StateTracker`] is what the node believes the engine currently holds:
//! which inbounds are active, which identities sit on which inbound, and the
//! fingerprints those beliefs were derived from.
//!
//! # Invariants
//!
//! - Every tag in the membership map is a tracked inbound.
//! - No identity maps to an empty tag set.
//! - Per-inbound user sets mirror the membership map exactly.
//!
//! All state sits behind one `RwLock`, which is never held across `.await`.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tracing::{debug, info};

use super::inbounds::{extract_inbound_users, InboundUsers};
use super::manifest::FingerprintManifest;
use crate::change::ChangeDetector;
use crate::error::StateError;

/// Detector key for an inbound's user-list fingerprint
pub const USERS_FINGERPRINT_KEY: &str = "users";

#[derive(Debug, Default)]
struct InboundRecord {
    fingerprint: ChangeDetector,
    users: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct TrackerState {
    inbounds: HashMap<String, InboundRecord>,
    membership: HashMap<String, BTreeSet<String>>,
    base_hash: Option<String>,
}

impl TrackerState {
    fn track(&mut self, tag: &str) -> &mut InboundRecord {
        self.inbounds.entry(tag.to_string()).or_default()
    }

    fn add_membership(&mut self, identity: &str, tag: &str) {
        self.track(tag).users.insert(identity.to_string());
        self.membership
            .entry(identity.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    fn remove_membership(&mut self, identity: &str, tag: &str) -> bool {
        if let Some(record) = self.inbounds.get_mut(tag) {
            record.users.remove(identity);
        }

        let Some(tags) = self.membership.get_mut(identity) else {
            return false;
        };
        let removed = tags.remove(tag);
        if tags.is_empty() {
            self.membership.remove(identity);
        }
        removed
    }
}

/// Single source of truth for engine-side users and inbounds
#[derive(Debug)]
pub struct StateTracker {
    state: RwLock<TrackerState>,
    hash_check_enabled: bool,
}

impl StateTracker {
    /// Create an empty tracker
    ///
    /// With `hash_check_enabled == false` every restart decision is "restart".
    pub fn new(hash_check_enabled: bool) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            hash_check_enabled,
        }
    }

    pub fn is_hash_check_enabled(&self) -> bool {
        self.hash_check_enabled
    }

    /// Replace all state with what `config` declares
    ///
    /// With a manifest, only config inbounds listed in it are tracked, each
    /// with the manifest's digest as its fingerprint, and the manifest's
    /// empty-config digest becomes the base fingerprint. Without one, every
    /// tagged inbound is tracked and no base fingerprint is kept, so the next
    /// restart decision always restarts.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidConfig` if `config` cannot be parsed; the
    /// previous state is kept in that case.
    pub fn rebuild(
        &self,
        config: &[u8],
        manifest: Option<&FingerprintManifest>,
    ) -> Result<(), StateError> {
        let inbounds = extract_inbound_users(config)?;
        self.rebuild_from(inbounds, manifest);
        Ok(())
    }

    /// Replace all state with already extracted inbounds
    ///
    /// Infallible counterpart of [`rebuild`](Self::rebuild) for callers that
    /// parse the configuration before committing to it.
    pub fn rebuild_from(&self, inbounds: Vec<InboundUsers>, manifest: Option<&FingerprintManifest>) {
        let mut next = TrackerState {
            base_hash: manifest.map(|m| m.empty_config.clone()),
            ..TrackerState::default()
        };

        for inbound in inbounds {
            let digest = match manifest {
                Some(m) => match m.inbound(&inbound.tag) {
                    Some(fp) => Some(fp.hash.as_str()),
                    None => {
                        debug!("Inbound {} not in manifest, ignoring", inbound.tag);
                        continue;
                    }
                },
                None => None,
            };

            let record = next.track(&inbound.tag);
            if let Some(digest) = digest {
                record.fingerprint.set_raw_hash(USERS_FINGERPRINT_KEY, digest);
            }
            for user in &inbound.users {
                next.add_membership(user, &inbound.tag);
            }
        }

        let mut state = self.state.write();
        *state = next;

        info!(
            "State rebuilt: {} inbounds, {} identities",
            state.inbounds.len(),
            state.membership.len()
        );
    }

    /// Forget everything; called once the engine has stopped
    pub fn cleanup(&self) {
        *self.state.write() = TrackerState::default();
        debug!("State tracker cleared");
    }

    /// Decide whether `manifest` requires an engine restart
    ///
    /// Checks run in a fixed order and the first positive answer wins.
    pub fn is_restart_needed(&self, manifest: &FingerprintManifest) -> bool {
        if !self.hash_check_enabled {
            return true;
        }

        let state = self.state.read();

        let Some(base_hash) = state.base_hash.as_deref() else {
            debug!("No base fingerprint recorded, restart needed");
            return true;
        };

        if base_hash != manifest.empty_config {
            info!("Base config fingerprint changed, restart needed");
            return true;
        }

        if state.inbounds.len() != manifest.inbounds.len() {
            info!(
                "Inbound count changed ({} -> {}), restart needed",
                state.inbounds.len(),
                manifest.inbounds.len()
            );
            return true;
        }

        for fp in &manifest.inbounds {
            let Some(record) = state.inbounds.get(&fp.tag) else {
                info!("New inbound {}, restart needed", fp.tag);
                return true;
            };
            if record.fingerprint.get(USERS_FINGERPRINT_KEY).as_deref() != Some(fp.hash.as_str()) {
                info!("Inbound {} fingerprint changed, restart needed", fp.tag);
                return true;
            }
        }

        if let Some(tag) = state.inbounds.keys().find(|tag| !manifest.contains(tag)) {
            info!("Inbound {} removed, restart needed", tag);
            return true;
        }

        false
    }

    /// Tracked inbound tags, sorted
    pub fn tracked_inbounds(&self) -> BTreeSet<String> {
        self.state.read().inbounds.keys().cloned().collect()
    }

    pub fn is_tracked(&self, tag: &str) -> bool {
        self.state.read().inbounds.contains_key(tag)
    }

    /// Track `tag`; an already tracked tag keeps its users and fingerprint
    pub fn add_tracked_inbound(&self, tag: &str) {
        self.state.write().track(tag);
    }

    /// Identities on `tag`, sorted
    pub fn users_of(&self, tag: &str) -> Vec<String> {
        self.state
            .read()
            .inbounds
            .get(tag)
            .map(|r| r.users.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn user_count(&self, tag: &str) -> usize {
        self.state
            .read()
            .inbounds
            .get(tag)
            .map_or(0, |r| r.users.len())
    }

    /// Record `identity` on `tag`, tracking the tag if needed
    pub fn add_membership(&self, identity: &str, tag: &str) {
        self.state.write().add_membership(identity, tag);
    }

    /// Drop `identity` from `tag`, returning whether it was there
    pub fn remove_membership(&self, identity: &str, tag: &str) -> bool {
        self.state.write().remove_membership(identity, tag)
    }

    /// Drop `identity` from every tag, returning the tags it left
    pub fn remove_identity(&self, identity: &str) -> Vec<String> {
        let mut state = self.state.write();
        let Some(tags) = state.membership.remove(identity) else {
            return Vec::new();
        };
        for tag in &tags {
            if let Some(record) = state.inbounds.get_mut(tag) {
                record.users.remove(identity);
            }
        }
        tags.into_iter().collect()
    }

    /// Tags `identity` belongs to
    pub fn memberships_of(&self, identity: &str) -> BTreeSet<String> {
        self.state
            .read()
            .membership
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    pub fn base_hash(&self) -> Option<String> {
        self.state.read().base_hash.clone()
    }

    /// Stored fingerprint for an inbound
    pub fn inbound_fingerprint(&self, tag: &str) -> Option<String> {
        self.state
            .read()
            .inbounds
            .get(tag)
            .and_then(|r| r.fingerprint.get(USERS_FINGERPRINT_KEY))
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new(true)
    }
}
