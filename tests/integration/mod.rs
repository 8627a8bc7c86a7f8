//! Integration tests for rust-node
//!
//! Every test drives the node through its public API against the in-process
//! [`MemoryEngine`], so no engine binary or network access is needed.
//!
//! # Test Organization
//!
//! - `lifecycle`: restart avoidance, single-flight start, snapshot restore
//! - `users`: identity moves, removals and per-inbound counts
//! - `rules`: IP block idempotence
//! - `ipc`: socket round trips through server and client

pub mod ipc;
pub mod lifecycle;
pub mod rules;
pub mod users;

use std::sync::Arc;
use std::time::Duration;

use rust_node::change::fingerprint;
use rust_node::engine::{MemoryEngine, ProxyEngine};
use rust_node::lifecycle::{ControllerSettings, InjectedSections, LifecycleController, RetryPolicy};
use rust_node::state::{FingerprintManifest, StateTracker};
use serde_json::{json, Value};
use tempfile::TempDir;

/// A node wired to a memory engine, with its snapshot in a temp dir
pub struct TestNode {
    pub controller: Arc<LifecycleController>,
    pub engine: Arc<MemoryEngine>,
    pub dir: TempDir,
}

impl TestNode {
    pub fn new() -> Self {
        Self::with_engine(MemoryEngine::new())
    }

    pub fn with_engine(engine: MemoryEngine) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine);
        let controller = Arc::new(LifecycleController::new(
            Arc::clone(&engine) as Arc<dyn ProxyEngine>,
            Arc::new(StateTracker::new(true)),
            settings(&dir),
        ));
        Self {
            controller,
            engine,
            dir,
        }
    }
}

pub fn settings(dir: &TempDir) -> ControllerSettings {
    ControllerSettings {
        sections: InjectedSections::default(),
        health: RetryPolicy::new(3, Duration::from_millis(5)),
        snapshot_path: dir.path().join("config.json"),
    }
}

/// Config with one inbound per `(tag, emails)` pair
pub fn config_with(inbounds: &[(&str, &[&str])]) -> Value {
    let inbounds: Vec<Value> = inbounds
        .iter()
        .map(|(tag, emails)| {
            let clients: Vec<Value> = emails.iter().map(|e| json!({"email": e})).collect();
            json!({"tag": tag, "protocol": "trojan", "settings": {"clients": clients}})
        })
        .collect();
    json!({"outbounds": [{"tag": "DIRECT", "protocol": "freedom"}], "inbounds": inbounds})
}

/// Manifest the control plane would send for `config`
pub fn manifest_for(config: &Value) -> FingerprintManifest {
    let mut empty = config.clone();
    let mut manifest = FingerprintManifest::default();

    if let Some(inbounds) = empty.get_mut("inbounds").and_then(Value::as_array_mut) {
        for inbound in inbounds {
            let tag = inbound["tag"].as_str().unwrap_or_default().to_string();
            let clients = inbound["settings"]["clients"].take();
            let users: Vec<&str> = clients
                .as_array()
                .map(|c| c.iter().filter_map(|u| u["email"].as_str()).collect())
                .unwrap_or_default();
            manifest = manifest.with_inbound(tag, fingerprint(&users).unwrap());
        }
    }

    manifest.empty_config = fingerprint(&empty).unwrap();
    manifest
}
