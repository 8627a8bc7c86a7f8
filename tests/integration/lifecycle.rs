//! Lifecycle integration tests
//!
//! # Test Categories
//!
//! 1. **Restart Avoidance**: identical pushes skip the engine, changes do not
//! 2. **Single Flight**: concurrent starts execute exactly once
//! 3. **Failure Handling**: engine start and health failures
//! 4. **Restore**: boot from the durable snapshot

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rust_node::engine::{MemoryEngine, ProxyEngine};
use rust_node::lifecycle::{
    LifecycleController, LifecycleState, RestartRequest, RestoreOutcome, StartRequest,
    START_IN_PROGRESS,
};
use rust_node::state::StateTracker;
use tokio_util::sync::CancellationToken;

use super::{config_with, manifest_for, settings, TestNode};

// ============================================================================
// Restart Avoidance Tests
// ============================================================================

#[tokio::test]
async fn test_identical_push_skips_restart() {
    let node = TestNode::new();
    let cancel = CancellationToken::new();
    let config = config_with(&[("trojan-in", &["alice", "bob"]), ("vless-in", &["carol"])]);
    let manifest = manifest_for(&config);

    let first = node
        .controller
        .start(StartRequest::new(config.clone()).with_manifest(manifest.clone()), &cancel)
        .await
        .unwrap();
    assert!(first.is_started);
    assert!(!first.skipped);

    let second = node
        .controller
        .start(StartRequest::new(config).with_manifest(manifest), &cancel)
        .await
        .unwrap();
    assert!(second.is_started);
    assert!(second.skipped);
    assert_eq!(second.version, first.version);

    let calls = node.engine.calls();
    assert_eq!(calls.start, 1);
    assert_eq!(calls.restart, 0);
}

#[tokio::test]
async fn test_user_change_forces_restart() {
    let node = TestNode::new();
    let cancel = CancellationToken::new();
    let config = config_with(&[("trojan-in", &["alice", "bob"])]);
    node.controller
        .start(StartRequest::new(config.clone()).with_manifest(manifest_for(&config)), &cancel)
        .await
        .unwrap();

    let changed = config_with(&[("trojan-in", &["alice", "dave"])]);
    let resp = node
        .controller
        .start(StartRequest::new(changed.clone()).with_manifest(manifest_for(&changed)), &cancel)
        .await
        .unwrap();

    assert!(resp.is_started);
    assert!(!resp.skipped);
    assert_eq!(node.engine.calls().restart, 1);
    assert_eq!(node.engine.users("trojan-in"), vec!["alice", "dave"]);
}

#[tokio::test]
async fn test_added_inbound_forces_restart() {
    let node = TestNode::new();
    let cancel = CancellationToken::new();
    let config = config_with(&[("trojan-in", &["alice"])]);
    node.controller
        .start(StartRequest::new(config.clone()).with_manifest(manifest_for(&config)), &cancel)
        .await
        .unwrap();

    let grown = config_with(&[("trojan-in", &["alice"]), ("ss-in", &[])]);
    let resp = node
        .controller
        .start(StartRequest::new(grown.clone()).with_manifest(manifest_for(&grown)), &cancel)
        .await
        .unwrap();
    assert!(!resp.skipped);
    assert!(node.controller.tracker().is_tracked("ss-in"));
}

#[tokio::test]
async fn test_force_restart_and_missing_manifest() {
    let node = TestNode::new();
    let cancel = CancellationToken::new();
    let config = config_with(&[("trojan-in", &["alice"])]);
    let manifest = manifest_for(&config);

    node.controller
        .start(StartRequest::new(config.clone()).with_manifest(manifest.clone()), &cancel)
        .await
        .unwrap();

    let forced = node
        .controller
        .start(StartRequest::new(config.clone()).with_manifest(manifest).force(), &cancel)
        .await
        .unwrap();
    assert!(!forced.skipped);

    let bare = node
        .controller
        .start(StartRequest::new(config), &cancel)
        .await
        .unwrap();
    assert!(!bare.skipped);
    assert_eq!(node.engine.calls().restart, 2);
}

// ============================================================================
// Single Flight Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_starts_execute_once() {
    let node = TestNode::with_engine(MemoryEngine::new().with_start_delay(Duration::from_millis(100)));
    let config = config_with(&[("trojan-in", &["alice"])]);
    let cancel = CancellationToken::new();

    let attempts = (0..4).map(|_| {
        let controller = Arc::clone(&node.controller);
        let request = StartRequest::new(config.clone());
        let cancel = cancel.clone();
        async move { controller.start(request, &cancel).await.unwrap() }
    });
    let responses = join_all(attempts).await;

    let started = responses.iter().filter(|r| r.is_started).count();
    let rejected = responses
        .iter()
        .filter(|r| r.error.as_deref() == Some(START_IN_PROGRESS))
        .count();
    assert_eq!(started, 1);
    assert_eq!(rejected, 3);
    assert_eq!(node.engine.calls().start, 1);
    assert_eq!(node.controller.state(), LifecycleState::Running);
}

// ============================================================================
// Failure Handling Tests
// ============================================================================

#[tokio::test]
async fn test_failed_health_check_reports_not_started() {
    let node = TestNode::new();
    node.engine.fail_next_probes(10);

    let resp = node
        .controller
        .start(
            StartRequest::new(config_with(&[("trojan-in", &[])])),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!resp.is_started);
    assert!(resp.error.unwrap().contains("health check"));
    assert_eq!(node.controller.state(), LifecycleState::Failed);
    assert!(!node.controller.is_engine_available());
}

#[tokio::test]
async fn test_unhealthy_engine_is_not_skipped() {
    let node = TestNode::new();
    let cancel = CancellationToken::new();
    let config = config_with(&[("trojan-in", &["alice"])]);
    let manifest = manifest_for(&config);
    node.controller
        .start(StartRequest::new(config.clone()).with_manifest(manifest.clone()), &cancel)
        .await
        .unwrap();

    // One failed skip probe; verification then succeeds
    node.engine.fail_next_probes(1);
    let resp = node
        .controller
        .start(StartRequest::new(config).with_manifest(manifest), &cancel)
        .await
        .unwrap();
    assert!(resp.is_started);
    assert!(!resp.skipped);
}

#[tokio::test]
async fn test_restart_reuses_last_config() {
    let node = TestNode::new();
    let cancel = CancellationToken::new();

    let resp = node
        .controller
        .restart(RestartRequest::default(), &cancel)
        .await
        .unwrap();
    assert!(!resp.success);

    node.controller
        .start(StartRequest::new(config_with(&[("trojan-in", &["alice"])])), &cancel)
        .await
        .unwrap();
    let resp = node
        .controller
        .restart(RestartRequest::default(), &cancel)
        .await
        .unwrap();
    assert!(resp.success);
    assert_eq!(node.engine.users("trojan-in"), vec!["alice"]);
}

#[tokio::test]
async fn test_stop_clears_tracked_state() {
    let node = TestNode::new();
    node.controller
        .start(
            StartRequest::new(config_with(&[("trojan-in", &["alice"])])),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(node.controller.stop().await.is_stopped);
    assert!(!node.engine.is_running().await);
    assert!(node.controller.tracker().tracked_inbounds().is_empty());
    assert!(!node.controller.health_check().engine_online);
}

// ============================================================================
// Restore Tests
// ============================================================================

#[tokio::test]
async fn test_restore_from_snapshot() {
    let node = TestNode::new();
    node.controller
        .start(
            StartRequest::new(config_with(&[("trojan-in", &["alice"])])),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    // A fresh process over the same snapshot directory
    let engine = Arc::new(MemoryEngine::new());
    let controller = Arc::new(LifecycleController::new(
        Arc::clone(&engine) as Arc<dyn ProxyEngine>,
        Arc::new(StateTracker::new(true)),
        settings(&node.dir),
    ));

    let job = controller.spawn_restore(Duration::from_millis(10), CancellationToken::new());
    let outcome = job.wait().await.unwrap();

    assert!(matches!(outcome, RestoreOutcome::Started { .. }));
    assert!(engine.is_running().await);
    assert_eq!(engine.users("trojan-in"), vec!["alice"]);
    assert_eq!(controller.tracker().user_count("trojan-in"), 1);
}

#[tokio::test]
async fn test_restore_without_snapshot_and_cancelled() {
    let node = TestNode::new();

    let outcome = node
        .controller
        .spawn_restore(Duration::ZERO, CancellationToken::new())
        .wait()
        .await
        .unwrap();
    assert_eq!(outcome, RestoreOutcome::NoSnapshot);

    let cancel = CancellationToken::new();
    let job = node
        .controller
        .spawn_restore(Duration::from_secs(60), cancel.clone());
    cancel.cancel();
    assert_eq!(job.wait().await.unwrap(), RestoreOutcome::Cancelled);
    assert_eq!(node.engine.calls().start, 0);
}
