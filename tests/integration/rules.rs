//! IP block integration tests

use std::sync::Arc;

use futures::future::join_all;
use rust_node::lifecycle::StartRequest;
use rust_node::rules::{rule_id, RuleMirror};
use tokio_util::sync::CancellationToken;

use super::{config_with, TestNode};

async fn started() -> (TestNode, Arc<RuleMirror>) {
    let node = TestNode::new();
    node.controller
        .start(
            StartRequest::new(config_with(&[("trojan-in", &[])])),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let mirror = Arc::new(RuleMirror::new(node.controller.clone(), "BLOCK"));
    (node, mirror)
}

#[tokio::test]
async fn test_concurrent_blocks_reach_engine_once() {
    let (node, mirror) = started().await;

    let blocks = (0..8).map(|_| {
        let mirror = Arc::clone(&mirror);
        async move { mirror.block("203.0.113.7").await }
    });
    for result in join_all(blocks).await {
        result.unwrap();
    }

    assert_eq!(node.engine.calls().add_rule, 1);
    assert_eq!(mirror.blocked_ips().await, vec!["203.0.113.7"]);
    assert_eq!(
        node.engine.rule_outbound(&rule_id("203.0.113.7")).as_deref(),
        Some("BLOCK")
    );
}

#[tokio::test]
async fn test_equivalent_addresses_share_a_rule() {
    let (node, mirror) = started().await;

    mirror.block("2001:db8::1").await.unwrap();
    mirror.block("2001:0db8:0000:0000:0000:0000:0000:0001").await.unwrap();

    assert_eq!(node.engine.calls().add_rule, 1);
    assert_eq!(node.engine.rules().len(), 1);
}

#[tokio::test]
async fn test_unblock_is_idempotent() {
    let (node, mirror) = started().await;

    mirror.unblock("198.51.100.1").await.unwrap();
    assert_eq!(node.engine.calls().remove_rule, 0);

    mirror.block("198.51.100.1").await.unwrap();
    mirror.unblock("198.51.100.1").await.unwrap();
    mirror.unblock("198.51.100.1").await.unwrap();

    assert_eq!(node.engine.calls().remove_rule, 1);
    assert!(node.engine.rules().is_empty());
}

#[tokio::test]
async fn test_engine_restart_resets_blocks() {
    let (node, mirror) = started().await;
    mirror.block("192.0.2.1").await.unwrap();

    // A full restart drops engine rules, so the mirror must not claim them
    node.controller
        .start(
            StartRequest::new(config_with(&[("trojan-in", &["alice"])])),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(node.engine.rules().is_empty());
    assert!(mirror.blocked_ips().await.is_empty());

    mirror.block("192.0.2.1").await.unwrap();
    assert_eq!(node.engine.calls().add_rule, 2);
    assert_eq!(
        node.engine.rule_outbound(&rule_id("192.0.2.1")).as_deref(),
        Some("BLOCK")
    );
    assert_eq!(mirror.clear_all().await, 1);
    assert!(node.engine.rules().is_empty());
}

#[tokio::test]
async fn test_unblock_while_stopped_is_noop() {
    let (node, mirror) = started().await;
    mirror.block("198.51.100.4").await.unwrap();
    assert!(node.controller.stop().await.is_stopped);

    mirror.unblock("198.51.100.4").await.unwrap();
    mirror.unblock("10.0.0.9").await.unwrap();
    assert_eq!(node.engine.calls().remove_rule, 0);
}
