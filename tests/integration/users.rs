//! User mutation integration tests
//!
//! Identities move between inbounds, removals are idempotent, and counts
//! track the engine.

use rust_node::engine::{Credential, Protocol};
use rust_node::lifecycle::StartRequest;
use rust_node::users::{
    AddUserRequest, AddUsersRequest, BatchInbound, BatchUser, BatchUserData, IdentityKeys,
    InboundUser, RemoveKeys, RemoveUserItem, RemoveUserRequest, RemoveUsersRequest, UserMutator,
};
use tokio_util::sync::CancellationToken;

use super::{config_with, manifest_for, TestNode};

const ALICE_UUID: &str = "b831381d-6324-4d53-ad4f-8cda48b30811";

async fn started(inbounds: &[(&str, &[&str])]) -> (TestNode, UserMutator) {
    let node = TestNode::new();
    let config = config_with(inbounds);
    let resp = node
        .controller
        .start(
            StartRequest::new(config.clone()).with_manifest(manifest_for(&config)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(resp.is_started);

    let mutator = UserMutator::new(node.controller.clone());
    (node, mutator)
}

fn vless(tag: &str, username: &str) -> InboundUser {
    InboundUser::Vless {
        tag: tag.into(),
        username: username.into(),
        uuid: ALICE_UUID.into(),
        flow: None,
    }
}

fn add(data: Vec<InboundUser>) -> AddUserRequest {
    AddUserRequest {
        data,
        hash_data: IdentityKeys {
            vless_uuid: ALICE_UUID.into(),
            prev_vless_uuid: None,
        },
    }
}

// ============================================================================
// Add Tests
// ============================================================================

#[tokio::test]
async fn test_identity_ends_on_latest_inbounds_only() {
    let (node, mutator) = started(&[("in-a", &[]), ("in-b", &[])]).await;

    assert!(mutator.add_user(add(vec![vless("in-a", "alice")])).await.success);
    assert!(mutator.add_user(add(vec![vless("in-b", "alice")])).await.success);

    let tracker = node.controller.tracker();
    assert_eq!(
        tracker.memberships_of(ALICE_UUID).into_iter().collect::<Vec<_>>(),
        vec!["in-b"]
    );
    assert!(node.engine.users("in-a").is_empty());
    assert_eq!(node.engine.users("in-b"), vec!["alice"]);
}

#[tokio::test]
async fn test_add_replaces_identity_loaded_from_config() {
    let (node, mutator) = started(&[("in-a", &["alice"]), ("in-b", &[])]).await;
    assert_eq!(mutator.inbound_users_count("in-a"), 1);

    let resp = mutator.add_user(add(vec![vless("in-b", "alice")])).await;
    assert!(resp.success);

    assert_eq!(mutator.inbound_users_count("in-a"), 0);
    assert_eq!(mutator.inbound_users("in-b"), vec![ALICE_UUID]);
    assert!(node.engine.users("in-a").is_empty());
}

#[tokio::test]
async fn test_partial_failure_still_succeeds() {
    let (node, mutator) = started(&[("in-a", &[])]).await;

    let bad = InboundUser::Trojan {
        tag: "in-b".into(),
        username: "alice".into(),
        password: String::new(),
    };
    let resp = mutator.add_user(add(vec![vless("in-a", "alice"), bad])).await;

    assert!(resp.success);
    assert_eq!(node.engine.users("in-a"), vec!["alice"]);
}

#[tokio::test]
async fn test_batch_add_installs_credentials() {
    let (node, mutator) = started(&[("vless-in", &[]), ("ss-in", &[])]).await;

    let request = AddUsersRequest {
        affected_inbound_tags: vec!["vless-in".into(), "ss-in".into()],
        users: vec![BatchUser {
            inbound_data: vec![
                BatchInbound {
                    protocol: Protocol::Vless,
                    tag: "vless-in".into(),
                    flow: Some("xtls-rprx-vision".into()),
                },
                BatchInbound {
                    protocol: Protocol::Shadowsocks,
                    tag: "ss-in".into(),
                    flow: None,
                },
            ],
            user_data: BatchUserData {
                user_id: "42".into(),
                hash_uuid: "h-42".into(),
                vless_uuid: ALICE_UUID.into(),
                trojan_password: "tp".into(),
                ss_password: "sp".into(),
            },
        }],
    };

    assert!(mutator.add_users_batch(request).await.success);
    assert!(matches!(
        node.engine.credential("vless-in", "42"),
        Some(Credential::Vless { flow: Some(_), .. })
    ));
    assert!(node.engine.credential("ss-in", "42").is_some());
    assert_eq!(mutator.inbound_users_count("ss-in"), 1);
}

// ============================================================================
// Remove Tests
// ============================================================================

#[tokio::test]
async fn test_remove_decrements_count() {
    let (node, mutator) = started(&[("trojan-in", &["u1", "u2", "u3"])]).await;
    assert_eq!(mutator.inbound_users_count("trojan-in"), 3);

    let resp = mutator
        .remove_user(RemoveUserRequest {
            username: "u2".into(),
            hash_data: RemoveKeys::default(),
        })
        .await;

    assert!(resp.success);
    assert_eq!(mutator.inbound_users_count("trojan-in"), 2);
    assert_eq!(node.engine.users("trojan-in"), vec!["u1", "u3"]);
}

#[tokio::test]
async fn test_remove_runtime_added_user_by_key() {
    let (node, mutator) = started(&[("trojan-in", &[])]).await;

    for (username, key) in [("u1", "k1"), ("u2", "k2"), ("u3", "k3")] {
        let resp = mutator
            .add_user(AddUserRequest {
                data: vec![InboundUser::Trojan {
                    tag: "trojan-in".into(),
                    username: username.into(),
                    password: format!("{username}-secret"),
                }],
                hash_data: IdentityKeys {
                    vless_uuid: key.into(),
                    prev_vless_uuid: None,
                },
            })
            .await;
        assert!(resp.success);
    }
    assert_eq!(mutator.inbound_users_count("trojan-in"), 3);

    let resp = mutator
        .remove_user(RemoveUserRequest {
            username: "u2".into(),
            hash_data: RemoveKeys {
                vless_uuid: "k2".into(),
            },
        })
        .await;

    assert!(resp.success);
    assert_eq!(mutator.inbound_users_count("trojan-in"), 2);
    assert_eq!(node.engine.users("trojan-in"), vec!["u1", "u3"]);
    assert!(node.controller.tracker().memberships_of("k2").is_empty());
    assert_eq!(node.controller.tracker().memberships_of("k1").len(), 1);
}

#[tokio::test]
async fn test_remove_unknown_identity_is_noop() {
    let (node, mutator) = started(&[("trojan-in", &["u1"])]).await;

    for _ in 0..2 {
        let resp = mutator
            .remove_user(RemoveUserRequest {
                username: "ghost".into(),
                hash_data: RemoveKeys {
                    vless_uuid: "missing".into(),
                },
            })
            .await;
        assert!(resp.success);
    }

    assert_eq!(mutator.inbound_users_count("trojan-in"), 1);
    assert_eq!(node.engine.users("trojan-in"), vec!["u1"]);
}

#[tokio::test]
async fn test_batch_remove() {
    let (_node, mutator) = started(&[("trojan-in", &["u1", "u2", "u3"])]).await;

    let resp = mutator
        .remove_users_batch(RemoveUsersRequest {
            users: vec![
                RemoveUserItem {
                    user_id: "u1".into(),
                    hash_uuid: String::new(),
                },
                RemoveUserItem {
                    user_id: "u3".into(),
                    hash_uuid: String::new(),
                },
            ],
        })
        .await;

    assert!(resp.success);
    assert_eq!(mutator.inbound_users("trojan-in"), vec!["u2"]);
}
