//! IPC round-trip tests over a real Unix socket

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rust_node::config::IpcConfig;
use rust_node::ipc::{ErrorCode, IpcClient, IpcCommand, IpcHandler, IpcResponse, IpcServer};
use rust_node::lifecycle::StartRequest;
use rust_node::users::{AddUserRequest, IdentityKeys, InboundUser};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{config_with, manifest_for, TestNode};

// ============================================================================
// Test Helpers
// ============================================================================

struct RunningServer {
    node: TestNode,
    handler: Arc<IpcHandler>,
    client: IpcClient,
    shutdown: tokio::sync::broadcast::Sender<()>,
    task: JoinHandle<Result<(), rust_node::IpcError>>,
}

async fn serve() -> RunningServer {
    let node = TestNode::new();
    let socket_path = node.dir.path().join("node.sock");

    let handler = Arc::new(IpcHandler::new(
        node.controller.clone(),
        "BLOCK",
        CancellationToken::new(),
    ));
    let server = IpcServer::new(
        IpcConfig {
            socket_path: socket_path.clone(),
            socket_mode: 0o600,
            enabled: true,
            max_message_size: 64 * 1024,
        },
        Arc::clone(&handler),
    );
    let shutdown = server.shutdown_sender();
    let task = tokio::spawn(async move { server.run().await });

    wait_for_socket(&socket_path).await;

    RunningServer {
        client: IpcClient::new(&socket_path),
        node,
        handler,
        shutdown,
        task,
    }
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..50 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("IPC socket {path:?} never appeared");
}

// ============================================================================
// Round Trip Tests
// ============================================================================

#[tokio::test]
async fn test_start_add_count_over_socket() {
    let server = serve().await;
    let config = config_with(&[("trojan-in", &["u1", "u2"])]);

    let response = server
        .client
        .send(IpcCommand::Start(
            StartRequest::new(config.clone()).with_manifest(manifest_for(&config)),
        ))
        .await
        .unwrap();
    assert!(matches!(response, IpcResponse::Started(ref r) if r.is_started));

    let response = server
        .client
        .send(IpcCommand::AddUser(AddUserRequest {
            data: vec![InboundUser::Trojan {
                tag: "trojan-in".into(),
                username: "u3".into(),
                password: "secret".into(),
            }],
            hash_data: IdentityKeys {
                vless_uuid: "k3".into(),
                prev_vless_uuid: None,
            },
        }))
        .await
        .unwrap();
    assert!(matches!(response, IpcResponse::Mutation(ref m) if m.success));

    let response = server
        .client
        .send(IpcCommand::GetInboundUsersCount {
            tag: "trojan-in".into(),
        })
        .await
        .unwrap();
    assert!(matches!(response, IpcResponse::InboundUsersCount { count: 3, .. }));

    // Same push again: the engine is left alone
    let response = server
        .client
        .send(IpcCommand::Start(
            StartRequest::new(config.clone()).with_manifest(manifest_for(&config)),
        ))
        .await
        .unwrap();
    assert!(matches!(response, IpcResponse::Started(ref r) if r.skipped));
    assert_eq!(server.node.engine.calls().start, 1);

    let _ = server.shutdown.send(());
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_block_ip_over_socket() {
    let server = serve().await;
    server
        .client
        .send(IpcCommand::Start(StartRequest::new(config_with(&[]))))
        .await
        .unwrap();

    for _ in 0..2 {
        let response = server
            .client
            .send(IpcCommand::BlockIp {
                ip: "203.0.113.9".into(),
            })
            .await
            .unwrap();
        assert!(!response.is_error());
    }

    let response = server.client.send(IpcCommand::GetBlockedIps).await.unwrap();
    assert!(matches!(response, IpcResponse::BlockedIps { ref ips } if ips.len() == 1));
    assert_eq!(server.node.engine.calls().add_rule, 1);

    let _ = server.shutdown.send(());
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_command_keeps_connection_usable() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    let server = serve().await;
    let mut stream = UnixStream::connect(server.node.dir.path().join("node.sock"))
        .await
        .unwrap();

    let body = br#"{"type":"no_such_command"}"#;
    stream
        .write_all(&(body.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(body).await.unwrap();

    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    let mut reply = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut reply).await.unwrap();
    let response: IpcResponse = serde_json::from_slice(&reply).unwrap();
    assert!(matches!(
        response,
        IpcResponse::Error(ref e) if e.code == ErrorCode::InvalidCommand
    ));

    // Same connection still serves valid commands
    let ping = rust_node::ipc::encode_message(&IpcCommand::Ping).unwrap();
    stream.write_all(&ping).await.unwrap();
    stream.read_exact(&mut len).await.unwrap();
    let mut reply = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut reply).await.unwrap();
    let response: IpcResponse = serde_json::from_slice(&reply).unwrap();
    assert!(matches!(response, IpcResponse::Pong));

    let _ = server.shutdown.send(());
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_command_cancels_node() {
    let server = serve().await;

    let response = server.client.send(IpcCommand::Shutdown).await.unwrap();
    assert!(!response.is_error());
    assert!(server.handler.shutdown_token().is_cancelled());

    let response = server.client.send(IpcCommand::HealthCheck).await.unwrap();
    assert!(matches!(
        response,
        IpcResponse::Error(ref e) if e.code == ErrorCode::ShuttingDown
    ));

    let _ = server.shutdown.send(());
    server.task.await.unwrap().unwrap();
}
