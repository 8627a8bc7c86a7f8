//! IPC (Inter-Process Communication) module
//!
//! Unix socket control surface for the node: lifecycle, users, statistics
//! and IP blocking.
//!
//! # Protocol
//!
//! Messages are length-prefixed JSON:
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: JSON-encoded command or response
//!
//! # Example
//!
//! ```no_run
//! use rust_node::ipc::{IpcClient, IpcCommand, IpcResponse};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IpcClient::new("/var/run/rust-node.sock");
//!
//! if client.ping().await? {
//!     println!("Node is alive!");
//! }
//!
//! let response = client
//!     .send(IpcCommand::GetInboundUsersCount { tag: "vless-in".into() })
//!     .await?;
//! if let IpcResponse::InboundUsersCount { count, .. } = response {
//!     println!("Users on vless-in: {count}");
//! }
//! # Ok(())
//! # }
//! ```

mod handler;
mod protocol;
mod server;

pub use handler::IpcHandler;
pub use protocol::{
    decode_message, encode_message, ErrorCode, IpcCommand, IpcResponse, NodeStatus, ResponseError,
    LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE,
};
pub use server::{IpcClient, IpcServer};
