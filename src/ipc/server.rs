//! IPC Server
//!
//! Unix socket server for the control surface, plus a matching client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::handler::IpcHandler;
use super::protocol::{
    decode_message, encode_message, ErrorCode, IpcCommand, IpcResponse, LENGTH_PREFIX_SIZE,
};
use crate::config::IpcConfig;
use crate::error::IpcError;

/// IPC server for handling control commands
pub struct IpcServer {
    /// Configuration
    config: IpcConfig,

    /// Command handler
    handler: Arc<IpcHandler>,

    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(config: IpcConfig, handler: Arc<IpcHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            handler,
            shutdown_tx,
        }
    }

    /// Run the IPC server until [`shutdown`](Self::shutdown) is called
    ///
    /// # Errors
    ///
    /// Returns `IpcError` if the socket cannot be prepared or bound.
    pub async fn run(&self) -> Result<(), IpcError> {
        if !self.config.enabled {
            info!("IPC server disabled");
            return Ok(());
        }

        let listener = self.bind()?;
        let socket_path = &self.config.socket_path;
        info!("IPC server listening on {:?}", socket_path);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = Arc::clone(&self.handler);
                            let max_size = self.config.max_message_size;

                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, handler, max_size).await {
                                    debug!("IPC connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("IPC accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }

        if socket_path.exists() {
            if let Err(e) = std::fs::remove_file(socket_path) {
                warn!("Failed to remove IPC socket {:?}: {}", socket_path, e);
            }
        }

        Ok(())
    }

    fn bind(&self) -> Result<UnixListener, IpcError> {
        let socket_path = &self.config.socket_path;
        let creation_error = |reason: String| IpcError::SocketCreation {
            path: socket_path.display().to_string(),
            reason,
        };

        // Stale socket from a previous run
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .map_err(|e| creation_error(format!("Failed to remove existing socket: {e}")))?;
        }

        if let Some(parent) = socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    creation_error(format!("Failed to create parent directory: {e}"))
                })?;
            }
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| IpcError::BindError {
            path: socket_path.display().to_string(),
            reason: e.to_string(),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(self.config.socket_mode);
            std::fs::set_permissions(socket_path, permissions)
                .map_err(|e| creation_error(format!("Failed to set permissions: {e}")))?;
        }

        Ok(listener)
    }

    /// Get a shutdown signal sender
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Initiate shutdown
    pub fn shutdown(&self) {
        // No receivers just means the server is not running
        let _ = self.shutdown_tx.send(());
    }
}

/// One length-prefixed frame off the wire
enum Frame {
    Body(Vec<u8>),
    /// Declared length above the limit; the body is left unread
    Oversized(usize),
}

/// Read one frame, `None` on a clean EOF at a frame boundary
async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Option<Frame>, IpcError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    if let Err(e) = reader.read_exact(&mut prefix).await {
        return match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(e.into()),
        };
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > limit {
        return Ok(Some(Frame::Oversized(len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(Frame::Body(body)))
}

async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_message(message).map_err(|e| IpcError::serialization(e.to_string()))?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Serve commands on one connection until EOF, shutdown or a bad frame
async fn serve_connection(
    mut stream: UnixStream,
    handler: Arc<IpcHandler>,
    limit: usize,
) -> Result<(), IpcError> {
    debug!("IPC connection opened");

    while let Some(frame) = read_frame(&mut stream, limit).await? {
        let body = match frame {
            Frame::Body(body) => body,
            Frame::Oversized(len) => {
                // Unread body: the stream cannot be resynced
                warn!("IPC frame of {} bytes exceeds limit {}", len, limit);
                let reply = IpcResponse::error(
                    ErrorCode::InvalidParameters,
                    format!("Message too large: {len} bytes"),
                );
                return write_frame(&mut stream, &reply).await;
            }
        };

        let command = match decode_message::<IpcCommand>(&body) {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejected malformed IPC command: {}", e);
                let reply = IpcResponse::error(
                    ErrorCode::InvalidCommand,
                    format!("Invalid command format: {e}"),
                );
                write_frame(&mut stream, &reply).await?;
                continue;
            }
        };

        let closing = matches!(command, IpcCommand::Shutdown);
        let reply = handler.handle(command).await;
        write_frame(&mut stream, &reply).await?;

        if closing {
            debug!("Connection closed after shutdown command");
            return Ok(());
        }
    }

    debug!("IPC connection closed by peer");
    Ok(())
}

/// IPC client for connecting to the node
pub struct IpcClient {
    socket_path: PathBuf,
    max_message_size: usize,
}

impl IpcClient {
    /// Create a new IPC client
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            max_message_size: super::protocol::MAX_MESSAGE_SIZE,
        }
    }

    /// Accept responses up to `size` bytes
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Send a command and receive a response
    ///
    /// # Errors
    ///
    /// Returns `IpcError` if the node is unreachable or replies with a
    /// malformed or oversized frame.
    pub async fn send(&self, command: IpcCommand) -> Result<IpcResponse, IpcError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| IpcError::ConnectionError(e.to_string()))?;

        write_frame(&mut stream, &command).await?;

        match read_frame(&mut stream, self.max_message_size).await? {
            Some(Frame::Body(body)) => {
                decode_message(&body).map_err(|e| IpcError::protocol(e.to_string()))
            }
            Some(Frame::Oversized(len)) => Err(IpcError::protocol(format!(
                "Response too large: {len} bytes"
            ))),
            None => Err(IpcError::protocol("connection closed before a response")),
        }
    }

    /// Send a ping command
    ///
    /// # Errors
    ///
    /// Returns `IpcError` if the node is unreachable.
    pub async fn ping(&self) -> Result<bool, IpcError> {
        let response = self.send(IpcCommand::Ping).await?;
        Ok(matches!(response, IpcResponse::Pong))
    }
}
