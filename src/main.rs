//! rust-node: node agent for an Xray-style proxy engine
//!
//! This is the main entry point for the node process.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! ./rust-node
//!
//! # Run with custom configuration
//! ./rust-node -c /path/to/config.json
//!
//! # Dry run against the in-process engine
//! ./rust-node --memory-engine --socket /tmp/rust-node.sock
//!
//! # Run with environment overrides
//! RUST_NODE_LOG_LEVEL=debug ./rust-node
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::signal;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use rust_node::config::{load_config_with_env, Config, EngineKind, LogConfig};
use rust_node::engine::build_engine;
use rust_node::error::IpcError;
use rust_node::ipc::{IpcHandler, IpcServer};
use rust_node::lifecycle::{ControllerSettings, LifecycleController};
use rust_node::state::StateTracker;
use tokio_util::sync::CancellationToken;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// IPC socket override
    socket: Option<PathBuf>,
    /// Snapshot directory override
    config_dir: Option<PathBuf>,
    /// Engine binary override
    engine_binary: Option<PathBuf>,
    /// Use the in-process engine
    memory_engine: bool,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self {
            config_path: PathBuf::from("/etc/rust-node/config.json"),
            socket: None,
            config_dir: None,
            engine_binary: None,
            memory_engine: false,
            generate_config: false,
            check_config: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        parsed.config_path = PathBuf::from(path);
                    }
                }
                "-s" | "--socket" => parsed.socket = args.next().map(PathBuf::from),
                "--config-dir" => parsed.config_dir = args.next().map(PathBuf::from),
                "--engine-binary" => parsed.engine_binary = args.next().map(PathBuf::from),
                "--memory-engine" => parsed.memory_engine = true,
                "-g" | "--generate-config" => parsed.generate_config = true,
                "--check" => parsed.check_config = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("rust-node v{}", rust_node::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        parsed
    }

    /// Apply command-line overrides on top of file and environment settings
    fn apply(&self, config: &mut Config) {
        if let Some(socket) = &self.socket {
            config.ipc.socket_path.clone_from(socket);
        }
        if let Some(dir) = &self.config_dir {
            config.engine.config_dir.clone_from(dir);
        }
        if let Some(binary) = &self.engine_binary {
            config.engine.binary.clone_from(binary);
        }
        if self.memory_engine {
            config.engine.kind = EngineKind::Memory;
        }
    }
}

fn print_help() {
    println!(
        r#"rust-node v{}

Node agent keeping an Xray-style proxy engine in step with a control plane.

USAGE:
    rust-node [OPTIONS]

OPTIONS:
    -c, --config <PATH>        Configuration file path [default: /etc/rust-node/config.json]
    -s, --socket <PATH>        IPC socket path
        --config-dir <PATH>    Directory for the config snapshot
        --engine-binary <PATH> Engine binary to supervise
        --memory-engine        Use the in-process engine (dry run)
    -g, --generate-config      Generate default configuration and exit
        --check                Check configuration and exit
    -h, --help                 Print help information
    -v, --version              Print version information

ENVIRONMENT:
    RUST_NODE_LOG_LEVEL        Override log level (trace, debug, info, warn, error)
    RUST_NODE_LOG_FORMAT       Override log format (json, text)
    RUST_NODE_IPC_SOCKET       Override IPC socket path
    RUST_NODE_CONFIG_DIR       Override config snapshot directory
    RUST_NODE_ENGINE_BINARY    Override engine binary
    RUST_NODE_ENGINE_KIND      Override engine kind (process, memory)
    DISABLE_HASHED_SET_CHECK   Set to true to always restart on start requests
"#,
        rust_node::VERSION
    );
}

/// Initialize logging
fn init_logging(log: &LogConfig) {
    let level = match log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["tokio=warn", "mio=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(log.target)
        .with_span_events(FmtSpan::CLOSE);

    if log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        rust_node::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let mut config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!("Failed to load configuration from {:?}: {}", args.config_path, e)
    })?;
    args.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config.log);

    info!("rust-node v{}", rust_node::VERSION);
    info!(
        "Engine: {:?} ({:?}), snapshot dir {:?}",
        config.engine.kind, config.engine.binary, config.engine.config_dir
    );
    if config.lifecycle.disable_hash_check {
        warn!("Hash check disabled, every start request will restart the engine");
    }

    let controller = Arc::new(LifecycleController::new(
        build_engine(&config.engine),
        Arc::new(StateTracker::new(!config.lifecycle.disable_hash_check)),
        ControllerSettings::from_config(&config),
    ));

    // Root token: cancelled by signals or an IPC shutdown
    let cancel = CancellationToken::new();

    let ipc_handler = Arc::new(IpcHandler::new(
        Arc::clone(&controller),
        config.rules.block_outbound_tag.clone(),
        cancel.clone(),
    ));
    let ipc_server = IpcServer::new(config.ipc.clone(), Arc::clone(&ipc_handler));
    let ipc_shutdown = ipc_server.shutdown_sender();
    let mut ipc_handle = if config.ipc.enabled {
        Some(tokio::spawn(async move { ipc_server.run().await }))
    } else {
        warn!("IPC server disabled, the node cannot be controlled");
        None
    };

    let restore = config.lifecycle.restore_on_start.then(|| {
        controller.spawn_restore(config.lifecycle.restore_delay(), cancel.child_token())
    });

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    let mut ipc_exited = false;
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
        () = cancel.cancelled() => {
            info!("Shutdown requested over IPC");
        }
        result = join_ipc(&mut ipc_handle) => {
            ipc_exited = true;
            match result {
                Ok(Ok(())) => warn!("IPC server exited"),
                Ok(Err(e)) => error!("IPC server failed: {}", e),
                Err(e) => error!("IPC server task failed: {}", e),
            }
        }
    }

    info!("Shutting down...");
    cancel.cancel();

    if let Some(job) = restore {
        if !job.is_finished() {
            job.abort();
        }
    }

    if controller.engine().is_running().await {
        let stopped = controller.stop().await;
        if !stopped.is_stopped {
            warn!("Engine did not stop cleanly");
        }
    }

    if let Some(handle) = ipc_handle.filter(|_| !ipc_exited) {
        // No receivers means the server already exited
        let _ = ipc_shutdown.send(());
        if tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            warn!("IPC server did not stop within 5s");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for the IPC server task, forever if it was never started
async fn join_ipc(
    handle: &mut Option<JoinHandle<Result<(), IpcError>>>,
) -> Result<Result<(), IpcError>, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
