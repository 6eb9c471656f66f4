//! Paravirtual Block Volume CSI Node Plugin
//!
//! Serves the CSI Identity and Node services for volumes attached to this
//! node by the control plane.

use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tonic::transport::Server;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use pvblock_csi::csi::identity_server::IdentityServer;
use pvblock_csi::csi::node_server::NodeServer;
use pvblock_csi::device::{DEFAULT_DEVICE_DIR, DEFAULT_DEVICE_PREFIX};
use pvblock_csi::identity::{DEFAULT_DRIVER_NAME, DRIVER_VERSION};
use pvblock_csi::metrics;
use pvblock_csi::node::DEFAULT_MAX_VOLUMES_PER_NODE;
use pvblock_csi::{Endpoint, IdentityService, NodeConfig, NodeService};

/// CLI arguments for the CSI node plugin
#[derive(Parser, Debug)]
#[command(name = "pvblock-csi")]
#[command(about = "Paravirtual block volume CSI node plugin for Kubernetes")]
struct Args {
    /// CSI endpoint (unix:///path/to.sock or tcp://host:port)
    #[arg(long, env = "CSI_ENDPOINT", default_value = "unix:///var/run/csi/csi.sock")]
    endpoint: String,

    /// Node ID for this CSI node (defaults to the host name)
    #[arg(long, env = "CSI_NODE_ID")]
    node_id: Option<String>,

    /// Driver name
    #[arg(long, default_value = DEFAULT_DRIVER_NAME)]
    driver_name: String,

    /// Maximum number of volumes that can be attached to this node
    #[arg(long, default_value_t = DEFAULT_MAX_VOLUMES_PER_NODE)]
    max_volumes_per_node: i64,

    /// Directory holding the stable device links
    #[arg(long, default_value = DEFAULT_DEVICE_DIR)]
    device_dir: PathBuf,

    /// Device link name prefix before the volume ID
    #[arg(long, default_value = DEFAULT_DEVICE_PREFIX)]
    device_prefix: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Prometheus metrics HTTP address (e.g., 0.0.0.0:9101)
    /// If not set, metrics endpoint is disabled
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize Prometheus metrics endpoint if configured
    if let Some(ref addr_str) = args.metrics_addr {
        let addr = addr_str
            .parse()
            .map_err(|e| format!("Invalid metrics address '{}': {}", addr_str, e))?;
        if let Err(e) = metrics::init_metrics(addr) {
            return Err(format!("Failed to initialize metrics: {}", e).into());
        }
    }

    // Determine node_id
    let node_id = match args.node_id {
        Some(id) => id,
        None => hostname::get()?.to_string_lossy().to_string(),
    };

    let endpoint: Endpoint = args.endpoint.parse()?;

    info!(
        driver_name = %args.driver_name,
        version = DRIVER_VERSION,
        endpoint = %args.endpoint,
        node_id = %node_id,
        device_dir = %args.device_dir.display(),
        device_prefix = %args.device_prefix,
        max_volumes_per_node = args.max_volumes_per_node,
        "Starting CSI node plugin"
    );

    let config = NodeConfig {
        node_id,
        max_volumes_per_node: args.max_volumes_per_node,
        device_dir: args.device_dir,
        device_prefix: args.device_prefix,
    };

    let router = Server::builder()
        .add_service(IdentityServer::new(IdentityService::new(args.driver_name)))
        .add_service(NodeServer::new(NodeService::linux(config)));

    let shutdown = async {
        shutdown_signal().await;
        info!("Shutdown signal received, draining connections...");
    };

    match endpoint {
        Endpoint::Unix(socket_path) => {
            use tokio_stream::wrappers::UnixListenerStream;

            // Remove stale socket from a previous run
            if socket_path.exists() {
                std::fs::remove_file(&socket_path)?;
            }

            if let Some(parent) = socket_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let listener = tokio::net::UnixListener::bind(&socket_path)?;
            info!("gRPC server listening on unix://{}", socket_path.display());

            router
                .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
                .await?;

            // Best effort: the next start removes it anyway
            let _ = std::fs::remove_file(&socket_path);
        }
        Endpoint::Tcp(addr) => {
            info!("gRPC server listening on tcp://{}", addr);
            router.serve_with_shutdown(addr, shutdown).await?;
        }
    }

    info!("CSI node plugin shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or SIGHUP)
async fn shutdown_signal() {
    use signal::unix::{SignalKind, signal};

    // Install signal handlers, logging errors but continuing with available handlers
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!("Failed to install SIGTERM handler: {}", e);
            None
        }
    };

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!("Failed to install SIGINT handler: {}", e);
            None
        }
    };

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!("Failed to install SIGHUP handler: {}", e);
            None
        }
    };

    // Handlers that failed to install never fire
    tokio::select! {
        Some(_) = recv(&mut sigterm) => {
            info!("Received SIGTERM");
        }
        Some(_) = recv(&mut sigint) => {
            info!("Received SIGINT");
        }
        Some(_) = recv(&mut sighup) => {
            info!("Received SIGHUP, shutting down");
        }
        else => {
            tracing::error!("No shutdown signal handler available");
        }
    }
}

async fn recv(sig: &mut Option<signal::unix::Signal>) -> Option<()> {
    match sig {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}
