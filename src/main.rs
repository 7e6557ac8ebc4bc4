//! authgate - token-gated forwarding proxy.
//!
//! Serves `POST /check` and `POST /upload` on one listener. Uploads that
//! carry a valid `authCode` token are forwarded to the upstream content host
//! with the token stripped.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use authgate::config::GateConfig;
use authgate::gateway::GatewayService;
use authgate::server::{DrainResult, serve};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Command-line options. Everything else comes from the environment.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "AUTHGATE_PORT", default_value = "8788")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Graceful shutdown timeout in seconds
    #[arg(long, env = "AUTHGATE_SHUTDOWN_TIMEOUT", default_value = "30")]
    shutdown_timeout: u64,

    /// Upstream origin authorized uploads are forwarded to
    #[arg(long, env = "UPSTREAM_URL")]
    upstream_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The guard must outlive the runtime so buffered log lines get flushed.
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut gate_config = GateConfig::from_env().inspect_err(|e| {
        error!(error = %e, "Invalid configuration, refusing to start");
    })?;
    if let Some(ref raw) = cli.upstream_url {
        gate_config = gate_config.with_upstream(raw).inspect_err(|e| {
            error!(error = %e, "Invalid --upstream-url, refusing to start");
        })?;
    }
    if !gate_config.auth.is_enforced() {
        warn!("AUTH_CODE is not set, every request will be authorized");
    }

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(
        addr = %addr,
        upstream = %gate_config.upstream,
        auth_enforced = gate_config.auth.is_enforced(),
        telemetry = gate_config.telemetry_enabled,
        shutdown_timeout = cli.shutdown_timeout,
        tcp_nodelay = gate_config.tcp_nodelay,
        tcp_keepalive_secs = gate_config.tcp_keepalive_secs,
        max_concurrent_streams = gate_config.max_concurrent_streams,
        socket_buffer_size = gate_config.socket_buffer_size,
        "authgate starting"
    );

    let service = GatewayService::new(&gate_config)?;

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let drain = serve(
        listener,
        service,
        Arc::new(gate_config),
        shutdown,
        Duration::from_secs(cli.shutdown_timeout),
    )
    .await;

    match drain {
        DrainResult::Complete => {
            info!("All connections drained, shutting down cleanly");
            Ok(())
        }
        DrainResult::Timeout { remaining } => {
            warn!(
                active_connections = remaining,
                "Shutdown timeout reached, forcing exit"
            );
            Err(format!("Drain timeout exceeded with {remaining} open connections").into())
        }
    }
}

/// Cancel `shutdown` on SIGINT, and on SIGTERM where available.
fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                shutdown_sigint.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating graceful shutdown");
                    shutdown.cancel();
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGTERM");
                }
            }
        });
    }

    #[cfg(not(unix))]
    drop(shutdown);
}
