//! Streaming gateway binary.
//!
//! Startup order: config, logging, metrics, policy and registry, worker
//! pool, listener, accept loop. Shutdown order: stop accepting, flip the
//! service gate off, signal attached receivers, drain the pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use uuid::Uuid;

use stream_gateway::config::{load_config, GatewayConfig};
use stream_gateway::http::GatewayServer;
use stream_gateway::lifecycle::{signals, Shutdown};
use stream_gateway::net::Listener;
use stream_gateway::observability::{init_logging, init_metrics};
use stream_gateway::registry::HostRegistry;
use stream_gateway::security::ConfigKeyPolicy;
use stream_gateway::stream::descriptor::StopReason;
use stream_gateway::stream::{Gateway, LogNotifier};
use stream_gateway::workers::{FrameDrain, ReceiverPool};

#[derive(Parser, Debug)]
#[command(name = "stream-gateway", about = "Agent-to-agent metrics streaming gateway")]
struct Args {
    /// Path to the configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability.log_level);
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        keys = config.keys.len(),
        "configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "metrics exporter unavailable");
                }
            }
            Err(e) => {
                tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    error = %e,
                    "cannot parse metrics address"
                );
            }
        }
    }

    let local_guid = Uuid::parse_str(&config.node.machine_guid)?;
    let policy = Arc::new(ConfigKeyPolicy::from_entries(&config.keys));
    let registry = Arc::new(HostRegistry::new());
    let pool = Arc::new(ReceiverPool::start(
        config.workers.threads,
        Arc::new(FrameDrain::new(Duration::from_secs(
            config.admission.receive_timeout_secs,
        ))),
    ));

    let gateway = Arc::new(Gateway::new(
        config.admission.clone(),
        local_guid,
        registry.clone(),
        policy,
        pool.clone(),
        Arc::new(LogNotifier),
    ));

    let listener = Listener::bind(&config.listener).await?;
    let server = GatewayServer::new(
        gateway.clone(),
        Duration::from_secs(config.listener.request_timeout_secs),
        Duration::from_secs(config.admission.error_send_timeout_secs),
    );

    let shutdown = Shutdown::new();
    let server_rx = shutdown.subscribe();

    tokio::select! {
        _ = server.run(listener, server_rx) => {}
        _ = signals::handle_signals(&shutdown) => {}
    }

    // Stop accepting, give reconnecting children a retryable answer, and
    // wind the receivers down.
    gateway.set_streaming_enabled(false);
    registry.signal_all_receivers(StopReason::Shutdown);

    let pool_for_shutdown = pool.clone();
    tokio::task::spawn_blocking(move || pool_for_shutdown.shutdown()).await?;

    tracing::info!("gateway stopped");
    Ok(())
}
