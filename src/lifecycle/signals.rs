//! OS signal handling.
//!
//! # Responsibilities
//! - Translate SIGTERM/SIGINT into the internal shutdown signal
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A second signal while draining forces an immediate exit

use crate::lifecycle::shutdown::Shutdown;

/// Wait for a termination signal and trigger shutdown. A second signal
/// exits the process immediately.
pub async fn handle_signals(shutdown: &Shutdown) {
    wait_for_termination().await;
    tracing::info!("termination signal received, shutting down");
    shutdown.trigger();

    wait_for_termination().await;
    tracing::warn!("second termination signal, exiting now");
    std::process::exit(1);
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "cannot register SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                tracing::error!(error = %e, "cannot wait for ctrl-c");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot wait for ctrl-c");
    }
}
