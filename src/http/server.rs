//! Accept loop: sockets in, admission outcomes out.
//!
//! # Responsibilities
//! - Drive the bounded listener until shutdown
//! - Read the upgrade request asynchronously, then run the synchronous
//!   admission pipeline on the blocking pool
//!
//! The async runtime only ever touches the socket before takeover. Once
//! the pipeline owns it, the socket is a plain blocking `std` stream in
//! receiver-worker hands.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::http::front_end::{self, FrontEndConn};
use crate::net::{ConnectionPermit, Listener, Transport};
use crate::stream::Gateway;

pub struct GatewayServer {
    gateway: Arc<Gateway>,
    request_timeout: Duration,
    error_send_timeout: Duration,
}

impl GatewayServer {
    pub fn new(
        gateway: Arc<Gateway>,
        request_timeout: Duration,
        error_send_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            request_timeout,
            error_send_timeout,
        }
    }

    /// Accept connections until the shutdown signal fires.
    pub async fn run(&self, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer, permit)) => {
                            let gateway = self.gateway.clone();
                            let request_timeout = self.request_timeout;
                            let error_send_timeout = self.error_send_timeout;
                            tokio::spawn(async move {
                                handle_connection(
                                    stream,
                                    peer,
                                    permit,
                                    gateway,
                                    request_timeout,
                                    error_send_timeout,
                                )
                                .await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("accept loop stopping");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
    permit: ConnectionPermit,
    gateway: Arc<Gateway>,
    request_timeout: Duration,
    error_send_timeout: Duration,
) {
    let request = front_end::read_upgrade_request(&mut stream, request_timeout).await;

    let std_stream = match stream.into_std() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "cannot detach socket from the runtime");
            return;
        }
    };
    let mut transport = Transport::new(std_stream);

    let request = match request {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "rejecting malformed upgrade request");
            let joined = tokio::task::spawn_blocking(move || {
                front_end::respond_bad_request(&mut transport, error_send_timeout);
            })
            .await;
            if let Err(e) = joined {
                tracing::error!(peer = %peer, error = %e, "response task panicked");
            }
            return;
        }
    };

    // The pipeline blocks (eviction waits, handshake sends), so it runs
    // off the async runtime. The permit rides along and is released when
    // the pipeline finishes.
    let joined = tokio::task::spawn_blocking(move || {
        let mut conn = FrontEndConn::new(transport, peer);
        let outcome = gateway.accept_connection(&mut conn, request);
        conn.respond(outcome, error_send_timeout);
        drop(permit);
    })
    .await;
    if let Err(e) = joined {
        tracing::error!(peer = %peer, error = %e, "admission task panicked");
    }
}
