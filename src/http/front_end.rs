//! HTTP front-end: the upgrade request and its reply.
//!
//! # Responsibilities
//! - Read and parse the streaming upgrade request off the raw socket
//! - Own the transport until the admission pipeline takes it over
//! - Send the HTTP error reply when admission rejects before takeover
//!
//! The gateway speaks just enough HTTP for the upgrade handshake: a
//! single GET on the streaming path. After takeover the socket carries
//! the streaming protocol, so a general-purpose HTTP stack would only be
//! in the way of handing the raw socket to a blocking worker.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::net::Transport;
use crate::stream::status::{
    AcceptOutcome, ERR_ALREADY_STREAMING, ERR_BUSY_TRY_LATER, ERR_NOT_PERMITTED,
};

/// The only path children may request.
pub const STREAM_PATH: &str = "/stream";

/// Upper bound on the upgrade request head.
const MAX_REQUEST_BYTES: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrontEndError {
    #[error("i/o error reading request: {0}")]
    Io(#[from] std::io::Error),
    #[error("client did not deliver the request in time")]
    Timeout,
    #[error("request head exceeds {MAX_REQUEST_BYTES} bytes")]
    TooLarge,
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("unsupported path")]
    UnsupportedPath,
}

/// The decoded upgrade request.
#[derive(Debug, Default)]
pub struct StreamRequest {
    /// Query parameters in wire order, percent-decoded.
    pub params: Vec<(String, String)>,
    /// The client identification header, when present.
    pub user_agent: Option<String>,
}

/// Read the request head off the socket and parse it.
///
/// Only `GET /stream?... HTTP/1.x` is accepted. The body, if any, is
/// never read: children do not send one.
pub async fn read_upgrade_request(
    stream: &mut tokio::net::TcpStream,
    timeout: Duration,
) -> Result<StreamRequest, FrontEndError> {
    let head = tokio::time::timeout(timeout, read_head(stream))
        .await
        .map_err(|_| FrontEndError::Timeout)??;
    parse_upgrade_request(&head)
}

async fn read_head(stream: &mut tokio::net::TcpStream) -> Result<String, FrontEndError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(FrontEndError::Malformed("connection closed mid-request"));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(FrontEndError::TooLarge);
        }
    }

    String::from_utf8(buf).map_err(|_| FrontEndError::Malformed("request is not valid utf-8"))
}

fn parse_upgrade_request(head: &str) -> Result<StreamRequest, FrontEndError> {
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or(FrontEndError::Malformed("empty request"))?;

    let mut parts = request_line.split_ascii_whitespace();
    let method = parts
        .next()
        .ok_or(FrontEndError::Malformed("missing method"))?;
    let target = parts
        .next()
        .ok_or(FrontEndError::Malformed("missing request target"))?;
    let version = parts
        .next()
        .ok_or(FrontEndError::Malformed("missing http version"))?;

    if method != "GET" {
        return Err(FrontEndError::Malformed("only GET is supported"));
    }
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Err(FrontEndError::Malformed("unsupported http version"));
    }

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };
    if path != STREAM_PATH {
        return Err(FrontEndError::UnsupportedPath);
    }

    let params = url::form_urlencoded::parse(query.as_bytes())
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let mut user_agent = None;
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("user-agent") {
                user_agent = Some(value.trim().to_string());
                break;
            }
        }
    }

    Ok(StreamRequest { params, user_agent })
}

/// The front-end's side of one connection under admission.
pub struct FrontEndConn {
    pub peer: SocketAddr,
    transport: Option<Transport>,
}

impl FrontEndConn {
    pub fn new(transport: Transport, peer: SocketAddr) -> Self {
        Self {
            peer,
            transport: Some(transport),
        }
    }

    /// Hand the transport to the admission pipeline. Called at most once.
    pub fn take_transport(&mut self) -> Option<Transport> {
        self.transport.take()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Answer the peer according to the admission outcome.
    ///
    /// [`AcceptOutcome::Ok`] means the pipeline took the transport and
    /// already answered on the wire; there is nothing left to send.
    pub fn respond(&mut self, outcome: AcceptOutcome, timeout: Duration) {
        let (status_line, body) = match outcome {
            AcceptOutcome::Ok => return,
            AcceptOutcome::Unauthorized => ("401 Unauthorized", ERR_NOT_PERMITTED),
            AcceptOutcome::Busy => ("503 Service Unavailable", ERR_BUSY_TRY_LATER),
            AcceptOutcome::Conflict => ("409 Conflict", ERR_ALREADY_STREAMING),
        };

        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        let response = format!(
            "HTTP/1.1 {status_line}\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {body}",
            body.len()
        );
        if let Err(e) = transport.send_timeout(response.as_bytes(), timeout) {
            tracing::debug!(peer = %self.peer, error = %e, "cannot send rejection response");
        }
        transport.shutdown();
        self.transport = None;
    }
}

/// Minimal reply for requests that never reached the pipeline.
pub fn respond_bad_request(transport: &mut Transport, timeout: Duration) {
    let response = "HTTP/1.1 400 Bad Request\r\n\
                    Content-Length: 0\r\n\
                    Connection: close\r\n\
                    \r\n";
    let _ = transport.send_timeout(response.as_bytes(), timeout);
    transport.shutdown();
}
