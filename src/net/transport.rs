//! The owned transport handle that moves between connection layers.
//!
//! # Responsibilities
//! - Own the client socket exclusively
//! - Switch the socket between non-blocking (front-end) and blocking
//!   (receiver) modes
//! - Bounded sends and reads with explicit timeouts
//!
//! Exactly one of {front-end connection, receiver descriptor} holds a
//! `Transport` at any time. The transfer is a move, never a copy, so
//! double-close cannot happen.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// An exclusively-owned duplex stream to a remote child.
///
/// TLS termination, when present, happens upstream of the gateway; the
/// handle carries the plain socket.
#[derive(Debug)]
pub struct Transport {
    stream: TcpStream,
}

impl Transport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Switch the socket to blocking mode and apply the receiver's
    /// read timeout. Failures are logged and ignored: the receiver can
    /// still work, just with degraded timeout behavior.
    pub fn prepare_for_streaming(&self, receive_timeout: Duration) {
        if let Err(e) = self.stream.set_nonblocking(false) {
            tracing::error!(error = %e, "cannot remove the non-blocking flag from the socket");
        }
        if let Err(e) = self.stream.set_read_timeout(Some(receive_timeout)) {
            tracing::error!(error = %e, "cannot set the receive timeout on the socket");
        }
    }

    /// Send `data` with a bounded timeout, returning the number of bytes
    /// actually written. Callers treat a short count as a failed send.
    pub fn send_timeout(&mut self, data: &[u8], timeout: Duration) -> std::io::Result<usize> {
        self.stream.set_nonblocking(false)?;
        self.stream.set_write_timeout(Some(timeout))?;

        let deadline = Instant::now() + timeout;
        let mut sent = 0;
        while sent < data.len() {
            match self.stream.write(&data[sent..]) {
                Ok(0) => break,
                Ok(n) => sent += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    break
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(sent)
    }

    /// Blocking read honoring whatever read timeout is currently set.
    pub fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }

    /// Adjust the read timeout (used by receiver workers to poll their
    /// stop signal between reads).
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_send_timeout_writes_everything() {
        let (client, server) = socket_pair();
        let mut transport = Transport::new(server);

        let n = transport
            .send_timeout(b"hello child", Duration::from_secs(5))
            .unwrap();
        assert_eq!(n, 11);

        let mut buf = [0u8; 32];
        let mut reader = client;
        reader.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let got = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..got], b"hello child");
    }

    #[test]
    fn test_prepare_for_streaming_is_best_effort() {
        let (_client, server) = socket_pair();
        let transport = Transport::new(server);
        // Must not panic or error out even if reapplied.
        transport.prepare_for_streaming(Duration::from_secs(600));
        transport.prepare_for_streaming(Duration::from_secs(600));
    }
}
