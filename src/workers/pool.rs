//! Receiver worker pool.
//!
//! # Responsibilities
//! - Run admitted receivers on dedicated OS threads
//! - Drain inbound frames in blocking mode, tracking activity
//! - Detach from the host and acknowledge stop signals on exit
//!
//! # Design Decisions
//! - OS threads, not tasks: receivers read in blocking mode and may sit
//!   in `read()` for long stretches
//! - Workers poll the stop flag with a short read timeout so eviction
//!   and shutdown are acknowledged promptly even on a silent socket
//! - `mark_done` happens BEFORE detaching from the host: the evictor
//!   waits on the done latch while holding the host's receiver lock, so
//!   the worker must never take that lock before acknowledging

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::registry::Host;
use crate::stream::descriptor::ReceiverDescriptor;

/// An admitted receiver ready to stream, handed from the admission
/// pipeline to the pool.
pub struct ActiveReceiver {
    pub descriptor: ReceiverDescriptor,
    pub host: Arc<Host>,
}

/// The per-receiver processing loop.
pub trait StreamProcessor: Send + Sync {
    fn run(&self, active: ActiveReceiver);
}

/// Default processor: reads inbound bytes, tracks activity and honors
/// stop signals. Frame decoding happens downstream of admission and is
/// out of scope here; the drain keeps the liveness bookkeeping honest.
pub struct FrameDrain {
    poll_interval: Duration,
    idle_timeout: Duration,
}

impl FrameDrain {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            idle_timeout,
        }
    }
}

impl StreamProcessor for FrameDrain {
    fn run(&self, active: ActiveReceiver) {
        let ActiveReceiver {
            mut descriptor,
            host,
        } = active;

        let control = descriptor.control.clone();
        let Some(mut transport) = descriptor.transport.take() else {
            // Admission never enqueues without a transport.
            tracing::error!(receiver = %descriptor.id, "receiver enqueued without a transport");
            control.mark_done();
            host.clear_receiver(descriptor.id);
            return;
        };

        // Short read timeout so the stop flag is checked regularly; the
        // receive timeout is enforced through the activity timestamp.
        if let Err(e) = transport.set_read_timeout(Some(self.poll_interval)) {
            tracing::warn!(receiver = %descriptor.id, error = %e, "cannot set poll timeout");
        }

        let mut buf = [0u8; 16 * 1024];
        let reason = loop {
            if control.should_stop() {
                break "stop signal";
            }
            match transport.read(&mut buf) {
                Ok(0) => break "remote closed the connection",
                Ok(_) => control.touch(),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if control.idle_secs() >= self.idle_timeout.as_secs() as i64 {
                        break "receive timeout";
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(receiver = %descriptor.id, error = %e, "read failed");
                    break "read error";
                }
            }
        };

        transport.shutdown();

        // Acknowledge first; only then detach. An evictor may be waiting
        // on the done latch while holding the host's receiver lock.
        control.mark_done();
        host.clear_receiver(descriptor.id);

        tracing::info!(
            receiver = %descriptor.id,
            peer = %descriptor.peer,
            node = descriptor.hostname_or_dash(),
            reason,
            "receiver finished"
        );
    }
}

/// Fixed-size pool of receiver worker threads fed by a queue.
pub struct ReceiverPool {
    sender: Mutex<Option<Sender<ActiveReceiver>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ReceiverPool {
    /// Spawn `threads` workers running `processor`.
    pub fn start(threads: usize, processor: Arc<dyn StreamProcessor>) -> Self {
        let (sender, receiver) = mpsc::channel::<ActiveReceiver>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(threads);
        for n in 0..threads {
            let receiver = receiver.clone();
            let processor = processor.clone();
            let handle = std::thread::Builder::new()
                .name(format!("receiver-{n}"))
                .spawn(move || loop {
                    let next = {
                        let guard = receiver.lock().expect("pool queue mutex poisoned");
                        guard.recv()
                    };
                    match next {
                        Ok(active) => processor.run(active),
                        Err(_) => break,
                    }
                })
                .expect("cannot spawn receiver worker thread");
            handles.push(handle);
        }

        Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
        }
    }

    /// Hand an admitted receiver to the pool. Returns false after
    /// shutdown has begun.
    pub fn enqueue(&self, active: ActiveReceiver) -> bool {
        let guard = self.sender.lock().expect("pool sender mutex poisoned");
        match guard.as_ref() {
            Some(sender) => sender.send(active).is_ok(),
            None => false,
        }
    }

    /// Close the queue and wait for the workers to drain and exit.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .expect("pool sender mutex poisoned")
            .take();
        let handles: Vec<_> = self
            .handles
            .lock()
            .expect("pool handles mutex poisoned")
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Transport;
    use crate::registry::{HostIdentity, HostMeta, HostRegistry, ReceiverAttachment};
    use crate::stream::descriptor::StopReason;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use uuid::Uuid;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn attached_receiver(registry: &HostRegistry) -> (ActiveReceiver, TcpStream) {
        let (client, server) = socket_pair();
        let mut rpt = ReceiverDescriptor::new(server.peer_addr().unwrap());
        rpt.hostname = Some("alpha".into());
        rpt.transport = Some(Transport::new(server));

        let host = registry
            .find_or_create(
                HostIdentity {
                    machine_guid: Uuid::new_v4(),
                    hostname: "alpha".into(),
                    registry_hostname: "alpha".into(),
                    meta: HostMeta::default(),
                },
                None,
            )
            .unwrap();
        host.attach_receiver(ReceiverAttachment {
            id: rpt.id,
            hostname: "alpha".into(),
            control: rpt.control.clone(),
        });

        (
            ActiveReceiver {
                descriptor: rpt,
                host,
            },
            client,
        )
    }

    #[test]
    fn test_worker_detaches_on_remote_close() {
        let registry = HostRegistry::new();
        let (active, client) = attached_receiver(&registry);
        let host = active.host.clone();
        let control = active.descriptor.control.clone();

        let pool = ReceiverPool::start(
            1,
            Arc::new(FrameDrain::new(Duration::from_secs(600))),
        );
        assert!(pool.enqueue(active));

        drop(client);
        assert!(control.wait_done(Duration::from_secs(10)));
        pool.shutdown();
        assert!(!host.has_receiver());
    }

    #[test]
    fn test_worker_honors_stop_signal() {
        let registry = HostRegistry::new();
        let (active, mut client) = attached_receiver(&registry);
        let host = active.host.clone();
        let control = active.descriptor.control.clone();

        let pool = ReceiverPool::start(
            1,
            Arc::new(FrameDrain::new(Duration::from_secs(600))),
        );
        pool.enqueue(active);

        client.write_all(b"SET metric 1\n").unwrap();
        control.signal_stop(StopReason::Stale);
        assert!(control.wait_done(Duration::from_secs(10)));
        pool.shutdown();
        assert!(!host.has_receiver());
    }

    #[test]
    fn test_enqueue_after_shutdown_fails() {
        let registry = HostRegistry::new();
        let (active, _client) = attached_receiver(&registry);

        let pool = ReceiverPool::start(
            1,
            Arc::new(FrameDrain::new(Duration::from_secs(600))),
        );
        pool.shutdown();
        assert!(!pool.enqueue(active));
    }
}
