//! Post-handshake dispatch: hand the admitted receiver to a worker.
//!
//! # Responsibilities
//! - Apply per-key settings to the host
//! - Notify interested parties that the node (re)connected
//! - Enqueue the receiver on the worker pool

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::observability::metrics::record_accepted;
use crate::registry::Host;
use crate::stream::descriptor::ReceiverDescriptor;
use crate::stream::status::{log_status, StreamStatus};
use crate::workers::{ActiveReceiver, ReceiverPool};

/// Node state changes are debounced: downstream consumers see the
/// reconnect only if the node is still connected after this delay.
pub const NODE_STATE_UPDATE_DELAY: Duration = Duration::from_secs(300);

/// Downstream notification hook for node state changes.
pub trait NodeNotifier: Send + Sync {
    /// Schedule a state-update notification for this node after `delay`.
    fn schedule_state_update(&self, machine_guid: Uuid, delay: Duration);
}

/// Default notifier: records the event in the log.
pub struct LogNotifier;

impl NodeNotifier for LogNotifier {
    fn schedule_state_update(&self, machine_guid: Uuid, delay: Duration) {
        tracing::debug!(
            machine_guid = %machine_guid,
            delay_secs = delay.as_secs(),
            "scheduled node state update"
        );
    }
}

/// Final admission stage. The handshake has already succeeded; nothing
/// here can fail the connection.
pub fn complete(
    rpt: ReceiverDescriptor,
    host: Arc<Host>,
    pool: &ReceiverPool,
    notifier: &dyn NodeNotifier,
) {
    log_status(&rpt, "streaming connection accepted", StreamStatus::Connected);
    record_accepted();

    if let Some(guid) = rpt.machine_uuid {
        notifier.schedule_state_update(guid, NODE_STATE_UPDATE_DELAY);
    }

    if rpt.settings.ephemeral {
        host.set_ephemeral(true);
    }

    // The child is back; let the host re-dial its own parents promptly.
    host.parent_backoff.reset();

    if !pool.enqueue(ActiveReceiver {
        descriptor: rpt,
        host,
    }) {
        tracing::warn!("worker pool is shut down; dropping admitted receiver");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Transport;
    use crate::registry::{HostIdentity, HostMeta, HostRegistry, ReceiverAttachment};
    use crate::security::ReceiverSettings;
    use crate::workers::FrameDrain;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Mutex;

    struct RecordingNotifier {
        calls: Mutex<Vec<(Uuid, Duration)>>,
    }

    impl NodeNotifier for RecordingNotifier {
        fn schedule_state_update(&self, machine_guid: Uuid, delay: Duration) {
            self.calls
                .lock()
                .unwrap()
                .push((machine_guid, delay));
        }
    }

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_complete_notifies_and_enqueues() {
        let registry = HostRegistry::new();
        let guid = Uuid::new_v4();
        let host = registry
            .find_or_create(
                HostIdentity {
                    machine_guid: guid,
                    hostname: "alpha".into(),
                    registry_hostname: "alpha".into(),
                    meta: HostMeta::default(),
                },
                None,
            )
            .unwrap();
        host.parent_backoff.next_delay();
        assert_eq!(host.parent_backoff.attempts(), 1);

        let (client, server) = socket_pair();
        let mut rpt = ReceiverDescriptor::new(server.peer_addr().unwrap());
        rpt.hostname = Some("alpha".into());
        rpt.machine_uuid = Some(guid);
        rpt.settings = ReceiverSettings { ephemeral: true };
        rpt.transport = Some(Transport::new(server));
        host.attach_receiver(ReceiverAttachment {
            id: rpt.id,
            hostname: "alpha".into(),
            control: rpt.control.clone(),
        });
        let control = rpt.control.clone();

        let pool = ReceiverPool::start(1, Arc::new(FrameDrain::new(Duration::from_secs(600))));
        let notifier = RecordingNotifier {
            calls: Mutex::new(Vec::new()),
        };

        complete(rpt, host.clone(), &pool, &notifier);

        assert_eq!(host.parent_backoff.attempts(), 0);
        assert!(host.is_ephemeral());
        let calls = notifier.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(guid, NODE_STATE_UPDATE_DELAY)]);
        drop(calls);

        drop(client);
        assert!(control.wait_done(Duration::from_secs(10)));
        pool.shutdown();
    }
}
