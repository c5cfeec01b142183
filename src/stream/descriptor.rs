//! Receiver descriptor: one in-flight or active inbound stream.
//!
//! # Responsibilities
//! - Hold everything a remote child declared about itself
//! - Own the transport once takeover has happened
//! - Carry the shared control block (stop signal, done latch, activity
//!   timestamp) that the host attachment and the worker both observe

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant, SystemTime};

use uuid::Uuid;

use crate::net::Transport;
use crate::registry::Host;
use crate::security::ReceiverSettings;
use crate::stream::capabilities::Capabilities;

/// Seconds on a process-local monotonic clock.
pub fn monotonic_secs() -> i64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_secs() as i64
}

/// Global atomic counter for receiver IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static RECEIVER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a receiver, used for tracing and for identity
/// checks when detaching from a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(u64);

impl ReceiverId {
    /// Generate a new unique receiver ID.
    pub fn new() -> Self {
        Self(RECEIVER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ReceiverId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rx-{}", self.0)
    }
}

/// Why a receiver was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A newer connection for the same host is evicting this one.
    Stale,
    /// The gateway is shutting down.
    Shutdown,
}

/// Shared control block between the admission path, the host attachment
/// and the worker running the receiver.
///
/// The admission path only ever signals and waits through this block; it
/// never touches the worker's resources directly.
#[derive(Debug)]
pub struct ReceiverControl {
    stop: AtomicBool,
    stop_reason: Mutex<Option<StopReason>>,
    done: Mutex<bool>,
    done_cv: Condvar,
    /// Monotonic seconds of the last message from the child.
    last_msg: AtomicI64,
}

impl ReceiverControl {
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            stop_reason: Mutex::new(None),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
            last_msg: AtomicI64::new(monotonic_secs()),
        }
    }

    /// Ask the owning worker to stop at its next safe point.
    pub fn signal_stop(&self, reason: StopReason) {
        *self
            .stop_reason
            .lock()
            .expect("receiver control mutex poisoned") = Some(reason);
        self.stop.store(true, Ordering::Release);
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self
            .stop_reason
            .lock()
            .expect("receiver control mutex poisoned")
    }

    /// Acknowledge termination. Called by the worker exactly once, before
    /// it detaches from the host.
    pub fn mark_done(&self) {
        let mut done = self.done.lock().expect("receiver control mutex poisoned");
        *done = true;
        self.done_cv.notify_all();
    }

    /// Block until the worker acknowledges termination, bounded by
    /// `timeout`. Returns true if it acknowledged in time.
    pub fn wait_done(&self, timeout: Duration) -> bool {
        let done = self.done.lock().expect("receiver control mutex poisoned");
        if *done {
            return true;
        }
        let (done, _result) = self
            .done_cv
            .wait_timeout_while(done, timeout, |done| !*done)
            .expect("receiver control mutex poisoned");
        *done
    }

    /// Record activity from the child.
    pub fn touch(&self) {
        self.last_msg.store(monotonic_secs(), Ordering::Relaxed);
    }

    pub fn last_msg_secs(&self) -> i64 {
        self.last_msg.load(Ordering::Relaxed)
    }

    /// Age of the receiver: seconds since its last message.
    pub fn idle_secs(&self) -> i64 {
        monotonic_secs() - self.last_msg_secs()
    }

    #[cfg(test)]
    pub fn set_last_msg_secs(&self, value: i64) {
        self.last_msg.store(value, Ordering::Relaxed);
    }
}

impl Default for ReceiverControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Free-form metadata describing the remote agent's environment.
///
/// Owned by the descriptor until host creation consumes it; `Option::take`
/// makes the single ownership transfer explicit.
#[derive(Debug, Clone, Default)]
pub struct SystemInfo {
    entries: std::collections::BTreeMap<String, String>,
    pub hops: i16,
    pub ml_capable: Option<u32>,
    pub ml_enabled: Option<u32>,
    pub mc_version: Option<u32>,
}

impl SystemInfo {
    /// Store a key/value pair. First write wins.
    pub fn set(&mut self, name: &str, value: &str) {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Represents one in-flight or active inbound stream.
#[derive(Debug)]
pub struct ReceiverDescriptor {
    pub id: ReceiverId,
    pub peer: SocketAddr,

    // Declared by the child in the upgrade request.
    pub key: Option<String>,
    pub hostname: Option<String>,
    pub registry_hostname: Option<String>,
    pub machine_guid: Option<String>,
    pub os: Option<String>,
    pub timezone: Option<String>,
    pub abbrev_timezone: Option<String>,
    pub utc_offset: Option<i32>,
    pub hops: Option<i16>,
    pub update_every: Option<u32>,
    pub capabilities: Option<Capabilities>,
    pub program_name: Option<String>,
    pub program_version: Option<String>,

    /// Validated identities, set by the validator.
    pub key_uuid: Option<Uuid>,
    pub machine_uuid: Option<Uuid>,

    /// Environment metadata; consumed by host creation.
    pub system_info: Option<SystemInfo>,

    /// Per-key settings loaded after admission.
    pub settings: ReceiverSettings,

    pub connected_since: SystemTime,
    pub control: Arc<ReceiverControl>,

    /// Present only between takeover and handoff to the worker.
    pub transport: Option<Transport>,

    /// Set once the descriptor is attached to a host.
    pub host: Option<Arc<Host>>,
}

impl ReceiverDescriptor {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: ReceiverId::new(),
            peer,
            key: None,
            hostname: None,
            registry_hostname: None,
            machine_guid: None,
            os: None,
            timezone: None,
            abbrev_timezone: None,
            utc_offset: None,
            hops: None,
            update_every: None,
            capabilities: None,
            program_name: None,
            program_version: None,
            key_uuid: None,
            machine_uuid: None,
            system_info: Some(SystemInfo::default()),
            settings: ReceiverSettings::default(),
            connected_since: SystemTime::now(),
            control: Arc::new(ReceiverControl::new()),
            transport: None,
            host: None,
        }
    }

    pub fn hostname_or_dash(&self) -> &str {
        self.hostname.as_deref().unwrap_or("-")
    }

    pub fn key_or_empty(&self) -> &str {
        self.key.as_deref().unwrap_or("")
    }

    pub fn machine_guid_or_empty(&self) -> &str {
        self.machine_guid.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_receiver_id_unique() {
        let id1 = ReceiverId::new();
        let id2 = ReceiverId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_control_stop_and_ack() {
        let control = Arc::new(ReceiverControl::new());
        assert!(!control.should_stop());

        let worker_side = control.clone();
        let worker = thread::spawn(move || {
            while !worker_side.should_stop() {
                thread::sleep(Duration::from_millis(10));
            }
            worker_side.mark_done();
        });

        control.signal_stop(StopReason::Stale);
        assert!(control.wait_done(Duration::from_secs(5)));
        assert_eq!(control.stop_reason(), Some(StopReason::Stale));
        worker.join().unwrap();
    }

    #[test]
    fn test_wait_done_times_out_without_ack() {
        let control = ReceiverControl::new();
        control.signal_stop(StopReason::Stale);
        assert!(!control.wait_done(Duration::from_millis(50)));
    }

    #[test]
    fn test_system_info_first_write_wins() {
        let mut info = SystemInfo::default();
        info.set("STREAM_HOST_OS_NAME", "Debian");
        info.set("STREAM_HOST_OS_NAME", "Ubuntu");
        assert_eq!(info.get("STREAM_HOST_OS_NAME"), Some("Debian"));
        assert_eq!(info.len(), 1);
    }
}
