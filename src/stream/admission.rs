//! Connection admission pipeline.
//!
//! # Responsibilities
//! - Run every inbound upgrade request through the full pipeline:
//!   normalize, validate, self-guard, rate gate, duplicate resolution,
//!   takeover, handshake, dispatch
//! - Own the global admission rate gate
//!
//! # Design Decisions
//! - The pipeline is synchronous and side-effect free until takeover, so
//!   every rejection before that point leaves the transport with the
//!   front-end for a normal HTTP error response
//! - Duplicate resolution happens entirely under the host's receiver
//!   lock; two racing attempts for the same node serialize there

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::AdmissionConfig;
use crate::http::front_end::{FrontEndConn, StreamRequest};
use crate::observability::metrics::{record_eviction, record_rejected};
use crate::registry::HostRegistry;
use crate::security::KeyPolicy;
use crate::stream::descriptor::{ReceiverDescriptor, StopReason};
use crate::stream::dispatch::{self, NodeNotifier};
use crate::stream::handshake::{self, send_error_line};
use crate::stream::normalize;
use crate::stream::status::{log_status, AcceptOutcome, StreamStatus, ERR_SAME_LOCALHOST};
use crate::stream::validate;
use crate::workers::ReceiverPool;

/// Global admission rate gate: at most one admitted connection per
/// interval, so a reconnect storm cannot stampede host creation.
pub struct AdmissionGate {
    last_admitted: Mutex<Option<Instant>>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self {
            last_admitted: Mutex::new(None),
        }
    }

    /// Try to pass the gate at `now`. A zero interval disables the gate.
    /// On rejection, returns how long until the gate opens again.
    pub fn try_admit(&self, now: Instant, interval: Duration) -> Result<(), Duration> {
        if interval.is_zero() {
            return Ok(());
        }

        let mut last = self
            .last_admitted
            .lock()
            .expect("admission gate mutex poisoned");
        match *last {
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev);
                if elapsed >= interval {
                    *last = Some(now);
                    Ok(())
                } else {
                    Err(interval - elapsed)
                }
            }
            None => {
                *last = Some(now);
                Ok(())
            }
        }
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The streaming gateway: admission state shared by every connection.
pub struct Gateway {
    admission: AdmissionConfig,
    local_guid: Uuid,
    registry: Arc<HostRegistry>,
    policy: Arc<dyn KeyPolicy>,
    gate: AdmissionGate,
    pool: Arc<ReceiverPool>,
    notifier: Arc<dyn NodeNotifier>,
    streaming_enabled: AtomicBool,
}

impl Gateway {
    pub fn new(
        admission: AdmissionConfig,
        local_guid: Uuid,
        registry: Arc<HostRegistry>,
        policy: Arc<dyn KeyPolicy>,
        pool: Arc<ReceiverPool>,
        notifier: Arc<dyn NodeNotifier>,
    ) -> Self {
        Self {
            admission,
            local_guid,
            registry,
            policy,
            gate: AdmissionGate::new(),
            pool,
            notifier,
            streaming_enabled: AtomicBool::new(true),
        }
    }

    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    /// Flipped off during shutdown so children get a retryable answer.
    pub fn set_streaming_enabled(&self, value: bool) {
        self.streaming_enabled.store(value, Ordering::Release);
    }

    pub fn streaming_enabled(&self) -> bool {
        self.streaming_enabled.load(Ordering::Acquire)
    }

    /// Run one upgrade request through the admission pipeline.
    ///
    /// On [`AcceptOutcome::Ok`] the transport has been taken over (or the
    /// peer was answered on the wire already); on any other outcome the
    /// front-end still owns the transport and sends the HTTP reply.
    pub fn accept_connection(
        &self,
        conn: &mut FrontEndConn,
        request: StreamRequest,
    ) -> AcceptOutcome {
        let mut rpt = ReceiverDescriptor::new(conn.peer);

        normalize::apply_params(
            &mut rpt,
            request
                .params
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );
        normalize::apply_user_agent(&mut rpt, request.user_agent.as_deref());
        normalize::finalize(&mut rpt, &self.admission);

        if !self.streaming_enabled() {
            log_status(
                &rpt,
                "streaming is disabled on this gateway",
                StreamStatus::ServiceUnavailable,
            );
            record_rejected(StreamStatus::ServiceUnavailable.as_str());
            return AcceptOutcome::Busy;
        }

        if let Err(status) = validate::check_access(&mut rpt, self.policy.as_ref(), conn.peer.ip())
        {
            log_status(&rpt, "streaming connection rejected", status);
            record_rejected(status.as_str());
            return AcceptOutcome::Unauthorized;
        }

        // A node streaming to itself would loop its own metrics forever.
        // This one gets an explicit on-wire answer so the operator can
        // see the misconfiguration in the child's logs.
        if rpt.machine_uuid == Some(self.local_guid) {
            log_status(
                &rpt,
                "child declared this gateway's own machine GUID",
                StreamStatus::SameLocalhost,
            );
            record_rejected(StreamStatus::SameLocalhost.as_str());
            rpt.transport = conn.take_transport();
            send_error_line(
                &mut rpt,
                ERR_SAME_LOCALHOST,
                Duration::from_secs(self.admission.handshake_send_timeout_secs),
            );
            if let Some(transport) = rpt.transport.as_ref() {
                transport.shutdown();
            }
            return AcceptOutcome::Ok;
        }

        let interval = Duration::from_secs(self.admission.streaming_rate_secs);
        if let Err(wait) = self.gate.try_admit(Instant::now(), interval) {
            log_status(&rpt, "admission rate limit hit", StreamStatus::RateLimit);
            tracing::debug!(wait_secs = wait.as_secs(), "next admission slot");
            record_rejected(StreamStatus::RateLimit.as_str());
            return AcceptOutcome::Busy;
        }

        if let Some(outcome) = self.resolve_duplicate(&rpt) {
            return outcome;
        }

        // Takeover. From here on every failure answers on the wire.
        rpt.transport = conn.take_transport();
        if rpt.transport.is_none() {
            log_status(&rpt, "transport already taken", StreamStatus::InternalError);
            record_rejected(StreamStatus::InternalError.as_str());
            return AcceptOutcome::Busy;
        }

        if let (Some(key), Some(guid)) = (rpt.key_uuid.as_ref(), rpt.machine_uuid.as_ref()) {
            rpt.settings = self.policy.receiver_settings(key, guid);
        }

        match handshake::send_first_response(&mut rpt, &self.registry, &self.admission) {
            Ok(host) => {
                dispatch::complete(rpt, host, &self.pool, self.notifier.as_ref());
                AcceptOutcome::Ok
            }
            Err(status) => {
                record_rejected(status.as_str());
                // The peer was already answered on the owned transport.
                if let Some(transport) = rpt.transport.as_ref() {
                    transport.shutdown();
                }
                AcceptOutcome::Ok
            }
        }
    }

    /// Resolve a duplicate connection for the same machine GUID.
    ///
    /// Returns None when the new attempt may proceed. The whole
    /// check-evict sequence holds the host's receiver lock, so a racing
    /// attempt for the same host waits here and then sees the winner's
    /// attachment.
    fn resolve_duplicate(&self, rpt: &ReceiverDescriptor) -> Option<AcceptOutcome> {
        let guid = rpt.machine_uuid?;
        let host = self.registry.find_by_guid(&guid)?;

        let mut slot = host.receiver_lock();
        let attachment = slot.as_ref()?;

        let idle = attachment.control.idle_secs();
        if idle < self.admission.stale_after_secs as i64 {
            log_status(
                rpt,
                "this node is already streaming to this gateway",
                StreamStatus::AlreadyConnected,
            );
            record_rejected(StreamStatus::AlreadyConnected.as_str());
            return Some(AcceptOutcome::Conflict);
        }

        // The attached receiver went silent. Ask it to stop and wait for
        // the acknowledgement; only a confirmed exit frees the slot.
        tracing::info!(
            machine_guid = %guid,
            idle_secs = idle,
            "evicting stale receiver in favor of a new connection"
        );
        attachment.control.signal_stop(StopReason::Stale);
        let acked = attachment
            .control
            .wait_done(Duration::from_secs(self.admission.stop_wait_secs));

        if !acked {
            log_status(
                rpt,
                "stale receiver did not exit in time",
                StreamStatus::AlreadyConnected,
            );
            record_rejected(StreamStatus::AlreadyConnected.as_str());
            return Some(AcceptOutcome::Conflict);
        }

        // The worker acknowledged before detaching; clear the slot here
        // so the new attempt can attach.
        *slot = None;
        record_eviction();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_disabled_when_interval_zero() {
        let gate = AdmissionGate::new();
        let now = Instant::now();
        for _ in 0..10 {
            assert_eq!(gate.try_admit(now, Duration::ZERO), Ok(()));
        }
    }

    #[test]
    fn test_gate_first_attempt_admitted() {
        let gate = AdmissionGate::new();
        assert_eq!(
            gate.try_admit(Instant::now(), Duration::from_secs(5)),
            Ok(())
        );
    }

    #[test]
    fn test_gate_rejects_within_interval() {
        let gate = AdmissionGate::new();
        let interval = Duration::from_secs(5);
        let t0 = Instant::now();

        assert_eq!(gate.try_admit(t0, interval), Ok(()));
        let wait = gate.try_admit(t0 + Duration::from_secs(2), interval).unwrap_err();
        assert_eq!(wait, Duration::from_secs(3));
    }

    #[test]
    fn test_gate_reopens_after_interval() {
        let gate = AdmissionGate::new();
        let interval = Duration::from_secs(5);
        let t0 = Instant::now();

        assert_eq!(gate.try_admit(t0, interval), Ok(()));
        assert_eq!(gate.try_admit(t0 + Duration::from_secs(5), interval), Ok(()));
        // the admitted attempt resets the window
        assert!(gate
            .try_admit(t0 + Duration::from_secs(6), interval)
            .is_err());
    }
}
