//! Host binding and the negotiated first response.
//!
//! # Responsibilities
//! - Find or create the host record for an admitted descriptor
//! - Attach the receiver to the host, enforcing one live receiver
//! - Send the negotiated first response on the taken-over transport
//!
//! This stage runs after takeover: the descriptor owns the transport, so
//! every failure here must answer the peer on the wire itself. The HTTP
//! front-end no longer can.

use std::time::Duration;

use std::sync::Arc;

use crate::config::AdmissionConfig;
use crate::registry::{HostIdentity, HostMeta, HostRegistry, ReceiverAttachment};
use crate::stream::capabilities::first_reply;
use crate::stream::descriptor::ReceiverDescriptor;
use crate::stream::status::{
    log_status, StreamStatus, ERR_ALREADY_STREAMING, ERR_INITIALIZATION, ERR_INTERNAL,
};

/// Send a single line on the descriptor's transport, best effort. Used
/// for error replies where the connection is being dropped anyway.
pub fn send_error_line(rpt: &mut ReceiverDescriptor, text: &str, timeout: Duration) {
    let line = format!("{text}\n");
    if let Some(transport) = rpt.transport.as_mut() {
        let _ = transport.send_timeout(line.as_bytes(), timeout);
    }
}

fn identity_from(rpt: &ReceiverDescriptor) -> HostIdentity {
    HostIdentity {
        // check_access ran before this stage
        machine_guid: rpt.machine_uuid.unwrap_or_default(),
        hostname: rpt.hostname.clone().unwrap_or_default(),
        registry_hostname: rpt
            .registry_hostname
            .clone()
            .or_else(|| rpt.hostname.clone())
            .unwrap_or_default(),
        meta: HostMeta {
            os: rpt.os.clone(),
            timezone: rpt.timezone.clone(),
            abbrev_timezone: rpt.abbrev_timezone.clone(),
            utc_offset: rpt.utc_offset,
            program_name: rpt.program_name.clone(),
            program_version: rpt.program_version.clone(),
            update_every: rpt.update_every.unwrap_or(1),
        },
    }
}

/// Bind the descriptor to its host and send the negotiated first
/// response.
///
/// On success the descriptor is attached to the returned host and the
/// peer has been told to start streaming. On failure the peer has been
/// answered on the wire and the returned status says why.
pub fn send_first_response(
    rpt: &mut ReceiverDescriptor,
    registry: &HostRegistry,
    config: &AdmissionConfig,
) -> Result<Arc<crate::registry::Host>, StreamStatus> {
    let error_timeout = Duration::from_secs(config.error_send_timeout_secs);

    let identity = identity_from(rpt);
    let system_info = rpt.system_info.take();

    let Some(host) = registry.find_or_create(identity, system_info) else {
        log_status(rpt, "cannot find or create host", StreamStatus::InternalError);
        send_error_line(rpt, ERR_INTERNAL, error_timeout);
        return Err(StreamStatus::InternalError);
    };

    if host.is_pending_init() {
        log_status(
            rpt,
            "host is still initializing",
            StreamStatus::InitializationInProgress,
        );
        send_error_line(rpt, ERR_INITIALIZATION, error_timeout);
        return Err(StreamStatus::InitializationInProgress);
    }

    if !registry.accepting_children() {
        log_status(
            rpt,
            "gateway is not accepting children right now",
            StreamStatus::ServiceUnavailable,
        );
        send_error_line(rpt, ERR_INITIALIZATION, error_timeout);
        return Err(StreamStatus::ServiceUnavailable);
    }

    let attached = host.attach_receiver(ReceiverAttachment {
        id: rpt.id,
        hostname: rpt.hostname_or_dash().to_string(),
        control: rpt.control.clone(),
    });
    if !attached {
        log_status(
            rpt,
            "another receiver attached to this host first",
            StreamStatus::DuplicateReceiver,
        );
        send_error_line(rpt, ERR_ALREADY_STREAMING, error_timeout);
        return Err(StreamStatus::DuplicateReceiver);
    }

    // The receiver owns the socket from here on; it reads in blocking
    // mode with the configured receive timeout.
    if let Some(transport) = rpt.transport.as_ref() {
        transport.prepare_for_streaming(Duration::from_secs(config.receive_timeout_secs));
    }

    let caps = rpt.capabilities.unwrap_or_default();
    let reply = format!("{}\n", first_reply(caps));
    let timeout = Duration::from_secs(config.handshake_send_timeout_secs);
    let sent = match rpt.transport.as_mut() {
        Some(transport) => transport.send_timeout(reply.as_bytes(), timeout).unwrap_or(0),
        None => 0,
    };

    if sent != reply.len() {
        host.clear_receiver(rpt.id);
        log_status(rpt, "cannot reply back to the child", StreamStatus::CantReply);
        return Err(StreamStatus::CantReply);
    }

    rpt.host = Some(host.clone());
    Ok(host)
}
