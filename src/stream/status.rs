//! Admission status taxonomy and wire literals.
//!
//! Every rejection carries a distinct internal status tag for logs and
//! metrics, but the peer only ever sees one of a handful of generic
//! replies, so an unauthenticated client cannot probe policy details.

use crate::stream::descriptor::ReceiverDescriptor;

/// The negotiated first-response prompt shared by the numeric-version and
/// capabilities-bitmask tiers.
pub const REPLY_PROMPT_VN: &str = "STREAM GO version=";
/// Fixed reply for the v2 legacy tier.
pub const REPLY_PROMPT_V2: &str = "STREAM GO v2";
/// Fixed reply for the oldest tier.
pub const REPLY_PROMPT_V1: &str = "STREAM GO";

pub const ERR_NOT_PERMITTED: &str =
    "STREAM DENY: not permitted to connect. Check the gateway logs for details.";
pub const ERR_BUSY_TRY_LATER: &str =
    "STREAM BUSY: the gateway cannot accept this connection now. Try again later.";
pub const ERR_ALREADY_STREAMING: &str =
    "STREAM DENY: this node is already streaming to this gateway.";
pub const ERR_INTERNAL: &str = "STREAM ERROR: the gateway hit an internal error. Try again later.";
pub const ERR_INITIALIZATION: &str =
    "STREAM BUSY: the gateway is still initializing this node. Try again later.";
pub const ERR_SAME_LOCALHOST: &str =
    "STREAM DENY: this machine GUID belongs to the gateway itself.";

/// Internal status tags. Logged and counted, never sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    NoApiKey,
    NoHostname,
    NoMachineGuid,
    InvalidApiKey,
    InvalidMachineGuid,
    ApiKeyDisabled,
    MachineGuidDisabled,
    IpNotAllowed,
    SameLocalhost,
    RateLimit,
    AlreadyConnected,
    InitializationInProgress,
    DuplicateReceiver,
    InternalError,
    CantReply,
    ServiceUnavailable,
    Connected,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::NoApiKey => "NO_API_KEY",
            StreamStatus::NoHostname => "NO_HOSTNAME",
            StreamStatus::NoMachineGuid => "NO_MACHINE_GUID",
            StreamStatus::InvalidApiKey => "INVALID_API_KEY",
            StreamStatus::InvalidMachineGuid => "INVALID_MACHINE_GUID",
            StreamStatus::ApiKeyDisabled => "API_KEY_DISABLED",
            StreamStatus::MachineGuidDisabled => "MACHINE_GUID_DISABLED",
            StreamStatus::IpNotAllowed => "IP_NOT_ALLOWED",
            StreamStatus::SameLocalhost => "SAME_LOCALHOST",
            StreamStatus::RateLimit => "RATE_LIMIT",
            StreamStatus::AlreadyConnected => "ALREADY_CONNECTED",
            StreamStatus::InitializationInProgress => "INITIALIZATION_IN_PROGRESS",
            StreamStatus::DuplicateReceiver => "DUPLICATE_RECEIVER",
            StreamStatus::InternalError => "INTERNAL_SERVER_ERROR",
            StreamStatus::CantReply => "CANT_REPLY",
            StreamStatus::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            StreamStatus::Connected => "CONNECTED",
        }
    }
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one admission attempt, as seen by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Admitted, or a self/duplicate case already answered on the wire.
    Ok,
    /// Generic "not permitted" reply.
    Unauthorized,
    /// Generic "try later" reply.
    Busy,
    /// Duplicate connection: the front-end still owns the transport and
    /// must send the "already streaming" reply and clean up.
    Conflict,
}

/// Structured status log shared by every stage of the pipeline.
///
/// May be called before the receiver worker exists, so it carries all
/// identifying fields itself.
pub fn log_status(rpt: &ReceiverDescriptor, msg: &str, status: StreamStatus) {
    match status {
        StreamStatus::Connected => {
            tracing::info!(
                peer = %rpt.peer,
                node = rpt.hostname_or_dash(),
                api_key = rpt.key_or_empty(),
                machine_guid = rpt.machine_guid_or_empty(),
                status = status.as_str(),
                "{msg}"
            );
        }
        StreamStatus::SameLocalhost
        | StreamStatus::AlreadyConnected
        | StreamStatus::RateLimit
        | StreamStatus::InitializationInProgress
        | StreamStatus::DuplicateReceiver
        | StreamStatus::ServiceUnavailable => {
            tracing::info!(
                peer = %rpt.peer,
                node = rpt.hostname_or_dash(),
                api_key = rpt.key_or_empty(),
                machine_guid = rpt.machine_guid_or_empty(),
                status = status.as_str(),
                "{msg}"
            );
        }
        StreamStatus::InternalError | StreamStatus::CantReply => {
            tracing::error!(
                peer = %rpt.peer,
                node = rpt.hostname_or_dash(),
                api_key = rpt.key_or_empty(),
                machine_guid = rpt.machine_guid_or_empty(),
                status = status.as_str(),
                "{msg}"
            );
        }
        _ => {
            tracing::warn!(
                peer = %rpt.peer,
                node = rpt.hostname_or_dash(),
                api_key = rpt.key_or_empty(),
                machine_guid = rpt.machine_guid_or_empty(),
                status = status.as_str(),
                "{msg}"
            );
        }
    }
}
