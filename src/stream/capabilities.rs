//! Protocol capability negotiation.
//!
//! # Responsibilities
//! - Map a requested protocol version to the capability set this gateway
//!   supports for it (monotonic: higher version, superset of capabilities)
//! - Map a capability set back to the numeric version for legacy replies
//! - Produce the first-response line for the negotiated tier
//!
//! # Design Decisions
//! - Pure functions only; negotiation has no side effects and is
//!   idempotent
//! - Unknown future versions degrade to the newest version we understand

use crate::stream::status::{REPLY_PROMPT_V1, REPLY_PROMPT_V2, REPLY_PROMPT_VN};

/// Negotiated protocol feature bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    /// Baseline streaming: plain metric values.
    pub const V1: Capabilities = Capabilities(1 << 0);
    /// Timestamped begin/end frames.
    pub const V2: Capabilities = Capabilities(1 << 1);
    /// Child understands numeric version negotiation.
    pub const VN: Capabilities = Capabilities(1 << 2);
    /// Child understands capability-bitmask negotiation.
    pub const VCAPS: Capabilities = Capabilities(1 << 3);
    /// Host labels forwarded with the stream.
    pub const HOST_LABELS: Capabilities = Capabilities(1 << 4);
    /// Gap replication of historic samples.
    pub const REPLICATION: Capabilities = Capabilities(1 << 5);
    /// Machine-learning flags forwarded with the stream.
    pub const ML: Capabilities = Capabilities(1 << 6);
    /// Remote function execution over the stream.
    pub const FUNCTIONS: Capabilities = Capabilities(1 << 7);

    pub const fn empty() -> Capabilities {
        Capabilities(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Capabilities) -> Capabilities {
        Capabilities(self.0 | other.0)
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        self.union(rhs)
    }
}

/// The newest protocol version this gateway understands.
pub const NEWEST_VERSION: u32 = 6;

/// The oldest version, used when the child declares nothing.
pub const OLDEST_VERSION: u32 = 0;

/// Capability set granted for a requested protocol version.
///
/// Monotonic by construction: each tier is built on top of the previous
/// one, and anything newer than [`NEWEST_VERSION`] clamps down to it.
pub fn capabilities_for_version(version: u32) -> Capabilities {
    let mut caps = Capabilities::V1;
    if version >= 2 {
        caps = caps | Capabilities::V2;
    }
    if version >= 3 {
        caps = caps | Capabilities::VN | Capabilities::HOST_LABELS;
    }
    if version >= 4 {
        caps = caps | Capabilities::REPLICATION;
    }
    if version >= 5 {
        caps = caps | Capabilities::ML | Capabilities::FUNCTIONS;
    }
    if version >= NEWEST_VERSION {
        caps = caps | Capabilities::VCAPS;
    }
    caps
}

/// Numeric version corresponding to a capability set, for children that
/// negotiate by version rather than bitmask.
pub fn version_for_capabilities(caps: Capabilities) -> u32 {
    if caps.contains(Capabilities::VCAPS) {
        NEWEST_VERSION
    } else if caps.contains(Capabilities::ML) || caps.contains(Capabilities::FUNCTIONS) {
        5
    } else if caps.contains(Capabilities::REPLICATION) {
        4
    } else if caps.contains(Capabilities::VN) {
        3
    } else if caps.contains(Capabilities::V2) {
        2
    } else {
        1
    }
}

/// The single first-response line for the negotiated tier.
pub fn first_reply(caps: Capabilities) -> String {
    if caps.contains(Capabilities::VCAPS) {
        format!("{}{}", REPLY_PROMPT_VN, caps.bits())
    } else if caps.contains(Capabilities::VN) {
        format!("{}{}", REPLY_PROMPT_VN, version_for_capabilities(caps))
    } else if caps.contains(Capabilities::V2) {
        REPLY_PROMPT_V2.to_string()
    } else {
        REPLY_PROMPT_V1.to_string()
    }
}
