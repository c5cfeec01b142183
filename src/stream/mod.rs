//! The streaming admission pipeline.

pub mod admission;
pub mod capabilities;
pub mod descriptor;
pub mod dispatch;
pub mod handshake;
pub mod normalize;
pub mod status;
pub mod validate;

pub use admission::{AdmissionGate, Gateway};
pub use capabilities::Capabilities;
pub use descriptor::{ReceiverControl, ReceiverDescriptor, ReceiverId, StopReason, SystemInfo};
pub use dispatch::{LogNotifier, NodeNotifier};
pub use status::{AcceptOutcome, StreamStatus};
