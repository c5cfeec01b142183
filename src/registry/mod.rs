//! Host registry.

pub mod host;

pub use host::{Host, HostIdentity, HostMeta, HostRegistry, ReceiverAttachment};
