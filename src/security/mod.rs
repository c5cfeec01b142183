//! Security: key policy store and IP allow-lists.

pub mod keys;

pub use keys::{ConfigKeyPolicy, IpAcl, KeyKind, KeyPolicy, ReceiverSettings};
