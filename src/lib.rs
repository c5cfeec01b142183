//! An agent-to-agent metrics-streaming gateway.
//!
//! Children connect with an HTTP upgrade request carrying their
//! credentials and declared identity. The gateway validates them,
//! negotiates a protocol tier, takes over the raw socket and hands it to
//! a receiver worker. At most one live receiver exists per node; stale
//! ones are evicted in favor of fresh connections.
//!
//! # Module Map
//! - [`config`]: file-backed configuration with validation
//! - [`http`]: the upgrade-request edge and the accept loop
//! - [`net`]: bounded listener and the owned transport handle
//! - [`security`]: key policy (kinds, enablement, IP allow-lists)
//! - [`stream`]: the admission pipeline itself
//! - [`registry`]: known hosts and their receiver attachments
//! - [`workers`]: blocking receiver threads
//! - [`resilience`], [`observability`], [`lifecycle`]: ambient plumbing

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod security;
pub mod stream;
pub mod workers;

pub use config::GatewayConfig;
pub use lifecycle::Shutdown;
pub use stream::Gateway;
