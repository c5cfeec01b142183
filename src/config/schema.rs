//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the streaming gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// This node's own identity.
    pub node: NodeConfig,

    /// Admission pipeline tunables.
    pub admission: AdmissionConfig,

    /// Key policy entries (API keys and machine GUIDs).
    pub keys: Vec<KeyEntry>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Receiver worker pool settings.
    pub workers: WorkersConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:19999").
    pub bind_address: String,

    /// Maximum connections concurrently inside the admission pipeline.
    pub max_connections: usize,

    /// Seconds allowed for a client to deliver the full upgrade request.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:19999".to_string(),
            max_connections: 1024,
            request_timeout_secs: 60,
        }
    }
}

/// Identity of the local node, used by the self-connection guard.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's machine GUID. A child declaring the same GUID is
    /// refused with a dedicated on-wire message.
    pub machine_guid: String,

    /// This node's hostname, for logging.
    pub hostname: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            machine_guid: "00000000-0000-0000-0000-000000000000".to_string(),
            hostname: "localhost".to_string(),
        }
    }
}

/// Admission pipeline tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Global admission rate limit: at most one accepted connection per
    /// this many seconds. 0 disables the limiter.
    pub streaming_rate_secs: u64,

    /// An attached receiver with no activity for this many seconds is
    /// considered stale and eligible for eviction.
    pub stale_after_secs: u64,

    /// How long to wait for a stale receiver to acknowledge the stop
    /// signal before giving up and rejecting the new attempt.
    pub stop_wait_secs: u64,

    /// Receive timeout applied to the socket after takeover.
    pub receive_timeout_secs: u64,

    /// Send timeout for the negotiated first response.
    pub handshake_send_timeout_secs: u64,

    /// Send timeout for error messages sent on an already-owned transport.
    pub error_send_timeout_secs: u64,

    /// Default metric collection interval for children that do not
    /// declare one.
    pub default_update_every: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            streaming_rate_secs: 0,
            stale_after_secs: 30,
            stop_wait_secs: 5,
            receive_timeout_secs: 600,
            handshake_send_timeout_secs: 60,
            error_send_timeout_secs: 5,
            default_update_every: 1,
        }
    }
}

/// One key policy entry: either an API key or a machine GUID.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyEntry {
    /// The key itself (UUID string).
    pub id: String,

    /// "api" or "machine".
    pub kind: String,

    /// Whether the key is enabled. When omitted, API keys default to
    /// disabled and machine GUIDs default to enabled.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// IP allow-list patterns ('*' wildcards, '!' prefix negates).
    #[serde(default = "default_allow_from")]
    pub allow_from: Vec<String>,

    /// Mark hosts connecting under this entry as ephemeral.
    #[serde(default)]
    pub ephemeral: bool,
}

fn default_allow_from() -> Vec<String> {
    vec!["*".to_string()]
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Receiver worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Number of receiver worker threads.
    pub threads: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { threads: 4 }
    }
}
