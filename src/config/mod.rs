//! Configuration subsystem: schema, loading, validation.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdmissionConfig, GatewayConfig, KeyEntry, ListenerConfig, NodeConfig, ObservabilityConfig,
    WorkersConfig,
};
