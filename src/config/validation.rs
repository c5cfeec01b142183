//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that addresses parse and identities are well-formed UUIDs
//! - Validate value ranges (thresholds > 0, worker count > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before the config is accepted into the system

use std::net::SocketAddr;

use uuid::Uuid;

use crate::config::schema::GatewayConfig;

/// A single validation failure, pointing at the offending field.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a loaded configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError {
            field: "listener.bind_address".into(),
            message: format!("not a valid socket address: {}", config.listener.bind_address),
        });
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError {
            field: "listener.max_connections".into(),
            message: "must be greater than zero".into(),
        });
    }

    if Uuid::parse_str(&config.node.machine_guid).is_err() {
        errors.push(ValidationError {
            field: "node.machine_guid".into(),
            message: format!("not a valid UUID: {}", config.node.machine_guid),
        });
    }

    if config.admission.stale_after_secs == 0 {
        errors.push(ValidationError {
            field: "admission.stale_after_secs".into(),
            message: "must be greater than zero".into(),
        });
    }

    if config.workers.threads == 0 {
        errors.push(ValidationError {
            field: "workers.threads".into(),
            message: "must be greater than zero".into(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError {
            field: "observability.metrics_address".into(),
            message: format!(
                "not a valid socket address: {}",
                config.observability.metrics_address
            ),
        });
    }

    for (i, entry) in config.keys.iter().enumerate() {
        if Uuid::parse_str(&entry.id).is_err() {
            errors.push(ValidationError {
                field: format!("keys[{i}].id"),
                message: format!("not a valid UUID: {}", entry.id),
            });
        }
        if entry.kind != "api" && entry.kind != "machine" {
            errors.push(ValidationError {
                field: format!("keys[{i}].kind"),
                message: format!("expected \"api\" or \"machine\", got {:?}", entry.kind),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
