//! Resilience primitives shared across subsystems.

pub mod backoff;

pub use backoff::{calculate_backoff, ParentBackoff};
