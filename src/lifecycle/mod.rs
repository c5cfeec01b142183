//! Lifecycle management.
//!
//! Ordered shutdown: stop accepting, signal attached receivers, drain
//! the worker pool, exit.

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
