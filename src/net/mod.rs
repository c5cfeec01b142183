//! Network foundation: bounded listener and the owned transport handle.

pub mod listener;
pub mod transport;

pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use transport::Transport;
