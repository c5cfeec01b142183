//! Receiver worker threads.

pub mod pool;

pub use pool::{ActiveReceiver, FrameDrain, ReceiverPool, StreamProcessor};
