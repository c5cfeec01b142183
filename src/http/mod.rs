//! The HTTP edge of the gateway.

pub mod front_end;
pub mod server;

pub use front_end::{FrontEndConn, FrontEndError, StreamRequest, STREAM_PATH};
pub use server::GatewayServer;
