//! tether-core — wire envelope, tunnel models, errors, and configuration.
//! All other Tether crates depend on this one.

pub mod config;
pub mod envelope;
pub mod error;
pub mod status;
pub mod tunnel;

pub use envelope::{ChunkEnvelope, RequestChunk, ResponseChunk, CALL_METHOD};
pub use error::{ProtocolViolation, TunnelError};
pub use tunnel::{HttpTunnelRequest, HttpTunnelResponse};
