//! HTTP API handlers. The invoke primitive over HTTP, plus daemon status.

pub mod methods;
pub mod status;

use std::sync::Arc;

use tether_services::{ChunkServer, DispatchHandle, MethodRouter};

#[derive(Clone)]
pub struct ApiState {
    /// Target id this daemon answers to; other targets get 404.
    pub target_id: String,
    pub dispatch: DispatchHandle,
    pub router: MethodRouter,
    pub chunks: Arc<ChunkServer>,
    /// Transport ceiling; larger request bodies are rejected with 413.
    pub max_payload_bytes: usize,
}

pub use methods::handle_invoke;
pub use status::handle_status;
