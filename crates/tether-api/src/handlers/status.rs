//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub target_id: String,
    /// Chunked calls currently holding a handle.
    pub in_flight: usize,
    pub methods: Vec<String>,
    pub max_payload_bytes: usize,
    pub fragment_size: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        target_id: state.target_id.clone(),
        in_flight: state.chunks.in_flight(),
        methods: state.router.methods(),
        max_payload_bytes: state.max_payload_bytes,
        fragment_size: state.chunks.settings().max_fragment_size,
    })
}
