//! Shared HTTP request helpers for CLI commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use tether_services::{ChunkClient, HttpMethodClient};

use super::status::StatusResponse;

pub fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/api", port)
}

pub async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to tetherd at {} — is it running?", url))?
        .json::<T>()
        .await
        .context("failed to parse response")
}

/// Chunk client sized to the daemon's advertised transport ceiling.
pub async fn chunk_client(port: u16) -> Result<ChunkClient> {
    let status: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;
    let transport = HttpMethodClient::new(base_url(port), status.max_payload_bytes);
    Ok(ChunkClient::new(Arc::new(transport)))
}
