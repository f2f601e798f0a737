//! Chunked method call command.

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;

use tether_core::envelope::DEFAULT_CONTENT_TYPE;

use super::http::chunk_client;

pub async fn cmd_call(
    port: u16,
    target: &str,
    method: &str,
    json: Option<&str>,
    timeout: Duration,
) -> Result<()> {
    let payload = match json {
        Some(text) => {
            // Reject malformed input locally instead of as a remote 400.
            serde_json::from_str::<serde_json::Value>(text).context("argument is not valid JSON")?;
            Bytes::from(text.to_string())
        }
        None => Bytes::new(),
    };

    let client = chunk_client(port).await?;
    let result = client
        .call(target, method, payload, DEFAULT_CONTENT_TYPE, timeout)
        .await
        .with_context(|| format!("call to {method} on {target} failed"))?;

    match serde_json::from_slice::<serde_json::Value>(&result.payload) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", String::from_utf8_lossy(&result.payload)),
    }
    Ok(())
}
