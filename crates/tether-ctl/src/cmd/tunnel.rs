//! Tunneled HTTP request command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;

use tether_services::HttpTunnelClient;

use super::http::chunk_client;

pub async fn cmd_http(
    port: u16,
    target: &str,
    method: &str,
    url: &str,
    body: Option<&str>,
    timeout: Duration,
) -> Result<()> {
    let chunks = Arc::new(chunk_client(port).await?);
    let client = HttpTunnelClient::new(chunks, target, timeout);

    const JSON: &[(&str, &str)] = &[("content-type", "application/json")];
    let (headers, body) = match body {
        Some(b) => (JSON, Bytes::from(b.to_string())),
        None => (&[][..], Bytes::new()),
    };

    let response = client
        .send(method, url, headers, body, None)
        .await
        .with_context(|| format!("tunneled {method} {url} failed"))?;

    println!("HTTP {}", response.status);
    for (name, values) in &response.headers {
        for value in values {
            println!("{}: {}", name, value);
        }
    }
    println!();
    println!("{}", String::from_utf8_lossy(&response.body));
    Ok(())
}
