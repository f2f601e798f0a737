//! Daemon status command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
pub struct StatusResponse {
    pub target_id: String,
    pub in_flight: usize,
    pub methods: Vec<String>,
    pub max_payload_bytes: usize,
    pub fragment_size: usize,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Tether Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Target id        : {}", resp.target_id);
    println!("  In-flight calls  : {}", resp.in_flight);
    println!("  Transport limit  : {} bytes", resp.max_payload_bytes);
    println!("  Fragment size    : {} bytes", resp.fragment_size);

    if resp.methods.is_empty() {
        println!("\n  No methods registered.");
    } else {
        println!("\n  Methods:");
        for m in &resp.methods {
            println!("    {}", m);
        }
    }

    Ok(())
}
