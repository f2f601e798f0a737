//! Configuration system for Tether.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TETHER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tether/config.toml
//!   3. ~/.config/tether/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::envelope::{fragment_size, DEFAULT_ENVELOPE_OVERHEAD};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub chunking: ChunkingConfig,
    pub methods: MethodsConfig,
    pub tunnel: TunnelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Target id this daemon answers method calls for.
    pub target_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port of the HTTP method endpoint. Bound on 127.0.0.1.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Hard ceiling of one physical method payload.
    pub max_payload_bytes: usize,
    /// Bytes reserved for envelope fields out of each payload.
    pub envelope_overhead: usize,
    /// Handle lifetime when the caller does not send a timeout.
    pub handle_timeout_secs: u64,
    /// Upper bound on caller-supplied handle lifetimes.
    pub max_handle_timeout_secs: u64,
    /// How often abandoned handles are swept.
    pub sweep_interval_secs: u64,
    /// Largest request accepted regardless of chunking.
    pub max_request_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodsConfig {
    /// Largest payload accepted on a non-chunked call.
    pub max_direct_payload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Register the HTTP tunnel method.
    pub enabled: bool,
    /// Timeout of the real HTTP call made on behalf of a tunnel request.
    pub request_timeout_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            target_id: "edge".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { api_port: 9101 }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 128 * 1024,
            envelope_overhead: DEFAULT_ENVELOPE_OVERHEAD,
            handle_timeout_secs: 300,
            max_handle_timeout_secs: 3600,
            sweep_interval_secs: 10,
            max_request_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for MethodsConfig {
    fn default() -> Self {
        Self {
            max_direct_payload_bytes: 96 * 1024,
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_timeout_secs: 60,
        }
    }
}

impl ChunkingConfig {
    /// Fragment size implied by the transport ceiling.
    pub fn fragment_size(&self) -> usize {
        fragment_size(self.max_payload_bytes, self.envelope_overhead)
    }

    pub fn handle_timeout(&self) -> Duration {
        Duration::from_secs(self.handle_timeout_secs)
    }

    pub fn max_handle_timeout(&self) -> Duration {
        Duration::from_secs(self.max_handle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl TunnelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tether")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TetherConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            TetherConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TETHER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TetherConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TETHER_* overrides. `lookup` is `std::env::var` in production.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TETHER_IDENTITY__TARGET_ID") {
            self.identity.target_id = v;
        }
        if let Some(p) = lookup("TETHER_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(n) = lookup("TETHER_CHUNKING__MAX_PAYLOAD_BYTES").and_then(|v| v.parse().ok()) {
            self.chunking.max_payload_bytes = n;
        }
        if let Some(n) = lookup("TETHER_CHUNKING__HANDLE_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.chunking.handle_timeout_secs = n;
        }
        if let Some(n) = lookup("TETHER_CHUNKING__MAX_REQUEST_BYTES").and_then(|v| v.parse().ok()) {
            self.chunking.max_request_bytes = n;
        }
        if let Some(v) = lookup("TETHER_TUNNEL__ENABLED") {
            self.tunnel.enabled = v == "true" || v == "1";
        }
    }
}
