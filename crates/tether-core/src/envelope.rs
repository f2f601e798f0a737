//! Chunk envelope — the unit exchanged on every physical method call.
//!
//! A chunked call is a sequence of envelopes sent to the reserved method
//! [`CALL_METHOD`]. The flat [`ChunkEnvelope`] is what travels on the wire;
//! [`RequestChunk`] and [`ResponseChunk`] are the typed views both ends
//! actually reason about. Converting a wire envelope into a typed view is
//! where malformed sequences are rejected.
//!
//! Field presence is part of the format: absent optional fields are
//! omitted entirely, never encoded as `null`.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolViolation;

/// Method name every chunk envelope is sent under.
pub const CALL_METHOD: &str = "$call";

/// Content type of a serialized envelope.
pub const ENVELOPE_CONTENT_TYPE: &str = "application/json";

/// Content type assumed when a caller does not name one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Bytes reserved for envelope fields when sizing fragments.
pub const DEFAULT_ENVELOPE_OVERHEAD: usize = 512;

/// What a payload field adds beyond its hex digits: `,"payload":""`.
const PAYLOAD_FIELD_OVERHEAD: usize = 13;

// ── Wire form ────────────────────────────────────────────────────────────────

/// Flat wire representation of one chunk round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,

    #[serde(rename = "method", default, skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,

    /// Fragment bytes, hex-encoded on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_bytes")]
    pub payload: Option<Bytes>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Overall call timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(rename = "chunkLength", default, skip_serializing_if = "Option::is_none")]
    pub max_chunk_length: Option<u64>,
}

impl ChunkEnvelope {
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// Largest payload this envelope could carry while its serialized form
    /// stays within `max_envelope_bytes`. Any payload already set is ignored.
    pub fn payload_capacity(&self, max_envelope_bytes: usize) -> Result<usize, serde_json::Error> {
        let bare = ChunkEnvelope {
            payload: None,
            ..self.clone()
        };
        let used = serde_json::to_vec(&bare)?.len() + PAYLOAD_FIELD_OVERHEAD;
        Ok(max_envelope_bytes.saturating_sub(used) / 2)
    }

    fn payload_len(&self) -> usize {
        self.payload.as_ref().map(|p| p.len()).unwrap_or(0)
    }
}

/// Largest fragment that fits a transport ceiling once envelope fields are
/// accounted for. Hex doubles every payload byte. Never less than one byte,
/// so a degenerate ceiling still makes progress.
pub fn fragment_size(max_payload_bytes: usize, envelope_overhead: usize) -> usize {
    (max_payload_bytes.saturating_sub(envelope_overhead) / 2).max(1)
}

// ── Request direction ────────────────────────────────────────────────────────

/// Envelope sent by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestChunk {
    /// Opens a call. Carries everything the server needs to size the
    /// request buffer and shape the response.
    First {
        method_name: String,
        content_type: String,
        content_length: u64,
        timeout: Option<Duration>,
        max_chunk_length: Option<u64>,
        payload: Bytes,
    },
    /// Next request fragment. With an empty payload once the request is
    /// complete, a pull for the next response fragment.
    Continuation { handle: String, payload: Bytes },
}

impl From<RequestChunk> for ChunkEnvelope {
    fn from(chunk: RequestChunk) -> Self {
        match chunk {
            RequestChunk::First {
                method_name,
                content_type,
                content_length,
                timeout,
                max_chunk_length,
                payload,
            } => ChunkEnvelope {
                method_name: Some(method_name),
                content_type: Some(content_type),
                content_length: Some(content_length),
                timeout: timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
                max_chunk_length,
                payload: non_empty(payload),
                ..Default::default()
            },
            RequestChunk::Continuation { handle, payload } => ChunkEnvelope {
                handle: Some(handle),
                payload: non_empty(payload),
                ..Default::default()
            },
        }
    }
}

impl TryFrom<ChunkEnvelope> for RequestChunk {
    type Error = ProtocolViolation;

    fn try_from(env: ChunkEnvelope) -> Result<Self, Self::Error> {
        if env.status.is_some() {
            return Err(ProtocolViolation::UnexpectedField("status"));
        }
        match (env.method_name, env.handle) {
            (Some(_), Some(_)) => Err(ProtocolViolation::UnexpectedHandle),
            (Some(method_name), None) => {
                let content_length = env
                    .content_length
                    .ok_or(ProtocolViolation::MissingContentLength)?;
                Ok(RequestChunk::First {
                    method_name,
                    content_type: env
                        .content_type
                        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                    content_length,
                    timeout: env.timeout.map(Duration::from_millis),
                    max_chunk_length: env.max_chunk_length,
                    payload: env.payload.unwrap_or_default(),
                })
            }
            (None, Some(handle)) => {
                if env.content_length.is_some() {
                    return Err(ProtocolViolation::UnexpectedField("contentLength"));
                }
                if env.timeout.is_some() || env.max_chunk_length.is_some() {
                    return Err(ProtocolViolation::UnexpectedField("timeout"));
                }
                Ok(RequestChunk::Continuation {
                    handle,
                    payload: env.payload.unwrap_or_default(),
                })
            }
            (None, None) => Err(ProtocolViolation::MissingMethodOrHandle),
        }
    }
}

// ── Response direction ───────────────────────────────────────────────────────

/// Envelope returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseChunk {
    /// Request fragment stored; more request bytes are expected.
    Accepted { handle: String },
    /// Opens the response. `handle` is `None` when this envelope already
    /// carries the whole result.
    First {
        handle: Option<String>,
        status: u16,
        content_type: String,
        content_length: u64,
        payload: Bytes,
    },
    /// Next response fragment. `handle` is `None` on the final one.
    Continuation {
        handle: Option<String>,
        payload: Bytes,
    },
}

impl ResponseChunk {
    /// A complete single-envelope response, used for errors reported
    /// before or instead of a handle.
    pub fn status_only(status: u16, content_type: &str, payload: Bytes) -> Self {
        ResponseChunk::First {
            handle: None,
            status,
            content_type: content_type.to_string(),
            content_length: payload.len() as u64,
            payload,
        }
    }

    pub fn handle(&self) -> Option<&str> {
        match self {
            ResponseChunk::Accepted { handle } => Some(handle),
            ResponseChunk::First { handle, .. } | ResponseChunk::Continuation { handle, .. } => {
                handle.as_deref()
            }
        }
    }
}

impl From<ResponseChunk> for ChunkEnvelope {
    fn from(chunk: ResponseChunk) -> Self {
        match chunk {
            ResponseChunk::Accepted { handle } => ChunkEnvelope {
                handle: Some(handle),
                ..Default::default()
            },
            ResponseChunk::First {
                handle,
                status,
                content_type,
                content_length,
                payload,
            } => ChunkEnvelope {
                handle,
                status: Some(status),
                content_type: Some(content_type),
                content_length: Some(content_length),
                payload: non_empty(payload),
                ..Default::default()
            },
            ResponseChunk::Continuation { handle, payload } => ChunkEnvelope {
                handle,
                payload: non_empty(payload),
                ..Default::default()
            },
        }
    }
}

impl TryFrom<ChunkEnvelope> for ResponseChunk {
    type Error = ProtocolViolation;

    fn try_from(env: ChunkEnvelope) -> Result<Self, Self::Error> {
        if env.method_name.is_some() {
            return Err(ProtocolViolation::UnexpectedField("method"));
        }
        let has_payload = env.payload_len() > 0;
        match env.status {
            Some(status) => Ok(ResponseChunk::First {
                handle: env.handle,
                status,
                content_type: env
                    .content_type
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                content_length: env
                    .content_length
                    .ok_or(ProtocolViolation::MissingContentLength)?,
                payload: env.payload.unwrap_or_default(),
            }),
            None if has_payload => Ok(ResponseChunk::Continuation {
                handle: env.handle,
                payload: env.payload.unwrap_or_default(),
            }),
            None => match env.handle {
                Some(handle) => Ok(ResponseChunk::Accepted { handle }),
                None => Err(ProtocolViolation::EmptyResponse),
            },
        }
    }
}

fn non_empty(payload: Bytes) -> Option<Bytes> {
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

// ── Payload encoding ─────────────────────────────────────────────────────────

mod hex_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Bytes>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_str(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Bytes>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(text) => hex::decode(text)
                .map(|v| Some(Bytes::from(v)))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
