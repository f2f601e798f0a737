//! Chunk client — carries one logical call of any size over the
//! size-bounded invoke primitive.
//!
//! Upload the request in fragments, then pull the response in fragments
//! until the server stops returning a handle. Round trips for one call are
//! strictly sequential; the next envelope is only sent once the previous
//! reply has arrived.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use tether_core::envelope::{
    fragment_size, ChunkEnvelope, RequestChunk, ResponseChunk, CALL_METHOD,
    DEFAULT_ENVELOPE_OVERHEAD, ENVELOPE_CONTENT_TYPE,
};
use tether_core::{status, ProtocolViolation, TunnelError};

use crate::transport::{deadline_after, MethodClient};

/// Payload and content type of a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCallResult {
    pub payload: Bytes,
    pub content_type: String,
}

pub struct ChunkClient {
    transport: Arc<dyn MethodClient>,
    /// Request bytes per envelope.
    fragment_size: usize,
    /// Response bytes per envelope asked of the server.
    max_chunk_length: usize,
}

/// Per-call bookkeeping shared by every round trip.
struct CallContext<'a> {
    target: &'a str,
    timeout: Duration,
    deadline: Instant,
    round_trips: usize,
}

impl ChunkClient {
    /// Size fragments from the transport's advertised ceiling.
    pub fn new(transport: Arc<dyn MethodClient>) -> Self {
        let size = fragment_size(transport.max_payload_size(), DEFAULT_ENVELOPE_OVERHEAD);
        Self {
            transport,
            fragment_size: size,
            max_chunk_length: size,
        }
    }

    /// Re-derive fragment sizes with a different envelope overhead.
    pub fn with_envelope_overhead(mut self, overhead: usize) -> Self {
        let size = fragment_size(self.transport.max_payload_size(), overhead);
        self.fragment_size = size;
        self.max_chunk_length = size;
        self
    }

    /// Use an explicit fragment size in both directions. Sizes below one
    /// are raised to one byte per round trip.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.fragment_size = size.max(1);
        self.max_chunk_length = size.max(1);
        self
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// Call `method_name` on `target` with a payload of any size.
    ///
    /// `timeout` bounds the whole exchange, not one round trip. Once it
    /// elapses no further envelope is sent; the server reclaims the handle
    /// on its own. Dropping the returned future cancels the call at the
    /// next round-trip boundary in the same way.
    pub async fn call(
        &self,
        target: &str,
        method_name: &str,
        payload: Bytes,
        content_type: &str,
        timeout: Duration,
    ) -> Result<ChunkCallResult, TunnelError> {
        let mut ctx = CallContext {
            target,
            timeout,
            deadline: deadline_after(Instant::now(), timeout),
            round_trips: 0,
        };
        let total = payload.len();

        // ── Upload ───────────────────────────────────────────────────────
        let open = |fragment: Bytes| RequestChunk::First {
            method_name: method_name.to_string(),
            content_type: content_type.to_string(),
            content_length: total as u64,
            timeout: Some(timeout),
            max_chunk_length: Some(self.max_chunk_length as u64),
            payload: fragment,
        };
        let mut offset = total.min(self.room(&open(Bytes::new()), total)?);
        let mut reply = self.round_trip(&mut ctx, open(payload.slice(..offset))).await?;

        while offset < total {
            let handle = match reply {
                ResponseChunk::Accepted { handle } => handle,
                // The server answered before taking everything; only an
                // error status can legitimately do that.
                ResponseChunk::First { .. } => break,
                ResponseChunk::Continuation { .. } => {
                    return Err(ProtocolViolation::UnexpectedKind("response continuation during upload").into())
                }
            };
            let mut next = RequestChunk::Continuation {
                handle,
                payload: Bytes::new(),
            };
            let end = (offset + self.room(&next, total - offset)?).min(total);
            if let RequestChunk::Continuation { payload: fragment, .. } = &mut next {
                *fragment = payload.slice(offset..end);
            }
            reply = self.round_trip(&mut ctx, next).await?;
            offset = end;
        }

        // ── Download ─────────────────────────────────────────────────────
        let (status, content_type, declared, mut handle, first_payload) = match reply {
            ResponseChunk::First {
                handle,
                status,
                content_type,
                content_length,
                payload,
            } => (status, content_type, content_length, handle, payload),
            ResponseChunk::Accepted { .. } => {
                return Err(ProtocolViolation::UnexpectedKind("acknowledgement after request completed").into())
            }
            ResponseChunk::Continuation { .. } => {
                return Err(ProtocolViolation::UnexpectedKind("response continuation before first").into())
            }
        };

        // Errors raised by the chunk server itself arrive whole, outside
        // the negotiated fragment size.
        if handle.is_none() && !status::is_success(status) {
            tracing::debug!(method = method_name, status, round_trips = ctx.round_trips, "chunked call rejected");
            return Err(TunnelError::RemoteStatus {
                status,
                payload: first_payload,
            });
        }

        let mut received = BytesMut::with_capacity(declared.min(16 * 1024 * 1024) as usize);
        self.accept(&mut received, first_payload, declared)?;

        while let Some(h) = handle {
            match self
                .round_trip(
                    &mut ctx,
                    RequestChunk::Continuation {
                        handle: h,
                        payload: Bytes::new(),
                    },
                )
                .await?
            {
                ResponseChunk::Continuation {
                    handle: next,
                    payload,
                } => {
                    self.accept(&mut received, payload, declared)?;
                    handle = next;
                }
                // Handle expired or the server gave up on it.
                ResponseChunk::First {
                    status, payload, ..
                } if !status::is_success(status) => {
                    return Err(TunnelError::RemoteStatus { status, payload })
                }
                _ => return Err(ProtocolViolation::UnexpectedKind("reply to response pull").into()),
            }
        }

        if received.len() as u64 != declared {
            return Err(ProtocolViolation::LengthUnderflow {
                declared,
                received: received.len() as u64,
            }
            .into());
        }

        tracing::debug!(
            method = method_name,
            status,
            round_trips = ctx.round_trips,
            request_bytes = total,
            response_bytes = received.len(),
            "chunked call completed"
        );

        let payload = received.freeze();
        if !status::is_success(status) {
            return Err(TunnelError::RemoteStatus { status, payload });
        }
        Ok(ChunkCallResult {
            payload,
            content_type,
        })
    }

    /// Request bytes `request` can carry: the fragment size, further
    /// limited so the serialized envelope stays within the transport
    /// ceiling. Fails when the envelope fields alone leave no room and
    /// `remaining` bytes still need sending.
    fn room(&self, request: &RequestChunk, remaining: usize) -> Result<usize, TunnelError> {
        let ceiling = self.transport.max_payload_size();
        let envelope: ChunkEnvelope = request.clone().into();
        let room = envelope.payload_capacity(ceiling)?.min(self.fragment_size);
        if room == 0 && remaining > 0 {
            return Err(TunnelError::Transport(format!(
                "envelope fields leave no room for payload within the {ceiling} byte transport limit"
            )));
        }
        Ok(room)
    }

    fn accept(&self, received: &mut BytesMut, fragment: Bytes, declared: u64) -> Result<(), TunnelError> {
        if fragment.len() > self.max_chunk_length {
            return Err(ProtocolViolation::ChunkTooLarge {
                got: fragment.len(),
                limit: self.max_chunk_length,
            }
            .into());
        }
        let total = (received.len() + fragment.len()) as u64;
        if total > declared {
            return Err(ProtocolViolation::LengthOverflow {
                declared,
                received: total,
            }
            .into());
        }
        received.extend_from_slice(&fragment);
        Ok(())
    }

    async fn round_trip(
        &self,
        ctx: &mut CallContext<'_>,
        request: RequestChunk,
    ) -> Result<ResponseChunk, TunnelError> {
        let remaining = ctx
            .deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or(TunnelError::Timeout(ctx.timeout))?;

        let envelope: ChunkEnvelope = request.into();
        let raw = envelope.to_bytes()?;
        ctx.round_trips += 1;

        let reply = tokio::time::timeout(
            remaining,
            self.transport
                .call(ctx.target, CALL_METHOD, raw, ENVELOPE_CONTENT_TYPE, remaining),
        )
        .await
        .map_err(|_| TunnelError::Timeout(ctx.timeout))??;

        let envelope = ChunkEnvelope::from_slice(&reply)?;
        Ok(ResponseChunk::try_from(envelope)?)
    }
}
