//! Chunk server — reassembles chunked calls and serves their results.
//!
//! Every in-flight call lives in the handle table until its response has
//! been fully delivered or its deadline passes. Per handle the life cycle is
//!
//! ```text
//! Receiving ──(all bytes in)──▶ Invoking ──▶ Responding ──(last byte out)──▶ removed
//! ```
//!
//! Envelopes for one handle are processed strictly one at a time (the
//! per-handle mutex); different handles never wait on each other, even
//! while a handler is running.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::Instant;

use tether_core::config::ChunkingConfig;
use tether_core::envelope::{ChunkEnvelope, RequestChunk, ResponseChunk, DEFAULT_CONTENT_TYPE};
use tether_core::{status, ProtocolViolation};

use crate::router::{MethodDiagnostic, MethodRouter};
use crate::transport::{deadline_after, MethodResponse};

/// Whatever executes a fully reassembled call.
pub trait MethodInvoker: Send + Sync {
    fn invoke<'a>(
        &'a self,
        method_name: &'a str,
        payload: Bytes,
        content_type: &'a str,
    ) -> BoxFuture<'a, MethodResponse>;
}

impl MethodInvoker for MethodRouter {
    fn invoke<'a>(
        &'a self,
        method_name: &'a str,
        payload: Bytes,
        content_type: &'a str,
    ) -> BoxFuture<'a, MethodResponse> {
        Box::pin(MethodRouter::invoke(self, method_name, payload, content_type))
    }
}

/// Limits the server enforces on every call.
#[derive(Debug, Clone)]
pub struct ChunkServerSettings {
    /// Largest fragment accepted or produced, whatever the client asks for.
    pub max_fragment_size: usize,
    /// Transport ceiling every serialized reply envelope must fit.
    pub max_envelope_bytes: usize,
    /// Absolute request size cap, independent of chunking.
    pub max_request_bytes: u64,
    /// Handle lifetime when the client sends no timeout.
    pub default_timeout: Duration,
    /// Upper bound on client supplied timeouts.
    pub max_timeout: Duration,
}

impl From<&ChunkingConfig> for ChunkServerSettings {
    fn from(config: &ChunkingConfig) -> Self {
        Self {
            max_fragment_size: config.fragment_size(),
            max_envelope_bytes: config.max_payload_bytes,
            max_request_bytes: config.max_request_bytes,
            default_timeout: config.handle_timeout(),
            max_timeout: config.max_handle_timeout(),
        }
    }
}

impl Default for ChunkServerSettings {
    fn default() -> Self {
        Self::from(&ChunkingConfig::default())
    }
}

enum Phase {
    Receiving {
        buffer: BytesMut,
    },
    /// Handler running. Only observable if the task driving it was dropped.
    Invoking,
    Responding {
        status: u16,
        content_type: String,
        payload: Bytes,
        sent: usize,
    },
}

struct InFlightInvocation {
    method_name: String,
    content_type: String,
    content_length: u64,
    /// Fragment size for the response, already clamped.
    chunk_limit: usize,
    created_at: Instant,
    phase: Phase,
}

struct Slot {
    deadline: Instant,
    invocation: Mutex<InFlightInvocation>,
}

/// Outcome of advancing one handle by one envelope.
struct Step {
    reply: ResponseChunk,
    finished: bool,
}

impl Step {
    fn more(reply: ResponseChunk) -> Self {
        Self {
            reply,
            finished: false,
        }
    }

    fn done(reply: ResponseChunk) -> Self {
        Self {
            reply,
            finished: true,
        }
    }
}

pub struct ChunkServer {
    invoker: Arc<dyn MethodInvoker>,
    settings: ChunkServerSettings,
    handles: DashMap<String, Arc<Slot>>,
}

impl ChunkServer {
    pub fn new(invoker: Arc<dyn MethodInvoker>, settings: ChunkServerSettings) -> Self {
        Self {
            invoker,
            settings,
            handles: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &ChunkServerSettings {
        &self.settings
    }

    /// Number of calls currently holding a handle.
    pub fn in_flight(&self) -> usize {
        self.handles.len()
    }

    /// Serialized form of [`ChunkServer::process`], as fed by a transport.
    /// Unparseable input is answered with a bad request envelope.
    pub async fn process_bytes(&self, raw: &[u8]) -> Result<Bytes, serde_json::Error> {
        let reply = match ChunkEnvelope::from_slice(raw) {
            Ok(envelope) => self.process(envelope).await,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable chunk envelope");
                error_reply(status::BAD_REQUEST, format!("invalid envelope: {e}")).into()
            }
        };
        reply.to_bytes()
    }

    /// Advance the call an envelope belongs to and return the reply.
    pub async fn process(&self, envelope: ChunkEnvelope) -> ChunkEnvelope {
        self.sweep();

        let reply = match RequestChunk::try_from(envelope) {
            Ok(RequestChunk::First {
                method_name,
                content_type,
                content_length,
                timeout,
                max_chunk_length,
                payload,
            }) => {
                self.open(
                    method_name,
                    content_type,
                    content_length,
                    timeout,
                    max_chunk_length,
                    payload,
                )
                .await
            }
            Ok(RequestChunk::Continuation { handle, payload }) => {
                self.resume(handle, payload).await
            }
            Err(violation) => violation_reply(None, &violation),
        };
        reply.into()
    }

    async fn open(
        &self,
        method_name: String,
        content_type: String,
        content_length: u64,
        timeout: Option<Duration>,
        max_chunk_length: Option<u64>,
        payload: Bytes,
    ) -> ResponseChunk {
        if content_length > self.settings.max_request_bytes {
            tracing::warn!(
                method = %method_name,
                content_length,
                limit = self.settings.max_request_bytes,
                "rejecting oversized chunked request"
            );
            return error_reply(
                status::PAYLOAD_TOO_LARGE,
                format!(
                    "request of {content_length} bytes exceeds the {} byte limit",
                    self.settings.max_request_bytes
                ),
            );
        }

        let timeout = timeout
            .unwrap_or(self.settings.default_timeout)
            .min(self.settings.max_timeout);
        let chunk_limit = max_chunk_length
            .map(|n| n.min(usize::MAX as u64) as usize)
            .unwrap_or(self.settings.max_fragment_size)
            .min(self.settings.max_fragment_size)
            .max(1);

        let now = Instant::now();
        let handle = new_handle();
        let slot = Arc::new(Slot {
            deadline: deadline_after(now, timeout),
            invocation: Mutex::new(InFlightInvocation {
                method_name,
                content_type,
                content_length,
                chunk_limit,
                created_at: now,
                phase: Phase::Receiving {
                    buffer: BytesMut::new(),
                },
            }),
        });

        // Hold the lock before publishing so nothing else can advance
        // the handle ahead of its first fragment.
        let mut invocation = slot.invocation.lock().await;
        self.handles.insert(handle.clone(), slot.clone());
        tracing::debug!(
            handle = %handle,
            method = %invocation.method_name,
            content_length,
            ?timeout,
            "chunked call opened"
        );

        let step = self.step(&handle, &mut invocation, payload).await;
        drop(invocation);
        self.finish(&handle, step)
    }

    async fn resume(&self, handle: String, payload: Bytes) -> ResponseChunk {
        let slot = match self.handles.get(&handle).map(|s| s.value().clone()) {
            Some(slot) => slot,
            None => return not_found(&handle),
        };
        if slot.deadline <= Instant::now() {
            self.handles.remove(&handle);
            return not_found(&handle);
        }

        let mut invocation = slot.invocation.lock().await;
        // Finished or expired while we waited for the lock.
        if !self.handles.contains_key(&handle) {
            return not_found(&handle);
        }
        let step = self.step(&handle, &mut invocation, payload).await;
        drop(invocation);
        self.finish(&handle, step)
    }

    fn finish(&self, handle: &str, step: Step) -> ResponseChunk {
        if step.finished {
            self.handles.remove(handle);
        }
        step.reply
    }

    async fn step(&self, handle: &str, inv: &mut InFlightInvocation, payload: Bytes) -> Step {
        match &mut inv.phase {
            Phase::Receiving { buffer } => {
                if payload.len() > self.settings.max_fragment_size {
                    return violation_step(
                        handle,
                        ProtocolViolation::ChunkTooLarge {
                            got: payload.len(),
                            limit: self.settings.max_fragment_size,
                        },
                    );
                }
                let received = (buffer.len() + payload.len()) as u64;
                if received > inv.content_length {
                    return violation_step(
                        handle,
                        ProtocolViolation::LengthOverflow {
                            declared: inv.content_length,
                            received,
                        },
                    );
                }
                if received < inv.content_length {
                    if payload.is_empty() {
                        return violation_step(
                            handle,
                            ProtocolViolation::UnexpectedKind("response pull before request completed"),
                        );
                    }
                    buffer.extend_from_slice(&payload);
                    return Step::more(ResponseChunk::Accepted {
                        handle: handle.to_string(),
                    });
                }
                buffer.extend_from_slice(&payload);
                let request = std::mem::take(buffer).freeze();
                inv.phase = Phase::Invoking;

                let result = self
                    .invoker
                    .invoke(&inv.method_name, request, &inv.content_type)
                    .await;
                tracing::debug!(
                    handle,
                    method = %inv.method_name,
                    status = result.status,
                    response_bytes = result.payload.len(),
                    elapsed_ms = inv.created_at.elapsed().as_millis() as u64,
                    "chunked call invoked"
                );
                inv.phase = Phase::Responding {
                    status: result.status,
                    content_type: result.content_type,
                    payload: result.payload,
                    sent: 0,
                };
                self.next_fragment(handle, inv)
            }
            Phase::Invoking => {
                tracing::warn!(handle, "envelope for a call whose invocation was abandoned");
                Step::done(error_reply(
                    status::INTERNAL_ERROR,
                    "invocation was abandoned before completing",
                ))
            }
            Phase::Responding { .. } => {
                if !payload.is_empty() {
                    return violation_step(
                        handle,
                        ProtocolViolation::UnexpectedKind("request fragment after request completed"),
                    );
                }
                self.next_fragment(handle, inv)
            }
        }
    }

    fn next_fragment(&self, handle: &str, inv: &mut InFlightInvocation) -> Step {
        let Phase::Responding {
            status,
            content_type,
            payload,
            sent,
        } = &mut inv.phase
        else {
            return violation_step(handle, ProtocolViolation::UnexpectedKind("pull"));
        };

        let first = *sent == 0;
        // Size against the longer, handle-carrying form of the reply.
        let shell = if first {
            ResponseChunk::First {
                handle: Some(handle.to_string()),
                status: *status,
                content_type: content_type.clone(),
                content_length: payload.len() as u64,
                payload: Bytes::new(),
            }
        } else {
            ResponseChunk::Continuation {
                handle: Some(handle.to_string()),
                payload: Bytes::new(),
            }
        };
        let room = match ChunkEnvelope::from(shell).payload_capacity(self.settings.max_envelope_bytes) {
            Ok(room) => room.min(inv.chunk_limit),
            Err(e) => {
                return Step::done(error_reply(
                    status::INTERNAL_ERROR,
                    format!("failed to size reply envelope: {e}"),
                ))
            }
        };
        if room == 0 && *sent < payload.len() {
            tracing::warn!(
                handle,
                method = %inv.method_name,
                limit = self.settings.max_envelope_bytes,
                "reply envelope fields exceed the transport ceiling"
            );
            return Step::done(error_reply(
                status::INTERNAL_ERROR,
                format!(
                    "response headers leave no room for payload within the {} byte transport limit",
                    self.settings.max_envelope_bytes
                ),
            ));
        }
        let end = (*sent + room).min(payload.len());
        let fragment = payload.slice(*sent..end);
        *sent = end;
        let done = end == payload.len();
        let next_handle = if done { None } else { Some(handle.to_string()) };

        let reply = if first {
            ResponseChunk::First {
                handle: next_handle,
                status: *status,
                content_type: content_type.clone(),
                content_length: payload.len() as u64,
                payload: fragment,
            }
        } else {
            ResponseChunk::Continuation {
                handle: next_handle,
                payload: fragment,
            }
        };

        if done {
            tracing::debug!(handle, method = %inv.method_name, "chunked call delivered");
            Step::done(reply)
        } else {
            Step::more(reply)
        }
    }

    /// Drop every handle whose deadline has passed. Returns how many.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.handles.len();
        self.handles.retain(|_, slot| slot.deadline > now);
        let removed = before.saturating_sub(self.handles.len());
        if removed > 0 {
            tracing::info!(removed, remaining = self.handles.len(), "expired chunked calls removed");
        }
        removed
    }

    /// Release every in-flight call.
    pub fn shutdown(&self) {
        let count = self.handles.len();
        self.handles.clear();
        tracing::info!(dropped = count, "chunk server shut down");
    }
}

fn new_handle() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

fn error_reply(status: u16, message: impl Into<String>) -> ResponseChunk {
    ResponseChunk::status_only(
        status,
        DEFAULT_CONTENT_TYPE,
        MethodDiagnostic::new(message).to_bytes(),
    )
}

fn not_found(handle: &str) -> ResponseChunk {
    tracing::debug!(handle, "unknown or expired handle");
    error_reply(status::NOT_FOUND, format!("handle not found: {handle}"))
}

fn violation_reply(handle: Option<&str>, violation: &ProtocolViolation) -> ResponseChunk {
    tracing::warn!(handle = ?handle, error = %violation, "chunk protocol violation");
    error_reply(status::BAD_REQUEST, violation.to_string())
}

fn violation_step(handle: &str, violation: ProtocolViolation) -> Step {
    Step::done(violation_reply(Some(handle), &violation))
}
