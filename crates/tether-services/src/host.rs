//! Receiving end of the invoke primitive.
//!
//! Every physical call arriving from a transport lands here. The reserved
//! `$call` method feeds the chunk server; anything else is a direct call
//! bounded by the transport's payload limit.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};

use tether_core::envelope::{CALL_METHOD, ENVELOPE_CONTENT_TYPE};
use tether_core::{status, TunnelError};

use crate::chunk_server::{ChunkServer, ChunkServerSettings};
use crate::router::{MethodDiagnostic, MethodRouter};
use crate::transport::MethodResponse;

/// One physical call as delivered by a transport.
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: String,
    pub payload: Bytes,
    pub content_type: String,
}

#[derive(Clone)]
pub struct MethodHost {
    router: MethodRouter,
    chunks: Arc<ChunkServer>,
    max_direct_payload: usize,
}

impl MethodHost {
    pub fn new(router: MethodRouter, chunks: Arc<ChunkServer>, max_direct_payload: usize) -> Self {
        Self {
            router,
            chunks,
            max_direct_payload,
        }
    }

    /// Host with a chunk server on default settings.
    pub fn for_router(router: MethodRouter, max_direct_payload: usize) -> Self {
        let chunks = Arc::new(ChunkServer::new(
            Arc::new(router.clone()),
            ChunkServerSettings::default(),
        ));
        Self::new(router, chunks, max_direct_payload)
    }

    pub fn router(&self) -> &MethodRouter {
        &self.router
    }

    pub fn chunks(&self) -> &Arc<ChunkServer> {
        &self.chunks
    }

    pub async fn handle(&self, call: MethodCall) -> MethodResponse {
        if call.method == CALL_METHOD {
            return match self.chunks.process_bytes(&call.payload).await {
                Ok(payload) => MethodResponse {
                    status: status::OK,
                    payload,
                    content_type: ENVELOPE_CONTENT_TYPE.to_string(),
                },
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode chunk reply");
                    MethodDiagnostic::new("failed to encode chunk reply")
                        .into_response(status::INTERNAL_ERROR)
                }
            };
        }

        if call.payload.len() > self.max_direct_payload {
            tracing::debug!(
                method = %call.method,
                size = call.payload.len(),
                limit = self.max_direct_payload,
                "direct payload too large"
            );
            return MethodDiagnostic::new(format!(
                "payload of {} bytes exceeds the {} byte limit for direct calls",
                call.payload.len(),
                self.max_direct_payload
            ))
            .into_response(status::PAYLOAD_TOO_LARGE);
        }

        self.router
            .invoke(&call.method, call.payload, &call.content_type)
            .await
    }
}

// ── Dispatch worker ──────────────────────────────────────────────────────────

type Job = (MethodCall, oneshot::Sender<MethodResponse>);

/// Pulls calls off the transport queue and runs each on its own task, so
/// a slow handler never delays the next envelope.
pub struct DispatchWorker {
    host: MethodHost,
    call_rx: mpsc::Receiver<Job>,
    shutdown: broadcast::Receiver<()>,
}

impl DispatchWorker {
    pub fn new(host: MethodHost, call_rx: mpsc::Receiver<Job>, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            host,
            call_rx,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("dispatch worker shutting down");
                    return Ok(());
                }

                job = self.call_rx.recv() => {
                    let (call, reply) = match job {
                        Some(j) => j,
                        None => {
                            tracing::info!("call_tx dropped, dispatch worker exiting");
                            return Ok(());
                        }
                    };
                    let host = self.host.clone();
                    tokio::spawn(async move {
                        let response = host.handle(call).await;
                        // Caller may have given up already.
                        let _ = reply.send(response);
                    });
                }
            }
        }
    }
}

/// Sending side of the dispatch queue, cheap to clone into request handlers.
#[derive(Clone)]
pub struct DispatchHandle {
    call_tx: mpsc::Sender<Job>,
}

impl DispatchHandle {
    pub async fn call(&self, call: MethodCall) -> Result<MethodResponse, TunnelError> {
        let (tx, rx) = oneshot::channel();
        self.call_tx
            .send((call, tx))
            .await
            .map_err(|_| TunnelError::Transport("dispatch worker stopped".into()))?;
        rx.await
            .map_err(|_| TunnelError::Transport("dispatch worker dropped the call".into()))
    }
}

/// Build a dispatch queue of `depth` pending calls.
pub fn dispatcher(
    host: MethodHost,
    depth: usize,
    shutdown: broadcast::Receiver<()>,
) -> (DispatchHandle, DispatchWorker) {
    let (call_tx, call_rx) = mpsc::channel(depth.max(1));
    (DispatchHandle { call_tx }, DispatchWorker::new(host, call_rx, shutdown))
}
