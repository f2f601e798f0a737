//! Whole HTTP exchanges carried as chunked method calls.
//!
//! Client side: [`HttpTunnelClient`] frames a request and sends it through a
//! [`ChunkClient`] under the `HttpTunnel` method. Server side:
//! [`HttpTunnelServer`] is registered on a [`MethodRouter`], replays the
//! request against a real HTTP client and frames the response back.
//! A failed real call is still a successful tunnel call; its outcome
//! travels in the tunnel response status.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use tether_core::tunnel::{split_headers, HeaderMap, TUNNEL_CONTENT_TYPE, TUNNEL_METHOD};
use tether_core::{status, HttpTunnelRequest, HttpTunnelResponse, ProtocolViolation, TunnelError};

use crate::chunk_client::ChunkClient;
use crate::router::{MethodError, MethodOutput, MethodRouter, Registration};

/// Connection-scoped headers, never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "transfer-encoding", "upgrade"];

/// Recomputed by the real HTTP client for the far side.
const REQUEST_ONLY: &[&str] = &["host", "content-length"];

// ── Real HTTP client seam ────────────────────────────────────────────────────

/// Outcome of a real HTTP call.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpSendError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Failed(String),
}

/// Issues real HTTP requests on the serving side of the tunnel.
pub trait HttpSender: Send + Sync {
    fn send<'a>(
        &'a self,
        method: &'a str,
        uri: &'a str,
        headers: Vec<(String, String)>,
        body: Bytes,
    ) -> BoxFuture<'a, Result<HttpReply, HttpSendError>>;
}

pub struct ReqwestSender {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl HttpSender for ReqwestSender {
    fn send<'a>(
        &'a self,
        method: &'a str,
        uri: &'a str,
        headers: Vec<(String, String)>,
        body: Bytes,
    ) -> BoxFuture<'a, Result<HttpReply, HttpSendError>> {
        Box::pin(async move {
            let method = reqwest::Method::from_bytes(method.as_bytes())
                .map_err(|e| HttpSendError::InvalidRequest(e.to_string()))?;

            let mut request = self.client.request(method, uri).timeout(self.timeout);
            for (name, value) in headers {
                request = request.header(name, value);
            }

            let resp = request.body(body).send().await.map_err(map_reqwest)?;
            let status = resp.status().as_u16();
            let headers = reply_headers(resp.headers());
            let body = resp.bytes().await.map_err(map_reqwest)?;

            Ok(HttpReply {
                status,
                headers,
                body,
            })
        })
    }
}

/// Response headers as text. Values outside visible ASCII are kept,
/// decoded as UTF-8 with invalid sequences replaced.
fn reply_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let text = match value.to_str() {
                Ok(v) => v.to_string(),
                Err(_) => {
                    let lossy = String::from_utf8_lossy(value.as_bytes()).into_owned();
                    tracing::debug!(header = %name, value = %lossy, "non-ascii response header");
                    lossy
                }
            };
            (name.as_str().to_string(), text)
        })
        .collect()
}

fn map_reqwest(e: reqwest::Error) -> HttpSendError {
    if e.is_timeout() {
        HttpSendError::Timeout
    } else if e.is_builder() {
        HttpSendError::InvalidRequest(e.to_string())
    } else {
        HttpSendError::Failed(e.to_string())
    }
}

// ── Server ───────────────────────────────────────────────────────────────────

pub struct HttpTunnelServer {
    sender: Arc<dyn HttpSender>,
}

impl HttpTunnelServer {
    pub fn new(sender: Arc<dyn HttpSender>) -> Self {
        Self { sender }
    }

    /// Register under the tunnel method name.
    pub fn register(self: Arc<Self>, router: &MethodRouter) -> Registration {
        router.register(TUNNEL_METHOD, &[], move |payload: Bytes, _content_type: String| {
            let server = self.clone();
            async move {
                let request = HttpTunnelRequest::decode(payload)
                    .map_err(|e| MethodError::InvalidArgument(e.to_string()))?;
                let response = server.execute(request).await;
                let payload = response
                    .encode()
                    .map_err(|e| MethodError::Failed(anyhow::Error::new(e)))?;
                Ok(MethodOutput {
                    payload,
                    content_type: TUNNEL_CONTENT_TYPE.to_string(),
                })
            }
        })
    }

    /// Replay `request` against the real HTTP client.
    pub async fn execute(&self, request: HttpTunnelRequest) -> HttpTunnelResponse {
        let headers: Vec<(String, String)> = request
            .all_headers()
            .filter(|(name, _)| !is_hop_by_hop(name) && !REQUEST_ONLY.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        tracing::debug!(
            request_id = %request.request_id,
            method = %request.method,
            uri = %request.uri,
            resource = request.resource_id.as_deref().unwrap_or(""),
            bytes = request.body.len(),
            "executing tunneled request"
        );

        match self
            .sender
            .send(&request.method, &request.uri, headers, request.body)
            .await
        {
            Ok(reply) => {
                let mut headers = HeaderMap::new();
                for (name, value) in reply.headers {
                    let name = name.to_ascii_lowercase();
                    if !is_hop_by_hop(&name) {
                        headers.entry(name).or_default().push(value);
                    }
                }
                HttpTunnelResponse {
                    request_id: request.request_id,
                    status: reply.status,
                    headers,
                    body: reply.body,
                }
            }
            Err(e) => {
                let status = match e {
                    HttpSendError::Timeout => status::GATEWAY_TIMEOUT,
                    HttpSendError::InvalidRequest(_) | HttpSendError::Failed(_) => status::BAD_GATEWAY,
                };
                tracing::warn!(
                    request_id = %request.request_id,
                    uri = %request.uri,
                    status,
                    error = %e,
                    "tunneled request failed"
                );
                HttpTunnelResponse {
                    request_id: request.request_id,
                    status,
                    headers: HeaderMap::new(),
                    body: Bytes::from(e.to_string()),
                }
            }
        }
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct HttpTunnelClient {
    chunks: Arc<ChunkClient>,
    target: String,
    timeout: Duration,
}

impl HttpTunnelClient {
    pub fn new(chunks: Arc<ChunkClient>, target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            chunks,
            target: target.into(),
            timeout,
        }
    }

    /// Send one HTTP request through the tunnel. The returned status is
    /// the real server's, or 502/504 when the far side could not reach it.
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Bytes,
        resource_id: Option<&str>,
    ) -> Result<HttpTunnelResponse, TunnelError> {
        let (request_headers, content_headers) = split_headers(headers.iter().copied());
        let request = HttpTunnelRequest {
            request_id: hex::encode(rand::random::<[u8; 8]>()),
            method: method.to_ascii_uppercase(),
            uri: uri.to_string(),
            resource_id: resource_id.map(str::to_string),
            request_headers,
            content_headers,
            body,
        };

        let frame = request.encode()?;
        let result = self
            .chunks
            .call(&self.target, TUNNEL_METHOD, frame, TUNNEL_CONTENT_TYPE, self.timeout)
            .await?;
        let response = HttpTunnelResponse::decode(result.payload)?;

        if response.request_id != request.request_id {
            return Err(ProtocolViolation::UnexpectedKind("tunnel response for another request").into());
        }
        Ok(response)
    }
}
