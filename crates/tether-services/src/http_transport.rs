//! Invoke primitive over HTTP, against the `tether-api` method endpoint:
//!
//! ```text
//! POST {base}/targets/{target}/methods/{method}
//! content-type: <payload content type>
//! x-method-timeout-ms: <timeout>
//! ```
//!
//! The response body is the method payload, the HTTP status is the method
//! status.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use tether_core::TunnelError;

use crate::transport::{timeout_millis, MethodClient};

pub const TIMEOUT_HEADER: &str = "x-method-timeout-ms";

pub struct HttpMethodClient {
    client: reqwest::Client,
    base_url: String,
    max_payload: usize,
}

impl HttpMethodClient {
    /// `base_url` is the API root, e.g. `http://127.0.0.1:9101/api`.
    pub fn new(base_url: impl Into<String>, max_payload: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_payload,
        }
    }

    fn method_url(&self, target: &str, method: &str) -> String {
        format!("{}/targets/{}/methods/{}", self.base_url, target, method)
    }
}

impl MethodClient for HttpMethodClient {
    fn max_payload_size(&self) -> usize {
        self.max_payload
    }

    fn call<'a>(
        &'a self,
        target: &'a str,
        method: &'a str,
        payload: Bytes,
        content_type: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Bytes, TunnelError>> {
        Box::pin(async move {
            let resp = self
                .client
                .post(self.method_url(target, method))
                .header("content-type", content_type)
                .header(TIMEOUT_HEADER, timeout_millis(timeout).to_string())
                .timeout(timeout)
                .body(payload)
                .send()
                .await
                .map_err(|e| map_reqwest(e, timeout))?;

            let status = resp.status();
            // The endpoint stopped waiting on the method at our deadline.
            if status == reqwest::StatusCode::REQUEST_TIMEOUT {
                return Err(TunnelError::Timeout(timeout));
            }
            let body = resp.bytes().await.map_err(|e| map_reqwest(e, timeout))?;
            if !status.is_success() {
                return Err(TunnelError::RemoteStatus {
                    status: status.as_u16(),
                    payload: body,
                });
            }
            Ok(body)
        })
    }
}

fn map_reqwest(e: reqwest::Error, timeout: Duration) -> TunnelError {
    if e.is_timeout() {
        TunnelError::Timeout(timeout)
    } else {
        TunnelError::Transport(e.to_string())
    }
}
