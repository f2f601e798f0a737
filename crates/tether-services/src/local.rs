//! In-process transport. Same contract as a network transport, including
//! the payload ceiling, so chunking behaves identically in tests and in
//! single-process deployments.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use tether_core::{status, TunnelError};

use crate::host::{MethodCall, MethodHost};
use crate::transport::MethodClient;

pub struct LoopbackClient {
    host: MethodHost,
    max_payload: usize,
    round_trips: AtomicUsize,
}

impl LoopbackClient {
    pub fn new(host: MethodHost, max_payload: usize) -> Self {
        Self {
            host,
            max_payload,
            round_trips: AtomicUsize::new(0),
        }
    }

    pub fn host(&self) -> &MethodHost {
        &self.host
    }

    /// Physical calls made so far.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::Relaxed)
    }
}

impl MethodClient for LoopbackClient {
    fn max_payload_size(&self) -> usize {
        self.max_payload
    }

    fn call<'a>(
        &'a self,
        _target: &'a str,
        method: &'a str,
        payload: Bytes,
        content_type: &'a str,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<Bytes, TunnelError>> {
        Box::pin(async move {
            self.round_trips.fetch_add(1, Ordering::Relaxed);
            if payload.len() > self.max_payload {
                return Err(TunnelError::Transport(format!(
                    "request of {} bytes exceeds transport limit of {}",
                    payload.len(),
                    self.max_payload
                )));
            }

            let response = self
                .host
                .handle(MethodCall {
                    method: method.to_string(),
                    payload,
                    content_type: content_type.to_string(),
                })
                .await;

            if response.payload.len() > self.max_payload {
                return Err(TunnelError::Transport(format!(
                    "response of {} bytes exceeds transport limit of {}",
                    response.payload.len(),
                    self.max_payload
                )));
            }
            if !status::is_success(response.status) {
                return Err(TunnelError::RemoteStatus {
                    status: response.status,
                    payload: response.payload,
                });
            }
            Ok(response.payload)
        })
    }
}
