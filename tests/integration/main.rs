//! Tether integration test harness.
//!
//! Everything runs in-process: method hosts behind loopback transports
//! with a real payload ceiling, and real HTTP servers on ephemeral
//! 127.0.0.1 ports for the API and tunnel tests.
//!
//!   cargo test --test integration

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use tether_core::TunnelError;
use tether_services::{
    ChunkServer, ChunkServerSettings, LoopbackClient, MethodClient, MethodError, MethodHost,
    MethodOutput, MethodRouter,
};

mod expiry;
mod isolation;
mod status;
mod tunnel;

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Every request payload a [`TestMethods`] handler received, in order.
#[derive(Clone, Default)]
pub struct Received(Arc<Mutex<Vec<(String, Bytes)>>>);

impl Received {
    pub fn take(&self) -> Vec<(String, Bytes)> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    fn push(&self, method: &str, payload: &Bytes) {
        self.0.lock().unwrap().push((method.to_string(), payload.clone()));
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeWrite {
    pub node_id: String,
    pub value: f64,
}

pub struct TestMethods {
    pub router: MethodRouter,
    pub received: Received,
}

/// Router with the handlers the tests call:
///
/// - `Echo_V1`: payload returned unchanged
/// - `Reverse_V1`: payload returned byte-reversed
/// - `Fail_V1`: always fails with a known message
/// - `WriteNode_V1`: typed JSON handler taking [`NodeWrite`]
/// - `Sleep_V1`: waits as many milliseconds as the payload says
pub fn test_methods() -> TestMethods {
    let router = MethodRouter::new();
    let received = Received::default();

    let rx = received.clone();
    router.register("Echo", &["_V1"], move |payload: Bytes, content_type: String| {
        rx.push("Echo", &payload);
        async move {
            Ok(MethodOutput {
                payload,
                content_type,
            })
        }
    });

    let rx = received.clone();
    router.register("Reverse", &["_V1"], move |payload: Bytes, content_type: String| {
        rx.push("Reverse", &payload);
        let mut reversed = payload.to_vec();
        reversed.reverse();
        async move {
            Ok(MethodOutput {
                payload: Bytes::from(reversed),
                content_type,
            })
        }
    });

    router.register("Fail", &["_V1"], |_: Bytes, _: String| async move {
        Err(MethodError::Failed(anyhow::anyhow!("boiler pressure sensor offline")))
    });

    router.register_json("WriteNode", &["_V1"], |write: NodeWrite| async move {
        Ok(serde_json::json!({ "written": write.node_id, "value": write.value }))
    });

    router.register_json("Sleep", &["_V1"], |millis: u64| async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(millis)
    });

    TestMethods { router, received }
}

/// Server limits wide enough for the largest fragment the tests use.
pub fn wide_settings() -> ChunkServerSettings {
    ChunkServerSettings {
        max_fragment_size: 1024 * 1024,
        max_envelope_bytes: 4 * 1024 * 1024,
        max_request_bytes: 16 * 1024 * 1024,
        default_timeout: Duration::from_secs(60),
        max_timeout: Duration::from_secs(600),
    }
}

pub fn host(router: &MethodRouter, settings: ChunkServerSettings) -> MethodHost {
    let chunks = Arc::new(ChunkServer::new(Arc::new(router.clone()), settings));
    MethodHost::new(router.clone(), chunks, 96 * 1024)
}

pub fn loopback(host: MethodHost, ceiling: usize) -> Arc<LoopbackClient> {
    Arc::new(LoopbackClient::new(host, ceiling))
}

/// Deterministic, non-repeating-looking test bytes.
pub fn pattern(len: usize) -> Bytes {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8)
        .collect::<Vec<u8>>()
        .into()
}

// ── Transport wrappers ────────────────────────────────────────────────────────

/// Yields to the scheduler before every round trip so concurrent calls
/// interleave envelope by envelope.
pub struct Interleaving<T>(pub Arc<T>);

impl<T: MethodClient> MethodClient for Interleaving<T> {
    fn max_payload_size(&self) -> usize {
        self.0.max_payload_size()
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
            tokio::task::yield_now().await;
            self.0.call(target, method, payload, content_type, timeout).await
        })
    }
}

/// Sleeps before every round trip after the first.
pub struct Sluggish<T> {
    pub inner: Arc<T>,
    pub delay: Duration,
    pub calls: std::sync::atomic::AtomicUsize,
}

impl<T: MethodClient> MethodClient for Sluggish<T> {
    fn max_payload_size(&self) -> usize {
        self.inner.max_payload_size()
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
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0 {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.call(target, method, payload, content_type, timeout).await
        })
    }
}
