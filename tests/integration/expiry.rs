use crate::*;

use std::sync::atomic::AtomicUsize;

use tether_core::envelope::{RequestChunk, ResponseChunk};
use tether_services::ChunkClient;

fn short_lived() -> ChunkServerSettings {
    ChunkServerSettings {
        max_fragment_size: 1024,
        max_envelope_bytes: 64 * 1024,
        max_request_bytes: 1024 * 1024,
        default_timeout: Duration::from_secs(2),
        max_timeout: Duration::from_secs(2),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
//  Handle expiry
// ══════════════════════════════════════════════════════════════════════════════

/// A half-uploaded call whose client disappears is reclaimed, and a late
/// continuation is answered with 404 rather than hanging.
#[tokio::test(start_paused = true)]
async fn test_abandoned_handle_expires() {
    let methods = test_methods();
    let host = host(&methods.router, short_lived());
    let server = host.chunks().clone();

    let handle = match ResponseChunk::try_from(
        server
            .process(
                RequestChunk::First {
                    method_name: "Echo_V1".into(),
                    content_type: "application/octet-stream".into(),
                    content_length: 10,
                    timeout: Some(Duration::from_secs(30)),
                    max_chunk_length: None,
                    payload: Bytes::from_static(b"01234"),
                }
                .into(),
            )
            .await,
    )
    .unwrap()
    {
        ResponseChunk::Accepted { handle } => handle,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(server.in_flight(), 1);

    // Client timeout of 30s is clamped to the server's 2s.
    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(server.sweep(), 1);
    assert_eq!(server.in_flight(), 0);

    let late = server
        .process(
            RequestChunk::Continuation {
                handle,
                payload: Bytes::from_static(b"56789"),
            }
            .into(),
        )
        .await;
    match ResponseChunk::try_from(late).unwrap() {
        ResponseChunk::First { status, handle, .. } => {
            assert_eq!(status, 404);
            assert_eq!(handle, None);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(methods.received.take().is_empty(), "handler must never run");
}

/// Expiry is also checked lazily when any other envelope arrives.
#[tokio::test(start_paused = true)]
async fn test_expiry_checked_on_traffic() {
    let methods = test_methods();
    let server = host(&methods.router, short_lived()).chunks().clone();

    server
        .process(
            RequestChunk::First {
                method_name: "Echo_V1".into(),
                content_type: "text/plain".into(),
                content_length: 100,
                timeout: None,
                max_chunk_length: None,
                payload: Bytes::from_static(b"partial"),
            }
            .into(),
        )
        .await;
    assert_eq!(server.in_flight(), 1);

    tokio::time::advance(Duration::from_secs(5)).await;

    // Unrelated, complete call.
    server
        .process(
            RequestChunk::First {
                method_name: "Echo_V1".into(),
                content_type: "text/plain".into(),
                content_length: 2,
                timeout: None,
                max_chunk_length: None,
                payload: Bytes::from_static(b"ok"),
            }
            .into(),
        )
        .await;
    assert_eq!(server.in_flight(), 0);
}

/// A client too slow for the server's handle lifetime sees 404 through the
/// normal error channel.
#[tokio::test(start_paused = true)]
async fn test_slow_client_sees_handle_not_found() {
    let methods = test_methods();
    let inner = loopback(host(&methods.router, short_lived()), 4096);
    let transport = Arc::new(Sluggish {
        inner,
        delay: Duration::from_secs(3),
        calls: AtomicUsize::new(0),
    });
    let client = ChunkClient::new(transport).with_chunk_size(8);

    let err = client
        .call("edge", "Echo_V1", pattern(20), "application/octet-stream", Duration::from_secs(60))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
}

/// The caller's deadline covers the whole exchange, not one round trip.
#[tokio::test(start_paused = true)]
async fn test_client_deadline_spans_round_trips() {
    let methods = test_methods();
    let inner = loopback(host(&methods.router, wide_settings()), 4096);
    let transport = Arc::new(Sluggish {
        inner: inner.clone(),
        delay: Duration::from_millis(400),
        calls: AtomicUsize::new(0),
    });
    let client = ChunkClient::new(transport).with_chunk_size(4);

    // 10 round trips at 400ms each cannot fit in 2s.
    let err = client
        .call("edge", "Echo_V1", pattern(40), "application/octet-stream", Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, TunnelError::Timeout(_)), "got {err:?}");
    assert!(inner.round_trips() < 10);
}
