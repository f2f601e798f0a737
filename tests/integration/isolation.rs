use crate::*;

use tether_core::envelope::{ChunkEnvelope, RequestChunk, ResponseChunk};
use tether_services::ChunkClient;

// ══════════════════════════════════════════════════════════════════════════════
//  Handle isolation
// ══════════════════════════════════════════════════════════════════════════════

/// Two calls to different methods sharing one server, interleaved round
/// trip by round trip.
#[tokio::test]
async fn test_concurrent_calls_do_not_mix() {
    let methods = test_methods();
    let inner = loopback(host(&methods.router, wide_settings()), 4096);
    let transport = Arc::new(Interleaving(inner.clone()));
    let client = ChunkClient::new(transport).with_chunk_size(37);

    let a: Bytes = vec![b'a'; 5_000].into();
    let b = pattern(7_001);

    let (ra, rb) = tokio::join!(
        client.call("edge", "Echo_V1", a.clone(), "text/plain", Duration::from_secs(30)),
        client.call("edge", "Reverse_V1", b.clone(), "application/octet-stream", Duration::from_secs(30)),
    );

    let ra = ra.unwrap();
    let rb = rb.unwrap();
    assert_eq!(ra.payload, a);
    assert_eq!(ra.content_type, "text/plain");
    let mut expected = b.to_vec();
    expected.reverse();
    assert!(rb.payload == expected);
    assert_eq!(rb.content_type, "application/octet-stream");

    let mut received = methods.received.take();
    received.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(received[0], ("Echo".to_string(), a));
    assert_eq!(received[1], ("Reverse".to_string(), b));
    assert_eq!(inner.host().chunks().in_flight(), 0);
}

#[tokio::test]
async fn test_many_concurrent_calls() {
    let methods = test_methods();
    let inner = loopback(host(&methods.router, wide_settings()), 2048);
    let client = Arc::new(ChunkClient::new(Arc::new(Interleaving(inner.clone()))).with_chunk_size(64));

    let calls = (0..16u8).map(|n| {
        let client = client.clone();
        async move {
            let sent: Bytes = vec![n; 500 + n as usize * 37].into();
            let result = client
                .call("edge", "Echo_V1", sent.clone(), "application/octet-stream", Duration::from_secs(30))
                .await
                .unwrap();
            assert_eq!(result.payload, sent, "call {n}");
        }
    });
    futures::future::join_all(calls).await;
    assert_eq!(inner.host().chunks().in_flight(), 0);
}

fn first(method: &str, total: u64, payload: &'static [u8]) -> ChunkEnvelope {
    RequestChunk::First {
        method_name: method.into(),
        content_type: "application/octet-stream".into(),
        content_length: total,
        timeout: None,
        max_chunk_length: Some(4),
        payload: Bytes::from_static(payload),
    }
    .into()
}

fn cont(handle: &str, payload: &'static [u8]) -> ChunkEnvelope {
    RequestChunk::Continuation {
        handle: handle.into(),
        payload: Bytes::from_static(payload),
    }
    .into()
}

fn reply(envelope: ChunkEnvelope) -> ResponseChunk {
    ResponseChunk::try_from(envelope).unwrap()
}

/// A protocol violation on one handle leaves a neighbour untouched.
#[tokio::test]
async fn test_violation_aborts_only_its_handle() {
    let methods = test_methods();
    let server = host(&methods.router, wide_settings()).chunks().clone();

    let ha = match reply(server.process(first("Echo_V1", 8, b"aaaa")).await) {
        ResponseChunk::Accepted { handle } => handle,
        other => panic!("unexpected {other:?}"),
    };
    let hb = match reply(server.process(first("Echo_V1", 8, b"bbbb")).await) {
        ResponseChunk::Accepted { handle } => handle,
        other => panic!("unexpected {other:?}"),
    };
    assert_ne!(ha, hb);

    // Overflow on A: 4 declared bytes remain, 6 sent.
    match reply(server.process(cont(&ha, b"AAAAAA")).await) {
        ResponseChunk::First { status, .. } => assert_eq!(status, 400),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(server.in_flight(), 1);

    match reply(server.process(cont(&hb, b"BBBB")).await) {
        ResponseChunk::First {
            status,
            content_length,
            payload,
            handle,
            ..
        } => {
            assert_eq!(status, 200);
            assert_eq!(content_length, 8);
            assert_eq!(payload, Bytes::from_static(b"bbbb"));
            let handle = handle.expect("more response bytes pending");
            match reply(server.process(cont(&handle, b"")).await) {
                ResponseChunk::Continuation { handle, payload } => {
                    assert_eq!(handle, None);
                    assert_eq!(payload, Bytes::from_static(b"BBBB"));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        other => panic!("unexpected {other:?}"),
    }

    // A is gone for good.
    match reply(server.process(cont(&ha, b"")).await) {
        ResponseChunk::First { status, .. } => assert_eq!(status, 404),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(server.in_flight(), 0);
}
