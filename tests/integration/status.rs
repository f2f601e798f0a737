use crate::*;

use tether_services::{ChunkClient, MethodDiagnostic};

fn client(methods: &TestMethods, chunk: usize) -> ChunkClient {
    let transport = loopback(host(&methods.router, wide_settings()), 4096);
    ChunkClient::new(transport).with_chunk_size(chunk)
}

fn diagnostic(err: &TunnelError) -> MethodDiagnostic {
    match err {
        TunnelError::RemoteStatus { payload, .. } => serde_json::from_slice(payload).unwrap(),
        other => panic!("expected RemoteStatus, got {other:?}"),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
//  Status propagation
// ══════════════════════════════════════════════════════════════════════════════

/// Handler failure → 500 carrying the original message, even when the
/// diagnostic itself needs several fragments.
#[tokio::test]
async fn test_handler_failure_is_500_with_message() {
    let methods = test_methods();
    for chunk in [5usize, 4096] {
        let err = client(&methods, chunk)
            .call("edge", "Fail_V1", Bytes::new(), "application/json", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500), "chunk {chunk}");
        assert!(diagnostic(&err).message.contains("boiler pressure sensor offline"));
    }
}

#[tokio::test]
async fn test_shape_mismatch_is_400() {
    let methods = test_methods();
    let err = client(&methods, 16)
        .call("edge", "WriteNode_V1", Bytes::from_static(b"[1,2,3]"), "application/json", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert!(diagnostic(&err).message.contains("NodeWrite"));
}

#[tokio::test]
async fn test_typed_handler_succeeds() {
    let methods = test_methods();
    let body = serde_json::to_vec(&NodeWrite {
        node_id: "ns=2;s=Boiler.Pressure".into(),
        value: 4.5,
    })
    .unwrap();
    let result = client(&methods, 16)
        .call("edge", "writenode_v1", Bytes::from(body), "application/json", Duration::from_secs(5))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&result.payload).unwrap();
    assert_eq!(value["written"], "ns=2;s=Boiler.Pressure");
    assert_eq!(value["value"], 4.5);
    assert_eq!(result.content_type, "application/json");
}

#[tokio::test]
async fn test_unknown_method_is_400() {
    let methods = test_methods();
    let err = client(&methods, 16)
        .call("edge", "Missing_V9", Bytes::new(), "application/json", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
}

#[tokio::test]
async fn test_oversized_request_is_413() {
    let methods = test_methods();
    let settings = ChunkServerSettings {
        max_request_bytes: 1000,
        ..wide_settings()
    };
    let transport = loopback(host(&methods.router, settings), 4096);
    let client = ChunkClient::new(transport.clone()).with_chunk_size(100);

    let err = client
        .call("edge", "Echo_V1", pattern(1001), "application/octet-stream", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(413));
    // Rejected on the first envelope; nothing was buffered.
    assert_eq!(transport.round_trips(), 1);
    assert!(methods.received.take().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_hits_client_deadline() {
    let methods = test_methods();
    let err = client(&methods, 64)
        .call("edge", "Sleep_V1", Bytes::from_static(b"60000"), "application/json", Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, TunnelError::Timeout(_)), "got {err:?}");
}
