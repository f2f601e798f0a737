use crate::*;

use std::net::SocketAddr;

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;

use tether_core::tunnel::HeaderMap as TunnelHeaders;
use tether_services::{ChunkClient, HttpTunnelClient, HttpTunnelServer, ReqwestSender};

// ── Upstream ──────────────────────────────────────────────────────────────────

/// A plain HTTP service standing in for whatever lives behind the edge.
async fn upstream() -> SocketAddr {
    async fn node(Path(id): Path<String>) -> (StatusCode, [(&'static str, String); 2], String) {
        (
            StatusCode::OK,
            [
                ("content-type", "application/json".to_string()),
                ("x-node-revision", format!("rev-{}", id.len())),
            ],
            format!("{{\"node\":\"{id}\",\"value\":42}}"),
        )
    }

    async fn upload(headers: HeaderMap, body: bytes::Bytes) -> (StatusCode, [(&'static str, String); 2], bytes::Bytes) {
        let content_type = headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none")
            .to_string();
        let trace = headers
            .get("x-trace-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none")
            .to_string();
        (
            StatusCode::CREATED,
            [("content-type", content_type), ("x-trace-id", trace)],
            body,
        )
    }

    async fn missing() -> (StatusCode, &'static str) {
        (StatusCode::NOT_FOUND, "no such node")
    }

    let app = Router::new()
        .route("/nodes/{id}", get(node))
        .route("/upload", post(upload))
        .route("/gone", get(missing));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Tunnel client → chunk client → loopback (4 KiB ceiling) → chunk server →
/// tunnel server → reqwest.
fn tunnel_client() -> HttpTunnelClient {
    let methods = test_methods();
    let sender = Arc::new(ReqwestSender::new(Duration::from_secs(10)));
    Arc::new(HttpTunnelServer::new(sender)).register(&methods.router);
    let transport = loopback(host(&methods.router, wide_settings()), 4096);
    let chunks = Arc::new(ChunkClient::new(transport));
    HttpTunnelClient::new(chunks, "edge", Duration::from_secs(30))
}

/// Response headers that stay stable between two calls.
fn comparable(headers: impl IntoIterator<Item = (String, String)>) -> TunnelHeaders {
    let mut map = TunnelHeaders::new();
    for (name, value) in headers {
        if name != "date" {
            map.entry(name).or_default().push(value);
        }
    }
    map
}

fn direct_headers(resp: &reqwest::Response) -> TunnelHeaders {
    comparable(resp.headers().iter().map(|(n, v)| {
        (n.as_str().to_string(), v.to_str().unwrap_or_default().to_string())
    }))
}

fn tunnel_headers(headers: &TunnelHeaders) -> TunnelHeaders {
    comparable(
        headers
            .iter()
            .flat_map(|(n, vs)| vs.iter().map(move |v| (n.clone(), v.clone()))),
    )
}

// ══════════════════════════════════════════════════════════════════════════════
//  Tunnel transparency
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_tunneled_get_matches_direct() {
    let addr = upstream().await;
    let url = format!("http://{addr}/nodes/Boiler.Temperature");

    let direct = reqwest::get(&url).await.unwrap();
    let direct_status = direct.status().as_u16();
    let direct_hdrs = direct_headers(&direct);
    let direct_body = direct.bytes().await.unwrap();

    let tunneled = tunnel_client()
        .send("GET", &url, &[], Bytes::new(), None)
        .await
        .unwrap();

    assert_eq!(tunneled.status, direct_status);
    assert_eq!(tunnel_headers(&tunneled.headers), direct_hdrs);
    assert_eq!(tunneled.body, direct_body);
    assert_eq!(tunneled.header("x-node-revision"), Some("rev-18"));
}

#[tokio::test]
async fn test_tunneled_post_matches_direct() {
    let addr = upstream().await;
    let url = format!("http://{addr}/upload");
    // Large enough to need dozens of fragments each way.
    let body = pattern(50_000);

    let direct = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/octet-stream")
        .header("x-trace-id", "t-1")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    let direct_status = direct.status().as_u16();
    let direct_hdrs = direct_headers(&direct);
    let direct_body = direct.bytes().await.unwrap();

    let tunneled = tunnel_client()
        .send(
            "POST",
            &url,
            &[("Content-Type", "application/octet-stream"), ("X-Trace-Id", "t-1")],
            body.clone(),
            Some("boiler-1"),
        )
        .await
        .unwrap();

    assert_eq!(tunneled.status, 201);
    assert_eq!(tunneled.status, direct_status);
    assert_eq!(tunnel_headers(&tunneled.headers), direct_hdrs);
    assert_eq!(tunneled.body, direct_body);
    assert_eq!(tunneled.body, body);
}

#[tokio::test]
async fn test_upstream_error_status_passes_through() {
    let addr = upstream().await;
    let tunneled = tunnel_client()
        .send("GET", &format!("http://{addr}/gone"), &[], Bytes::new(), None)
        .await
        .unwrap();
    assert_eq!(tunneled.status, 404);
    assert_eq!(tunneled.body, Bytes::from_static(b"no such node"));
}

#[tokio::test]
async fn test_unreachable_upstream_is_502() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let tunneled = tunnel_client()
        .send("GET", &format!("http://{addr}/nodes/x"), &[], Bytes::new(), None)
        .await
        .unwrap();
    assert_eq!(tunneled.status, 502);
    assert!(!tunneled.body.is_empty());
}
