pub mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// Full router, `/api` prefix included.
pub fn app(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.max_payload_bytes;
    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route(
            "/targets/{target}/methods/{method}",
            post(handlers::handle_invoke).layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    serve_on(listener, state).await
}

/// Serve on an already bound listener, e.g. an ephemeral test port.
pub async fn serve_on(listener: TcpListener, state: ApiState) -> anyhow::Result<()> {
    axum::serve(listener, app(state)).await?;
    Ok(())
}
