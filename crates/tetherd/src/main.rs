//! tetherd — method host for chunked calls and the HTTP tunnel.

use std::sync::Arc;

use anyhow::Result;

use tether_core::config::TetherConfig;
use tether_services::{
    dispatcher, ChunkServer, ChunkServerSettings, HttpTunnelServer, MethodHost, MethodRouter,
    ReqwestSender,
};

mod methods;
mod sweep;

use sweep::SweepWorker;

/// Pending calls queued between the API and the dispatch worker.
const DISPATCH_DEPTH: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = TetherConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = TetherConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TetherConfig::default()
    });

    let target_id = config.identity.target_id.clone();
    tracing::info!(target = %target_id, "tetherd starting");

    // ── Methods ──────────────────────────────────────────────────────────────

    let router = MethodRouter::new();
    methods::register_builtin(&router, &target_id);

    if config.tunnel.enabled {
        let sender = Arc::new(ReqwestSender::new(config.tunnel.request_timeout()));
        Arc::new(HttpTunnelServer::new(sender)).register(&router);
    }

    let settings = ChunkServerSettings::from(&config.chunking);
    let chunks = Arc::new(ChunkServer::new(Arc::new(router.clone()), settings));
    let host = MethodHost::new(
        router.clone(),
        chunks.clone(),
        config.methods.max_direct_payload_bytes,
    );

    tracing::info!(
        methods = ?router.methods(),
        max_payload_bytes = config.chunking.max_payload_bytes,
        fragment_size = chunks.settings().max_fragment_size,
        tunnel = config.tunnel.enabled,
        "methods registered"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let (dispatch, dispatch_worker) = dispatcher(host, DISPATCH_DEPTH, shutdown_tx.subscribe());
    let dispatch_task = tokio::spawn(dispatch_worker.run());

    let sweep_task = tokio::spawn(
        SweepWorker::new(
            chunks.clone(),
            config.chunking.sweep_interval(),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let api_task = {
        let state = tether_api::ApiState {
            target_id,
            dispatch,
            router,
            chunks: chunks.clone(),
            max_payload_bytes: config.chunking.max_payload_bytes,
        };
        let port = config.network.api_port;
        tokio::spawn(async move {
            if let Err(e) = tether_api::serve(state, port).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = dispatch_task       => tracing::error!("dispatch worker exited: {:?}", r),
        r = sweep_task          => tracing::error!("sweep worker exited: {:?}", r),
        r = api_task            => tracing::error!("API server exited: {:?}", r),
    }

    let dropped = chunks.in_flight();
    chunks.shutdown();
    tracing::info!(dropped, "in-flight calls dropped");

    Ok(())
}
