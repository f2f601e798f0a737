//! Reclaims chunk handles whose deadline has passed.
//!
//! The chunk server also expires lazily on every envelope; this covers the
//! case where no traffic arrives after a caller gives up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use tether_services::ChunkServer;

pub struct SweepWorker {
    chunks: Arc<ChunkServer>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl SweepWorker {
    pub fn new(chunks: Arc<ChunkServer>, interval: Duration, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            chunks,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    let dropped = self.chunks.in_flight();
                    self.chunks.shutdown();
                    tracing::info!(dropped, "sweep worker shutting down");
                    return Ok(());
                }

                _ = interval.tick() => {
                    let expired = self.chunks.sweep();
                    if expired > 0 {
                        tracing::info!(expired, in_flight = self.chunks.in_flight(), "expired chunk handles");
                    }
                }
            }
        }
    }
}
