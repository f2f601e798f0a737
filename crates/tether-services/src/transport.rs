//! The invoke primitive: a size-bounded, stateless request/reply call.
//!
//! Everything above this trait (chunking, tunnelling) is transport
//! agnostic. Implementations: [`crate::LoopbackClient`] for in-process
//! use and [`crate::HttpMethodClient`] against a `tether-api` endpoint.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::time::Instant;

use tether_core::TunnelError;

/// One physical method call against a remote target.
pub trait MethodClient: Send + Sync {
    /// Hard ceiling of a single request or response payload.
    fn max_payload_size(&self) -> usize;

    /// Invoke `method` on `target`. A non-success method status must be
    /// reported as [`TunnelError::RemoteStatus`].
    fn call<'a>(
        &'a self,
        target: &'a str,
        method: &'a str,
        payload: Bytes,
        content_type: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Bytes, TunnelError>>;
}

/// Result of a method invocation as produced by the hosting side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponse {
    pub status: u16,
    pub payload: Bytes,
    pub content_type: String,
}

/// Fallback horizon for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating at a far-future instant instead of
/// overflowing.
pub(crate) fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Whole milliseconds of `timeout`, saturating at `u64::MAX`.
pub(crate) fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
