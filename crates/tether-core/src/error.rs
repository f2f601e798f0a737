//! Error taxonomy for chunked calls.

use std::time::Duration;

use bytes::Bytes;

/// A malformed envelope sequence. On the server this aborts only the
/// handle it was detected on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("envelope names a method and a handle at the same time")]
    UnexpectedHandle,
    #[error("envelope carries neither a method nor a handle")]
    MissingMethodOrHandle,
    #[error("first envelope of a direction is missing its content length")]
    MissingContentLength,
    #[error("field `{0}` is not allowed on this kind of envelope")]
    UnexpectedField(&'static str),
    #[error("response envelope carries no handle, status or payload")]
    EmptyResponse,
    #[error("fragment of {got} bytes exceeds the negotiated {limit} bytes")]
    ChunkTooLarge { got: usize, limit: usize },
    #[error("received {received} bytes but {declared} were declared")]
    LengthOverflow { declared: u64, received: u64 },
    #[error("stream ended after {received} of {declared} declared bytes")]
    LengthUnderflow { declared: u64, received: u64 },
    #[error("unexpected {0} envelope")]
    UnexpectedKind(&'static str),
}

/// Failure of a chunked call as seen by the caller.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// The underlying invoke primitive failed. Not retried here.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The caller's overall deadline elapsed.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote side answered with a non-success status.
    #[error("remote returned status {status}: {}", String::from_utf8_lossy(payload))]
    RemoteStatus { status: u16, payload: Bytes },

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid tunnel frame: {0}")]
    Frame(#[from] crate::tunnel::FrameError),
}

impl TunnelError {
    /// Remote status, if the failure came from the remote side.
    pub fn status(&self) -> Option<u16> {
        match self {
            TunnelError::RemoteStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
