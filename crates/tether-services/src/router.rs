//! Resolves a method name to a registered handler.
//!
//! Names may carry a version suffix (`"Echo_V1"`) and are matched
//! case-insensitively. The router never looks inside business payloads:
//! it only checks that a payload has the shape a typed handler expects,
//! and turns every handler failure into a status plus a JSON diagnostic.

use std::any::type_name;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tether_core::envelope::DEFAULT_CONTENT_TYPE;
use tether_core::status;

use crate::transport::MethodResponse;

/// What a handler produces on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodOutput {
    pub payload: Bytes,
    pub content_type: String,
}

impl MethodOutput {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, MethodError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| MethodError::Failed(anyhow::anyhow!("failed to serialize result: {e}")))?;
        Ok(Self {
            payload: Bytes::from(payload),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        })
    }
}

/// Handler failure. Mapped to a status code, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum MethodError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl MethodError {
    pub fn status(&self) -> u16 {
        match self {
            MethodError::InvalidArgument(_) => status::BAD_REQUEST,
            MethodError::PayloadTooLarge(_) => status::PAYLOAD_TOO_LARGE,
            MethodError::Failed(_) => status::INTERNAL_ERROR,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            MethodError::Failed(e) => {
                let causes: Vec<String> = e.chain().skip(1).map(|c| c.to_string()).collect();
                if causes.is_empty() {
                    None
                } else {
                    Some(serde_json::json!({ "causes": causes }))
                }
            }
            _ => None,
        }
    }
}

/// JSON body returned with every non-success status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDiagnostic {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl MethodDiagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        // A struct of a String and a Value always serializes.
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    /// A complete error response carrying this diagnostic.
    pub fn into_response(self, status: u16) -> MethodResponse {
        MethodResponse {
            status,
            payload: self.to_bytes(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

impl From<&MethodError> for MethodDiagnostic {
    fn from(err: &MethodError) -> Self {
        Self {
            message: err.to_string(),
            details: err.details(),
        }
    }
}

type HandlerFn =
    dyn Fn(Bytes, String) -> BoxFuture<'static, Result<MethodOutput, MethodError>> + Send + Sync;

struct Entry {
    /// Name as registered, for listing.
    name: String,
    registration: u64,
    handler: Arc<HandlerFn>,
}

/// Registry of method handlers. Cheap to clone; clones share the table.
#[derive(Clone, Default)]
pub struct MethodRouter {
    handlers: Arc<DashMap<String, Entry>>,
    next_registration: Arc<AtomicU64>,
}

/// Returned by every `register*` call. Dropping it keeps the handler
/// registered; call [`Registration::unregister`] to remove it.
pub struct Registration {
    handlers: Arc<DashMap<String, Entry>>,
    id: u64,
    keys: Vec<String>,
}

impl Registration {
    /// Names this registration added, lowercased.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Remove the handlers this registration added. Names re-registered
    /// by someone else since are left alone.
    pub fn unregister(self) {
        for key in &self.keys {
            self.handlers.remove_if(key, |_, e| e.registration == self.id);
        }
    }
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw handler under `name` plus each version suffix.
    /// With no versions the bare name is used.
    pub fn register<F, Fut>(&self, name: &str, versions: &[&str], f: F) -> Registration
    where
        F: Fn(Bytes, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MethodOutput, MethodError>> + Send + 'static,
    {
        let handler: Arc<HandlerFn> =
            Arc::new(move |payload: Bytes, content_type: String| f(payload, content_type).boxed());
        let id = self.next_registration.fetch_add(1, Ordering::Relaxed);

        let names: Vec<String> = if versions.is_empty() {
            vec![name.to_string()]
        } else {
            versions.iter().map(|v| format!("{name}{v}")).collect()
        };

        let mut keys = Vec::with_capacity(names.len());
        for full_name in names {
            let key = full_name.to_ascii_lowercase();
            let previous = self.handlers.insert(
                key.clone(),
                Entry {
                    name: full_name.clone(),
                    registration: id,
                    handler: handler.clone(),
                },
            );
            if previous.is_some() {
                tracing::warn!(method = %full_name, "method handler replaced");
            } else {
                tracing::debug!(method = %full_name, "method registered");
            }
            keys.push(key);
        }

        Registration {
            handlers: self.handlers.clone(),
            id,
            keys,
        }
    }

    /// Register a handler taking and returning JSON values. An empty
    /// payload deserializes as `null`, so `()` and `Option<T>` arguments
    /// accept calls without parameters.
    pub fn register_json<Req, Resp, F, Fut>(
        &self,
        name: &str,
        versions: &[&str],
        handler: F,
    ) -> Registration
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, MethodError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(name, versions, move |payload: Bytes, _content_type: String| {
            let handler = handler.clone();
            async move {
                let raw: &[u8] = if payload.is_empty() { b"null" } else { &payload[..] };
                let request: Req = serde_json::from_slice(raw).map_err(|e| {
                    MethodError::InvalidArgument(format!(
                        "payload does not match {}: {e}",
                        type_name::<Req>()
                    ))
                })?;
                let response = handler(request).await?;
                MethodOutput::json(&response)
            }
        })
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.name.clone()).collect();
        names.sort();
        names
    }

    pub fn contains(&self, method_name: &str) -> bool {
        self.handlers.contains_key(&method_name.to_ascii_lowercase())
    }

    /// Invoke a fully reassembled call.
    pub async fn invoke(&self, method_name: &str, payload: Bytes, content_type: &str) -> MethodResponse {
        let handler = match self.handlers.get(&method_name.to_ascii_lowercase()) {
            Some(entry) => entry.handler.clone(),
            None => {
                tracing::warn!(method = method_name, "call to unknown method");
                return MethodDiagnostic::new(format!("unknown method '{method_name}'"))
                    .into_response(status::BAD_REQUEST);
            }
        };

        let outcome = AssertUnwindSafe(handler(payload, content_type.to_string()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => MethodResponse {
                status: status::OK,
                payload: output.payload,
                content_type: output.content_type,
            },
            Ok(Err(err)) => {
                let status = err.status();
                tracing::warn!(method = method_name, status, error = %err, "method failed");
                MethodDiagnostic::from(&err).into_response(status)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                tracing::error!(method = method_name, panic = %message, "method handler panicked");
                MethodDiagnostic::new(message).into_response(status::INTERNAL_ERROR)
            }
        }
    }
}
