//! /targets/{target}/methods/{method}: one physical method call.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use bytes::Bytes;

use tether_core::envelope::DEFAULT_CONTENT_TYPE;
use tether_core::status;
use tether_services::{MethodCall, MethodDiagnostic};

use super::ApiState;

const TIMEOUT_HEADER: &str = "x-method-timeout-ms";

type MethodReply = (StatusCode, [(header::HeaderName, String); 1], Bytes);

pub async fn handle_invoke(
    State(state): State<ApiState>,
    Path((target, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<MethodReply, (StatusCode, String)> {
    if target != state.target_id {
        return Err((StatusCode::NOT_FOUND, format!("unknown target '{target}'")));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    let timeout = parse_timeout(&headers)?;

    let call = MethodCall {
        method,
        payload: body,
        content_type,
    };
    let response = match timeout {
        Some(limit) => match tokio::time::timeout(limit, state.dispatch.call(call)).await {
            Ok(r) => r,
            Err(_) => {
                let diag = MethodDiagnostic::new(format!("method did not complete within {limit:?}"));
                return Ok(reply(status::REQUEST_TIMEOUT, DEFAULT_CONTENT_TYPE.to_string(), diag.to_bytes()));
            }
        },
        None => state.dispatch.call(call).await,
    }
    .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    if response.payload.len() > state.max_payload_bytes {
        tracing::warn!(
            size = response.payload.len(),
            limit = state.max_payload_bytes,
            "method response exceeds transport ceiling"
        );
        let diag = MethodDiagnostic::new(format!(
            "response of {} bytes exceeds the {} byte transport limit",
            response.payload.len(),
            state.max_payload_bytes
        ));
        return Ok(reply(status::PAYLOAD_TOO_LARGE, DEFAULT_CONTENT_TYPE.to_string(), diag.to_bytes()));
    }

    Ok(reply(response.status, response.content_type, response.payload))
}

fn parse_timeout(headers: &HeaderMap) -> Result<Option<Duration>, (StatusCode, String)> {
    let Some(value) = headers.get(TIMEOUT_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|ms| Some(Duration::from_millis(ms)))
        .ok_or((StatusCode::BAD_REQUEST, format!("invalid {TIMEOUT_HEADER} header")))
}

fn reply(status: u16, content_type: String, payload: Bytes) -> MethodReply {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, [(header::CONTENT_TYPE, content_type)], payload)
}
