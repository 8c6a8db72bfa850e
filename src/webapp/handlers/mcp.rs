//! Stateless streamable-HTTP transport for MCP
//!
//! Every POST carries one JSON-RPC message or a batch and gets all of its
//! responses in the reply: as a JSON body, or as an SSE stream with one
//! `message` event per response when the client accepts `text/event-stream`.
//! There are no sessions, so GET (server-initiated stream) and DELETE
//! (session teardown) are refused.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use super::super::AppState;
use crate::mcp::protocol::{JsonRpcError, JsonRpcResponse};

/// JSON-RPC implementation-defined server error
const SERVER_ERROR: i32 = -32000;

const EVENT_STREAM: &str = "text/event-stream";

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|accept| accept.contains(EVENT_STREAM))
}

/// One `event: message` frame per response
fn sse_body(responses: &[JsonRpcResponse]) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for response in responses {
        body.push_str("event: message\ndata: ");
        body.push_str(&serde_json::to_string(response)?);
        body.push_str("\n\n");
    }
    Ok(body)
}

/// MCP endpoint
#[utoipa::path(
    post,
    path = "/mcp",
    tag = "MCP",
    request_body(content = String, description = "A JSON-RPC 2.0 message or a batch of them", content_type = "application/json"),
    responses(
        (status = 200, description = "JSON-RPC response(s), as JSON or as an SSE stream"),
        (status = 202, description = "Only notifications were received"),
        (status = 400, description = "Body is not valid JSON")
    )
)]
pub async fn mcp_post_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable request body");
            return (StatusCode::BAD_REQUEST, Json(JsonRpcResponse::parse_error(&e.to_string()))).into_response();
        }
    };

    let (responses, batched) = match message {
        Value::Array(batch) => (state.server.handle_batch(batch).await, true),
        single => (state.server.handle_message(single).await.into_iter().collect(), false),
    };

    if responses.is_empty() {
        return StatusCode::ACCEPTED.into_response();
    }

    if !state.json_response && accepts_event_stream(&headers) {
        return match sse_body(&responses) {
            Ok(body) => (
                [
                    (header::CONTENT_TYPE, EVENT_STREAM),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!(error = %e, "Streamable HTTP error");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };
    }

    if batched {
        Json(responses).into_response()
    } else {
        match responses.into_iter().next() {
            Some(response) => Json(response).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        }
    }
}

/// GET/DELETE on the MCP endpoint
pub async fn mcp_method_not_allowed() -> Response {
    let error = JsonRpcError::new(
        SERVER_ERROR,
        "Method not allowed: this server is stateless and has no sessions",
    );
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        Json(JsonRpcResponse::error(None, error)),
    )
        .into_response()
}
