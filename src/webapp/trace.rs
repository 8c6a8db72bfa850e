//! Request tracing middleware
//!
//! Adds a correlation ID span to each request for log tracing.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::{info_span, Instrument};

pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generate a short random hex ID
fn gen_id() -> String {
    format!("{:06x}", rand::random::<u32>() & 0xFFFFFF)
}

/// Caller-supplied request id, if it is short enough to log
fn caller_id(request: &Request) -> Option<String> {
    request
        .headers()
        .get(&REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .filter(|id| !id.is_empty() && id.len() <= 64)
        .map(str::to_string)
}

/// Wraps each request in a root `httpd` span (no parent, so spans never
/// accumulate across requests) and echoes the correlation ID back.
pub async fn trace_request(request: Request, next: Next) -> Response {
    let id = caller_id(&request).unwrap_or_else(gen_id);
    let span = info_span!(parent: None, "httpd", %id);

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}
