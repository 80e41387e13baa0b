//! Request logging middleware.
//!
//! Tags every request with a correlation id and logs method, path, status
//! code, and latency once the response is ready.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// Reuse the caller's id when it is a sane header value, else mint one.
fn correlation_id(request: &Request) -> String {
    request
        .headers()
        .get(&CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Middleware that logs HTTP requests with timing information.
///
/// 5xx responses log at WARN, everything else at INFO. Handler logs, including
/// the internal error log, run inside the span and so carry the correlation id.
/// The id is echoed in the `X-Correlation-ID` response header.
pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let cid = correlation_id(&request);

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        correlation_id = %cid,
    );

    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    span.in_scope(|| {
        if status >= 500 {
            warn!(status, latency_ms, "Request failed (5xx)");
        } else {
            info!(status, latency_ms, "Request completed");
        }
    });

    if let Ok(value) = HeaderValue::from_str(&cid) {
        response
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, value);
    }

    response
}
