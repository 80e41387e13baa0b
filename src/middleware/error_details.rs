//! Development-only error detail middleware.
//!
//! Internal errors render a generic envelope. When this layer is installed the
//! body is re-rendered with the error chain from `InternalCause` attached.

use crate::error::InternalCause;
use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

pub async fn expose_internal_causes(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let Some(cause) = response.extensions().get::<InternalCause>().cloned() else {
        return response;
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    let body = Json(cause.detailed_envelope()).into_response().into_body();
    Response::from_parts(parts, body)
}
