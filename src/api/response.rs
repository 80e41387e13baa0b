//! Response Envelope
//! Mission: One JSON shape for every answer the API gives

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `{success: true, message, data, timestamp}`
#[derive(Debug, Serialize)]
pub struct SuccessEnvelope<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    pub timestamp: String,
}

/// `{success: false, error: {code, message, details?}, timestamp}`
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorEnvelope {
    pub fn new(code: &str, message: String, details: Option<Value>) -> Self {
        Self {
            success: false,
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
            timestamp: now_rfc3339(),
        }
    }
}

/// Successful handler output, wrapped in the envelope on the way out.
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    status: StatusCode,
    message: String,
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, message: &str) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.to_string(),
            data: Some(data),
        }
    }

    pub fn created(data: T, message: &str) -> Self {
        Self {
            status: StatusCode::CREATED,
            message: message.to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// 200 with `data: null`
    pub fn empty(message: &str) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.to_string(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let envelope = SuccessEnvelope {
            success: true,
            message: self.message,
            data: self.data,
            timestamp: now_rfc3339(),
        };
        (self.status, Json(envelope)).into_response()
    }
}
