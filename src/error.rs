//! API Error Taxonomy
//! Mission: Turn every failure into a stable code and a uniform envelope

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::error;

use crate::api::response::ErrorEnvelope;

/// Full error chain of a 500, carried in response extensions and never in the
/// body. `middleware::expose_internal_causes` surfaces it in development.
#[derive(Debug, Clone)]
pub struct InternalCause(pub String);

impl InternalCause {
    /// The envelope an internal error renders to, with the chain as details.
    pub fn detailed_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::new(
            "INTERNAL_ERROR",
            "Internal server error".to_string(),
            Some(json!({ "cause": self.0 })),
        )
    }
}

/// Broad failure classes every error maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Unauthorized,
    Forbidden,
    NotFound,
    TooManyRequests,
    Internal,
}

/// One rejected input field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Every failure the HTTP boundary can report.
#[derive(Debug)]
pub enum ApiError {
    Validation(Vec<FieldError>),
    InvalidId,
    EmailExists,
    InvalidCredentials,
    RefreshInvalid,
    NoToken,
    InvalidToken,
    TokenExpired,
    AccountDeactivated,
    InsufficientPermissions,
    UserNotFound,
    RouteNotFound(String),
    RateLimited(Duration),
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn validation(field: &str, message: &str) -> Self {
        ApiError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Validation(_) | ApiError::InvalidId => ErrorKind::Validation,
            ApiError::EmailExists => ErrorKind::Conflict,
            ApiError::InvalidCredentials
            | ApiError::RefreshInvalid
            | ApiError::NoToken
            | ApiError::InvalidToken
            | ApiError::TokenExpired => ErrorKind::Unauthorized,
            ApiError::AccountDeactivated | ApiError::InsufficientPermissions => {
                ErrorKind::Forbidden
            }
            ApiError::UserNotFound | ApiError::RouteNotFound(_) => ErrorKind::NotFound,
            ApiError::RateLimited(_) => ErrorKind::TooManyRequests,
            ApiError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::InvalidId => "INVALID_ID",
            ApiError::EmailExists => "EMAIL_EXISTS",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::RefreshInvalid => "INVALID_REFRESH_TOKEN",
            ApiError::NoToken => "NO_TOKEN",
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::TokenExpired => "TOKEN_EXPIRED",
            ApiError::AccountDeactivated => "ACCOUNT_DEACTIVATED",
            ApiError::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ApiError::UserNotFound => "USER_NOT_FOUND",
            ApiError::RouteNotFound(_) => "NOT_FOUND",
            ApiError::RateLimited(_) => "RATE_LIMITED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::Validation(fields) if !fields.is_empty() => Some(json!(fields)),
            ApiError::RateLimited(retry_after) => {
                Some(json!({ "retryAfterSeconds": retry_after.as_secs() }))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Validation(_) => write!(f, "Validation failed"),
            ApiError::InvalidId => write!(f, "Invalid ID format"),
            ApiError::EmailExists => write!(f, "Email already registered"),
            ApiError::InvalidCredentials => write!(f, "Invalid credentials"),
            ApiError::RefreshInvalid => write!(f, "Invalid refresh token"),
            ApiError::NoToken | ApiError::InvalidToken => {
                write!(f, "Not authorized to access this route")
            }
            ApiError::TokenExpired => write!(f, "Token expired"),
            ApiError::AccountDeactivated => write!(f, "Account is deactivated"),
            ApiError::InsufficientPermissions => write!(f, "Insufficient permissions"),
            ApiError::UserNotFound => write!(f, "User not found"),
            ApiError::RouteNotFound(path) => write!(f, "Route {} not found", path),
            ApiError::RateLimited(_) => write!(f, "Too many requests. Please slow down."),
            // Never leak internals through the message
            ApiError::Internal(_) => write!(f, "Internal server error"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(err) = &self {
            error!(error = ?err, "Unhandled internal error");
        }

        let status = self.status();
        let envelope = ErrorEnvelope::new(self.code(), self.to_string(), self.details());
        let mut response = (status, Json(envelope)).into_response();

        if let ApiError::Internal(err) = &self {
            response
                .extensions_mut()
                .insert(InternalCause(format!("{:#}", err)));
        }

        if let ApiError::RateLimited(retry_after) = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err = anyhow::anyhow!("Test error");
        let api_err: ApiError = err.into();

        match api_err {
            ApiError::Internal(_) => (),
            _ => panic!("Expected Internal error"),
        }
    }

    #[test]
    fn test_status_and_codes() {
        let cases = [
            (ApiError::validation("email", "bad"), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (ApiError::InvalidId, StatusCode::BAD_REQUEST, "INVALID_ID"),
            (ApiError::EmailExists, StatusCode::CONFLICT, "EMAIL_EXISTS"),
            (ApiError::InvalidCredentials, StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            (ApiError::RefreshInvalid, StatusCode::UNAUTHORIZED, "INVALID_REFRESH_TOKEN"),
            (ApiError::NoToken, StatusCode::UNAUTHORIZED, "NO_TOKEN"),
            (ApiError::InvalidToken, StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
            (ApiError::TokenExpired, StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
            (ApiError::AccountDeactivated, StatusCode::FORBIDDEN, "ACCOUNT_DEACTIVATED"),
            (
                ApiError::InsufficientPermissions,
                StatusCode::FORBIDDEN,
                "INSUFFICIENT_PERMISSIONS",
            ),
            (ApiError::UserNotFound, StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            (
                ApiError::RateLimited(Duration::from_secs(3)),
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
            ),
            (
                ApiError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status(), status, "{}", code);
            assert_eq!(err.code(), code);
        }
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let response = ApiError::Internal(anyhow::anyhow!("db password=hunter2")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.extensions().get::<InternalCause>().unwrap().0,
            "db password=hunter2"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!body.contains("hunter2"));
        assert!(body.contains("INTERNAL_ERROR"));
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited(Duration::from_secs(42)).into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "42"
        );
    }
}
