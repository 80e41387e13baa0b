//! Middleware for observability and abuse protection.
//!
//! This module provides:
//! - Request logging with correlation ids and latency tracking
//! - Internal error chains in responses (development only)
//! - Rate limiting per IP address

pub mod error_details;
pub mod logging;
pub mod rate_limit;

pub use error_details::expose_internal_causes;
pub use logging::{request_logging, CORRELATION_ID_HEADER};
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
