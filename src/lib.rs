//! AuthGate Backend Library
//!
//! Exposes core modules for use by the server binary and integration tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;

pub use config::Config;
pub use error::ApiError;
