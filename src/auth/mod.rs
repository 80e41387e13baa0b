//! Authentication Module
//! Mission: Secure API access with JWT tokens, refresh rotation, and RBAC

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod service;
pub mod session_cache;
pub mod user_store;

pub use api::AuthState;
pub use jwt::{JwtHandler, SigningKey, TokenError};
pub use middleware::{auth_middleware, require_roles, AuthUser};
pub use service::AuthService;
pub use session_cache::{MemorySessionCache, SessionCache, UnavailableSessionCache};
pub use user_store::{CredentialStore, UserStore};
