//! Authentication API Endpoints
//! Mission: Expose register, login, refresh, logout and identity lookup

use crate::api::{extract::JsonBody, response::ApiResponse};
use crate::auth::{
    middleware::AuthUser,
    models::{AuthSession, LoginRequest, RefreshRequest, RegisterRequest, TokenPair, UserResponse},
    jwt::{JwtHandler, SigningKey},
    service::AuthService,
    session_cache::SessionCache,
    user_store::CredentialStore,
};
use crate::config::{Config, PageLimits};
use crate::error::ApiError;
use axum::extract::State;
use std::sync::Arc;

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub service: Arc<AuthService>,
    pub page_limits: PageLimits,
}

impl AuthState {
    pub fn new(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn SessionCache>,
    ) -> Self {
        let jwt = Arc::new(JwtHandler::new(
            SigningKey::new(&config.jwt_secret, config.access_ttl),
            SigningKey::new(&config.jwt_refresh_secret, config.refresh_ttl),
        ));
        let service = AuthService::new(store, cache, jwt, config.backend_timeout);
        Self {
            service: Arc::new(service),
            page_limits: config.page_limits,
        }
    }
}

/// POST /auth/register
pub async fn register(
    State(state): State<AuthState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<ApiResponse<AuthSession>, ApiError> {
    let session = state.service.register(payload).await?;
    Ok(ApiResponse::created(session, "User registered successfully"))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AuthState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<ApiResponse<AuthSession>, ApiError> {
    let session = state.service.login(payload).await?;
    Ok(ApiResponse::ok(session, "Login successful"))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<AuthState>,
    JsonBody(payload): JsonBody<RefreshRequest>,
) -> Result<ApiResponse<TokenPair>, ApiError> {
    let tokens = state.service.refresh(&payload.refresh_token).await?;
    Ok(ApiResponse::ok(tokens, "Token refreshed successfully"))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<AuthState>,
    AuthUser(user): AuthUser,
) -> ApiResponse<()> {
    state.service.logout(user.id).await;
    ApiResponse::empty("Logout successful")
}

/// GET /auth/me
pub async fn me(AuthUser(user): AuthUser) -> ApiResponse<UserResponse> {
    ApiResponse::ok(UserResponse::from_user(&user), "User retrieved successfully")
}
