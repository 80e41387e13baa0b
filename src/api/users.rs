//! User Endpoints
//! Mission: Self-service profile plus admin account management

use crate::api::{extract::JsonBody, response::ApiResponse};
use crate::auth::{
    api::AuthState,
    middleware::AuthUser,
    models::{ProfileUpdate, UserPage, UserResponse, UserUpdate},
};
use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

/// Raw pagination params. Unparseable values fall back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    page: Option<String>,
    limit: Option<String>,
}

impl ListQuery {
    fn parsed(raw: &Option<String>) -> Option<usize> {
        raw.as_deref().and_then(|v| v.trim().parse().ok())
    }
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::InvalidId)
}

/// GET /users/profile/me
pub async fn get_profile(AuthUser(user): AuthUser) -> ApiResponse<UserResponse> {
    ApiResponse::ok(UserResponse::from_user(&user), "Profile retrieved successfully")
}

/// PUT /users/profile/me
pub async fn update_profile(
    State(state): State<AuthState>,
    AuthUser(user): AuthUser,
    JsonBody(update): JsonBody<ProfileUpdate>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let updated = state.service.update_user(user.id, update.into()).await?;
    Ok(ApiResponse::ok(
        UserResponse::from_user(&updated),
        "Profile updated successfully",
    ))
}

/// GET /users (admin)
pub async fn list_users(
    State(state): State<AuthState>,
    Query(query): Query<ListQuery>,
) -> Result<ApiResponse<UserPage>, ApiError> {
    let (page, limit) = state.page_limits.resolve(
        ListQuery::parsed(&query.page),
        ListQuery::parsed(&query.limit),
    );
    let users = state.service.list_users(page, limit).await?;
    Ok(ApiResponse::ok(users, "Users retrieved successfully"))
}

/// GET /users/:id (admin)
pub async fn get_user(
    State(state): State<AuthState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let user = state.service.current_user(parse_id(&id)?).await?;
    Ok(ApiResponse::ok(
        UserResponse::from_user(&user),
        "User retrieved successfully",
    ))
}

/// PUT /users/:id (admin)
pub async fn update_user(
    State(state): State<AuthState>,
    AuthUser(admin): AuthUser,
    Path(id): Path<String>,
    JsonBody(update): JsonBody<UserUpdate>,
) -> Result<ApiResponse<UserResponse>, ApiError> {
    let id = parse_id(&id)?;
    let updated = state.service.update_user(id, update).await?;
    info!(admin_id = %admin.id, user_id = %id, "Admin updated user");
    Ok(ApiResponse::ok(
        UserResponse::from_user(&updated),
        "User updated successfully",
    ))
}

/// DELETE /users/:id (admin)
pub async fn delete_user(
    State(state): State<AuthState>,
    AuthUser(admin): AuthUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>, ApiError> {
    let id = parse_id(&id)?;
    state.service.delete_user(id).await?;
    info!(admin_id = %admin.id, user_id = %id, "Admin deleted user");
    Ok(ApiResponse::empty("User deleted successfully"))
}
