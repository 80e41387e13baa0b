use axum::{
    extract::OriginalUri,
    middleware,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::{response::ApiResponse, users};
use crate::auth::{
    api::{self as auth_api, AuthState},
    middleware::{auth_middleware, require_roles, role_middleware},
    models::UserRole,
};
use crate::config::Config;
use crate::error::ApiError;
use crate::middleware::{
    expose_internal_causes, rate_limit_middleware, request_logging, RateLimitLayer,
};

/// Create the API router, mounted under `/api/{version}`
pub fn create_router(state: AuthState, config: &Config) -> Router {
    let limiter = RateLimitLayer::new(config.rate_limit.clone());
    limiter.start_cleanup_task();

    // Credential endpoints are the brute-force target
    let credential_routes = Router::new()
        .route("/auth/register", post(auth_api::register))
        .route("/auth/login", post(auth_api::login))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    let public_routes = Router::new().route("/auth/refresh", post(auth_api::refresh));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth_api::logout))
        .route("/auth/me", get(auth_api::me))
        .route(
            "/users/profile/me",
            get(users::get_profile).put(users::update_profile),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Outermost layer runs first: authenticate, then check the role
    let admin_routes = Router::new()
        .route("/users", get(users::list_users))
        .route(
            "/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route_layer(middleware::from_fn_with_state(
            require_roles(&[UserRole::Admin]),
            role_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api = Router::new()
        .merge(credential_routes)
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes);

    info!(prefix = %config.api_prefix(), "API routes configured");

    let mut router = Router::new()
        .route("/health", get(health_check))
        .nest(&config.api_prefix(), api)
        .fallback(not_found);

    if config.is_development() {
        router = router.layer(middleware::from_fn(expose_internal_causes));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(request_logging))
        .with_state(state)
}

// ===== Route Handlers =====

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health_check() -> ApiResponse<HealthResponse> {
    ApiResponse::ok(
        HealthResponse {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
        },
        "Service is healthy",
    )
}

async fn not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::RouteNotFound(uri.path().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{session_cache::MemorySessionCache, user_store::UserStore};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    fn create_test_app() -> (Router, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let config = Config::for_testing(temp.path().to_str().unwrap());
        let store = Arc::new(UserStore::new(&config.db_path, config.bcrypt_cost).unwrap());
        let state = AuthState::new(&config, store, Arc::new(MemorySessionCache::new()));
        (create_router(state, &config), temp)
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _temp) = create_test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-correlation-id"));
    }

    #[tokio::test]
    async fn test_unknown_route_uses_envelope() {
        let (app, _temp) = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "Route /api/v1/nope not found");
    }

    #[tokio::test]
    async fn test_admin_routes_require_token() {
        let (app, _temp) = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
