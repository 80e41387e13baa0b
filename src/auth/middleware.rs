//! Authentication Middleware
//! Mission: Protect API endpoints with JWT validation and role checks

use crate::auth::{
    api::AuthState,
    jwt::TokenError,
    models::{User, UserRole},
};
use crate::error::ApiError;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Authenticated identity, inserted into request extensions by `auth_middleware`
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(ApiError::NoToken)
    }
}

/// `Authorization: Bearer <token>`; anything else counts as no token
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Auth middleware that validates access tokens and attaches the user
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers()).ok_or(ApiError::NoToken)?;

    let claims = state
        .service
        .jwt()
        .verify_access(token)
        .map_err(|e| match e {
            TokenError::Expired => ApiError::TokenExpired,
            TokenError::Invalid => ApiError::InvalidToken,
        })?;

    let user_id = claims.user_id().ok_or(ApiError::InvalidToken)?;

    // A valid signature for a user that no longer exists is just an invalid token
    let user = match state.service.current_user(user_id).await {
        Ok(user) => user,
        Err(ApiError::UserNotFound) => {
            debug!(user_id = %user_id, "Token subject no longer exists");
            return Err(ApiError::InvalidToken);
        }
        Err(e) => return Err(e),
    };

    req.extensions_mut().insert(AuthUser(user));
    Ok(next.run(req).await)
}

/// Allowed roles for a route group, used as middleware state
#[derive(Debug, Clone)]
pub struct RoleGuard {
    allowed: Arc<[UserRole]>,
}

impl RoleGuard {
    pub fn check(&self, user: Option<&AuthUser>) -> Result<(), ApiError> {
        let AuthUser(user) = user.ok_or(ApiError::NoToken)?;
        if self.allowed.contains(&user.role) {
            Ok(())
        } else {
            debug!(
                user_id = %user.id,
                role = user.role.as_str(),
                "Role not permitted for route"
            );
            Err(ApiError::InsufficientPermissions)
        }
    }
}

/// Build a role guard. Layer it after `auth_middleware`:
/// `middleware::from_fn_with_state(require_roles(&[UserRole::Admin]), role_middleware)`
pub fn require_roles(roles: &[UserRole]) -> RoleGuard {
    RoleGuard {
        allowed: Arc::from(roles),
    }
}

pub async fn role_middleware(
    State(guard): State<RoleGuard>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    guard.check(req.extensions().get::<AuthUser>())?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        jwt::{JwtHandler, SigningKey},
        models::Claims,
        service::AuthService,
        session_cache::MemorySessionCache,
        user_store::{CredentialStore, UserStore},
        models::NewUser,
    };
    use crate::config::PageLimits;
    use axum::{
        body::{to_bytes, Body},
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;
    use uuid::Uuid;

    const ACCESS_SECRET: &str = "gate-access-secret";

    fn create_test_user(role: UserRole) -> User {
        let now = Utc::now().to_rfc3339();
        User {
            id: Uuid::new_v4(),
            email: "testuser@example.com".to_string(),
            name: "Test User".to_string(),
            password_hash: "hash".to_string(),
            role,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
            last_login: None,
        }
    }

    async fn whoami(AuthUser(user): AuthUser) -> String {
        user.email
    }

    fn create_test_app() -> (Router, Arc<UserStore>, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let store = Arc::new(UserStore::new(temp.path().to_str().unwrap(), 4).unwrap());
        let jwt = Arc::new(JwtHandler::new(
            SigningKey::new(ACCESS_SECRET, Duration::from_secs(900)),
            SigningKey::new("gate-refresh-secret", Duration::from_secs(3600)),
        ));
        let service = Arc::new(AuthService::new(
            store.clone(),
            Arc::new(MemorySessionCache::new()),
            jwt,
            Duration::from_secs(5),
        ));
        let state = AuthState {
            service,
            page_limits: PageLimits::default(),
        };

        let app = Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state);
        (app, store, temp)
    }

    async fn call(app: Router, auth: Option<String>) -> (StatusCode, serde_json::Value) {
        let mut builder = HttpRequest::builder().uri("/whoami");
        if let Some(value) = auth {
            builder = builder.header("Authorization", value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn test_role_guard() {
        let guard = require_roles(&[UserRole::Admin]);

        let admin = AuthUser(create_test_user(UserRole::Admin));
        assert!(guard.check(Some(&admin)).is_ok());

        let user = AuthUser(create_test_user(UserRole::User));
        assert!(matches!(
            guard.check(Some(&user)),
            Err(ApiError::InsufficientPermissions)
        ));

        assert!(matches!(guard.check(None), Err(ApiError::NoToken)));
    }

    #[tokio::test]
    async fn test_missing_token() {
        let (app, _store, _temp) = create_test_app();
        let (status, body) = call(app, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "NO_TOKEN");
    }

    #[tokio::test]
    async fn test_malformed_token() {
        let (app, _store, _temp) = create_test_app();
        let (status, body) = call(app, Some("Bearer not-a-jwt".to_string())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (app, store, _temp) = create_test_app();
        let user = store
            .create(NewUser {
                name: "A".to_string(),
                email: "a@x.com".to_string(),
                password: "secret123".to_string(),
                role: UserRole::User,
            })
            .await
            .unwrap();

        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            iat: now - 120,
            exp: now - 60,
            jti: Uuid::new_v4().to_string(),
        };
        let token = SigningKey::new(ACCESS_SECRET, Duration::from_secs(60))
            .sign(&claims)
            .unwrap();

        let (status, body) = call(app, Some(format!("Bearer {}", token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "TOKEN_EXPIRED");
    }

    #[tokio::test]
    async fn test_valid_token_attaches_user() {
        let (app, store, _temp) = create_test_app();
        let user = store
            .create(NewUser {
                name: "A".to_string(),
                email: "a@x.com".to_string(),
                password: "secret123".to_string(),
                role: UserRole::User,
            })
            .await
            .unwrap();
        let token = SigningKey::new(ACCESS_SECRET, Duration::from_secs(60))
            .issue(&user)
            .unwrap();

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .header("Authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"a@x.com");
    }

    #[tokio::test]
    async fn test_token_for_deleted_user_is_invalid() {
        let (app, _store, _temp) = create_test_app();
        let ghost = create_test_user(UserRole::User);
        let token = SigningKey::new(ACCESS_SECRET, Duration::from_secs(60))
            .issue(&ghost)
            .unwrap();

        let (status, body) = call(app, Some(format!("Bearer {}", token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    }
}
