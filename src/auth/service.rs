//! Auth Service
//! Mission: Orchestrate register, login, refresh and logout
//!
//! Session lifecycle per user: anonymous -> authenticated -> rotated -> revoked.
//! Refresh tokens are tracked in the session cache, one live token per user.

use crate::auth::{
    jwt::JwtHandler,
    models::{
        normalize_email, AuthSession, LoginRequest, NewUser, Pagination, RegisterRequest,
        TokenPair, User, UserPage, UserResponse, UserRole, UserUpdate,
    },
    session_cache::{CacheError, CacheResult, SessionCache},
    user_store::{CredentialStore, StoreError},
};
use crate::error::ApiError;
use anyhow::{anyhow, Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    cache: Arc<dyn SessionCache>,
    jwt: Arc<JwtHandler>,
    backend_timeout: Duration,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn SessionCache>,
        jwt: Arc<JwtHandler>,
        backend_timeout: Duration,
    ) -> Self {
        info!(
            cache_backend = cache.backend_name(),
            timeout_ms = backend_timeout.as_millis() as u64,
            "Auth service initialized"
        );
        Self {
            store,
            cache,
            jwt,
            backend_timeout,
        }
    }

    pub fn jwt(&self) -> &Arc<JwtHandler> {
        &self.jwt
    }

    /// Create an account and open its first session
    pub async fn register(&self, req: RegisterRequest) -> Result<AuthSession, ApiError> {
        req.validate()?;
        let email = normalize_email(&req.email);

        if self
            .bounded("find_by_email", self.store.find_by_email(&email))
            .await?
            .is_some()
        {
            return Err(ApiError::EmailExists);
        }

        let new_user = NewUser {
            name: req.name,
            email,
            password: req.password,
            role: UserRole::User,
        };

        // The pre-check can race; the unique constraint has the final word
        let user = match tokio::time::timeout(self.backend_timeout, self.store.create(new_user))
            .await
        {
            Ok(Ok(user)) => user,
            Ok(Err(StoreError::DuplicateEmail)) => return Err(ApiError::EmailExists),
            Ok(Err(StoreError::Other(err))) => {
                return Err(err.context("create user failed").into())
            }
            Err(_) => return Err(self.timed_out("create user").into()),
        };

        let tokens = self.jwt.mint_pair(&user)?;
        self.remember_refresh_token(user.id, &tokens.refresh_token)
            .await;

        info!(user_id = %user.id, "User registered");
        Ok(AuthSession::new(&user, tokens))
    }

    /// Check credentials and open a new session
    pub async fn login(&self, req: LoginRequest) -> Result<AuthSession, ApiError> {
        req.validate()?;
        let email = normalize_email(&req.email);

        let found = self
            .bounded("find_by_email", self.store.find_by_email(&email))
            .await?;

        // Same error for unknown email and wrong password
        let user = match found {
            Some(user) => {
                if !self.store.verify_secret(&user, &req.password).await {
                    warn!(user_id = %user.id, "Failed login attempt");
                    return Err(ApiError::InvalidCredentials);
                }
                user
            }
            None => {
                self.store.verify_absent(&req.password).await;
                warn!("Failed login attempt for unknown email");
                return Err(ApiError::InvalidCredentials);
            }
        };

        // Only revealed to callers who already proved the password
        if !user.is_active {
            warn!(user_id = %user.id, "Login attempt on deactivated account");
            return Err(ApiError::AccountDeactivated);
        }

        self.touch_last_login(user.id);

        let tokens = self.jwt.mint_pair(&user)?;
        self.remember_refresh_token(user.id, &tokens.refresh_token)
            .await;

        info!(user_id = %user.id, role = user.role.as_str(), "Login successful");
        Ok(AuthSession::new(&user, tokens))
    }

    /// Exchange a live refresh token for a new pair, invalidating the old one
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let claims = self.jwt.verify_refresh(refresh_token).map_err(|e| {
            debug!(reason = %e, "Refresh token rejected by signature check");
            ApiError::RefreshInvalid
        })?;
        let user_id = claims.user_id().ok_or(ApiError::RefreshInvalid)?;

        self.check_refresh_token_is_current(user_id, refresh_token)
            .await?;

        // Re-read the user to catch deletion or deactivation since issuance
        let user = match self
            .bounded("find_by_id", self.store.find_by_id(user_id))
            .await
        {
            Ok(Some(user)) if user.is_active => user,
            Ok(Some(_)) => {
                warn!(user_id = %user_id, "Refresh attempt on deactivated account");
                return Err(ApiError::RefreshInvalid);
            }
            Ok(None) => {
                warn!(user_id = %user_id, "Refresh attempt for deleted user");
                return Err(ApiError::RefreshInvalid);
            }
            Err(err) => {
                error!(user_id = %user_id, error = ?err, "User lookup failed during refresh");
                return Err(ApiError::RefreshInvalid);
            }
        };

        let tokens = self.jwt.mint_pair(&user)?;
        self.rotate_refresh_token(user.id, &tokens.refresh_token)
            .await?;

        debug!(user_id = %user.id, "Refresh token rotated");
        Ok(tokens)
    }

    /// Revoke the user's refresh token. Always succeeds from the caller's view.
    pub async fn logout(&self, user_id: Uuid) {
        match self.cache_call(self.cache.delete(user_id)).await {
            Ok(()) => info!(user_id = %user_id, "User logged out"),
            Err(err) => warn!(
                user_id = %user_id,
                error = %err,
                "Could not revoke refresh token on logout"
            ),
        }
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<User, ApiError> {
        self.bounded("find_by_id", self.store.find_by_id(user_id))
            .await?
            .ok_or(ApiError::UserNotFound)
    }

    // ----- account administration -----

    /// Newest accounts first. `page` and `limit` must already be clamped.
    pub async fn list_users(&self, page: usize, limit: usize) -> Result<UserPage, ApiError> {
        let (users, total) = self.bounded("list users", self.store.list(page, limit)).await?;
        Ok(UserPage {
            users: users.iter().map(UserResponse::from_user).collect(),
            pagination: Pagination::new(page, limit, total),
        })
    }

    /// Apply an update. Deactivating an account also revokes its session.
    pub async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> Result<User, ApiError> {
        update.validate()?;
        let deactivating = update.is_active == Some(false);

        let user = self
            .bounded("update user", self.store.update(user_id, update))
            .await?
            .ok_or(ApiError::UserNotFound)?;

        if deactivating {
            self.logout(user_id).await;
        }
        info!(user_id = %user_id, "User updated");
        Ok(user)
    }

    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), ApiError> {
        if !self.bounded("delete user", self.store.delete(user_id)).await? {
            return Err(ApiError::UserNotFound);
        }
        self.logout(user_id).await;
        Ok(())
    }

    // ----- session cache policies -----
    //
    // Issuing (register/login) and revoking (logout) tolerate cache failures.
    // Validating and rotating during refresh do not.

    /// Fail-open: a cache outage must not block register/login.
    async fn remember_refresh_token(&self, user_id: Uuid, token: &str) {
        let ttl = self.jwt.refresh().ttl();
        if let Err(err) = self.cache_call(self.cache.put(user_id, token, ttl)).await {
            warn!(
                user_id = %user_id,
                error = %err,
                "Refresh token not cached; it will be rejected on use"
            );
        }
    }

    /// Fail-closed: the presented token must be exactly the cached one.
    async fn check_refresh_token_is_current(
        &self,
        user_id: Uuid,
        presented: &str,
    ) -> Result<(), ApiError> {
        match self.cache_call(self.cache.get(user_id)).await {
            Ok(Some(current)) if current.as_bytes() == presented.as_bytes() => Ok(()),
            Ok(Some(_)) => {
                warn!(user_id = %user_id, "Superseded refresh token presented");
                Err(ApiError::RefreshInvalid)
            }
            Ok(None) => {
                debug!(user_id = %user_id, "No live refresh token on record");
                Err(ApiError::RefreshInvalid)
            }
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Cannot validate refresh token");
                Err(ApiError::RefreshInvalid)
            }
        }
    }

    /// Fail-closed: a rotated token that was not stored could never be used.
    async fn rotate_refresh_token(&self, user_id: Uuid, token: &str) -> Result<(), ApiError> {
        let ttl = self.jwt.refresh().ttl();
        self.cache_call(self.cache.put(user_id, token, ttl))
            .await
            .map_err(|err| {
                warn!(user_id = %user_id, error = %err, "Could not store rotated refresh token");
                ApiError::RefreshInvalid
            })
    }

    // ----- helpers -----

    /// Best-effort, off the response path.
    fn touch_last_login(&self, user_id: Uuid) {
        let store = Arc::clone(&self.store);
        let timeout = self.backend_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, store.update_last_login(user_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(user_id = %user_id, error = ?err, "Last login not recorded"),
                Err(_) => warn!(user_id = %user_id, "Last login update timed out"),
            }
        });
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.backend_timeout, fut).await {
            Ok(result) => result.with_context(|| format!("{} failed", op)),
            Err(_) => Err(self.timed_out(op)),
        }
    }

    async fn cache_call<T, F>(&self, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        tokio::time::timeout(self.backend_timeout, fut)
            .await
            .unwrap_or_else(|_| Err(CacheError::Backend("operation timed out".to_string())))
    }

    fn timed_out(&self, op: &str) -> anyhow::Error {
        anyhow!("{} timed out after {:?}", op, self.backend_timeout)
    }
}
