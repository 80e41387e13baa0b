//! JWT Token Handler
//! Mission: Generate and validate access and refresh tokens securely

use crate::auth::models::{Claims, TokenPair, User};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Why a token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Bad signature, wrong algorithm or malformed structure
    Invalid,
    /// Signature fine, but `exp` is in the past
    Expired,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Invalid => write!(f, "Invalid token"),
            TokenError::Expired => write!(f, "Token expired"),
        }
    }
}

impl std::error::Error for TokenError {}

/// One HS256 secret plus the lifetime of tokens it signs
pub struct SigningKey {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SigningKey {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Build claims for `user` expiring after this key's TTL and sign them
    pub fn issue(&self, user: &User) -> Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            iat: now,
            exp: now + self.ttl.as_secs() as usize,
            jti: Uuid::new_v4().to_string(),
        };
        self.sign(&claims)
    }

    /// Sign pre-built claims as-is
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .context("Failed to generate JWT")
    }

    /// Check signature and expiry, returning the embedded claims
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

/// JWT Handler holding the two independent signing keys
pub struct JwtHandler {
    access: SigningKey,
    refresh: SigningKey,
}

impl JwtHandler {
    pub fn new(access: SigningKey, refresh: SigningKey) -> Self {
        Self { access, refresh }
    }

    pub fn access(&self) -> &SigningKey {
        &self.access
    }

    pub fn refresh(&self) -> &SigningKey {
        &self.refresh
    }

    /// Mint an access/refresh pair carrying the same identity claims
    pub fn mint_pair(&self, user: &User) -> Result<TokenPair> {
        debug!(
            user_id = %user.id,
            access_ttl_secs = self.access.ttl().as_secs(),
            refresh_ttl_secs = self.refresh.ttl().as_secs(),
            "Minting token pair"
        );

        Ok(TokenPair {
            access_token: self.access.issue(user)?,
            refresh_token: self.refresh.issue(user)?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.access.verify(token)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.refresh.verify(token)
    }
}
