//! Authentication Models
//! Mission: Define secure user and authentication data structures

use crate::error::{ApiError, FieldError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const NAME_MAX_LEN: usize = 50;
const PASSWORD_MIN_LEN: usize = 6;
// bcrypt only looks at the first 72 bytes
const PASSWORD_MAX_LEN: usize = 72;

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub last_login: Option<String>,
}

/// User roles for RBAC
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UserRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "admin")]
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(UserRole::User),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

/// JWT Claims payload, shared by access and refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String, // subject (user_id)
    pub email: String,
    pub role: UserRole,
    pub iat: usize,
    pub exp: usize, // expiration timestamp
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

/// Trim and lower-case an email so lookups are exact matches.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn check_name(name: &str, errors: &mut Vec<FieldError>) {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        errors.push(FieldError::new("name", "Name is required"));
    } else if trimmed.chars().count() > NAME_MAX_LEN {
        errors.push(FieldError::new("name", "Name must be at most 50 characters"));
    }
}

fn into_result(errors: Vec<FieldError>) -> Result<(), ApiError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// Registration request body
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = Vec::new();
        check_name(&self.name, &mut errors);
        if !is_valid_email(&normalize_email(&self.email)) {
            errors.push(FieldError::new("email", "Please provide a valid email"));
        }
        let len = self.password.len();
        if len < PASSWORD_MIN_LEN {
            errors.push(FieldError::new(
                "password",
                "Password must be at least 6 characters",
            ));
        } else if len > PASSWORD_MAX_LEN {
            errors.push(FieldError::new(
                "password",
                "Password must be at most 72 bytes",
            ));
        }
        into_result(errors)
    }
}

/// Login request body
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = Vec::new();
        if !is_valid_email(&normalize_email(&self.email)) {
            errors.push(FieldError::new("email", "Please provide a valid email"));
        }
        if self.password.is_empty() {
            errors.push(FieldError::new("password", "Password is required"));
        }
        into_result(errors)
    }
}

/// Refresh request body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

/// Fields accepted when creating a user record
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
}

/// Admin-editable account fields. Email, password and role never change here;
/// unknown keys such as `role` are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

impl UserUpdate {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = Vec::new();
        if let Some(name) = &self.name {
            check_name(name, &mut errors);
        }
        into_result(errors)
    }
}

/// Self-service profile update; only the display name can change
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
}

impl From<ProfileUpdate> for UserUpdate {
    fn from(update: ProfileUpdate) -> Self {
        Self {
            name: update.name,
            ..Default::default()
        }
    }
}

/// User response (sanitized)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub last_login: Option<String>,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at.clone(),
            updated_at: user.updated_at.clone(),
            last_login: user.last_login.clone(),
        }
    }
}

/// Freshly minted access + refresh tokens
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Register/login response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub user: UserResponse,
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthSession {
    pub fn new(user: &User, tokens: TokenPair) -> Self {
        Self {
            user: UserResponse::from_user(user),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }
    }
}

/// One page of users
#[derive(Debug, Clone, Serialize)]
pub struct UserPage {
    pub users: Vec<UserResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

impl Pagination {
    pub fn new(page: usize, limit: usize, total: usize) -> Self {
        Self {
            page,
            limit,
            total,
            pages: total.div_ceil(limit.max(1)),
        }
    }
}
