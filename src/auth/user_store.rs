//! User Storage
//! Mission: Securely store and manage user accounts with SQLite

use crate::auth::models::{NewUser, User, UserRole, UserUpdate};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bcrypt::{hash, verify};
use chrono::Utc;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, email, name, password_hash, role, is_active, created_at, updated_at, last_login";

/// Failure modes of `CredentialStore::create`
#[derive(Debug)]
pub enum StoreError {
    /// The unique constraint on email rejected the insert
    DuplicateEmail,
    Other(anyhow::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateEmail => write!(f, "Email already exists"),
            StoreError::Other(err) => write!(f, "Store error: {:#}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Other(err)
    }
}

/// Identity persistence as seen by the auth service.
///
/// Lookups return `Ok(None)` for missing records; errors are reserved for
/// backend failures.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Exact match on an already-normalized email. Includes the password hash.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Hash the password and insert. Fails with `DuplicateEmail` on conflict.
    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;

    /// Compare `plaintext` against the stored hash.
    async fn verify_secret(&self, user: &User, plaintext: &str) -> bool;

    /// Spend the same effort as `verify_secret` when there is no user to check.
    async fn verify_absent(&self, _plaintext: &str) {}

    async fn update_last_login(&self, id: Uuid) -> Result<()>;

    /// Newest first. Returns the page plus the total row count.
    async fn list(&self, page: usize, limit: usize) -> Result<(Vec<User>, usize)>;

    /// Returns `None` when no record matched at write time.
    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>>;

    /// Returns false when no record matched.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// User storage with SQLite backend
pub struct UserStore {
    db_path: String,
    bcrypt_cost: u32,
    // Verified against when the email is unknown so both paths cost one bcrypt run
    dummy_hash: String,
}

impl UserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str, bcrypt_cost: u32) -> Result<Self> {
        let dummy_hash =
            hash("authgate-dummy-password", bcrypt_cost).context("Failed to hash password")?;
        let store = Self {
            db_path: db_path.to_string(),
            bcrypt_cost,
            dummy_hash,
        };
        store.init_db()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_db(&self) -> Result<()> {
        let conn = connect(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_login TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_users_created_at ON users (created_at)",
            [],
        )?;

        Ok(())
    }

    /// Create the configured admin account unless an admin already exists.
    /// Returns true when a new admin was inserted.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<bool> {
        let count: i64 = self
            .with_conn("count admins", |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM users WHERE role = 'admin'",
                    [],
                    |row| row.get(0),
                )
                .context("Failed to check for admin users")
            })
            .await?;

        if count > 0 {
            return Ok(false);
        }

        let admin = NewUser {
            name: "Administrator".to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: UserRole::Admin,
        };

        match self.create(admin).await {
            Ok(user) => {
                info!(user_id = %user.id, "Bootstrap admin account created");
                Ok(true)
            }
            Err(StoreError::DuplicateEmail) => {
                warn!("Bootstrap admin email is already taken by a non-admin account");
                Ok(false)
            }
            Err(StoreError::Other(err)) => Err(err),
        }
    }

    fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
        let id: String = row.get(0)?;
        let id = Uuid::parse_str(&id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let role_str: String = row.get(4)?;

        Ok(User {
            id,
            email: row.get(1)?,
            name: row.get(2)?,
            password_hash: row.get(3)?,
            role: UserRole::from_str(&role_str).unwrap_or(UserRole::User),
            is_active: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            last_login: row.get(8)?,
        })
    }

    /// Run `f` on a fresh connection off the async workers, so callers can
    /// bound it with a timeout while SQLite waits on a lock.
    async fn with_conn<T, E, F>(&self, op: &'static str, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<anyhow::Error> + Send + 'static,
        F: FnOnce(&Connection) -> Result<T, E> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = connect(&db_path).map_err(E::from)?;
            f(&conn)
        })
        .await
        .map_err(|e| E::from(anyhow::Error::new(e).context(format!("{} task failed", op))))?
    }

    async fn query_one(&self, clause: &'static str, key: String) -> Result<Option<User>> {
        self.with_conn("find user", move |conn| {
            let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, clause);
            let user = conn
                .query_row(&sql, params![key], Self::row_to_user)
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn hash_password(&self, password: String) -> Result<String> {
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .context("Password hashing task failed")?
            .context("Failed to hash password")
    }
}

fn connect(db_path: &str) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open user database at {}", db_path))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

// NOT NULL and primary key failures are bugs, not duplicates
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Row offset of a 1-based page, or `None` when it cannot be addressed.
fn page_offset(page: usize, limit: usize) -> Option<i64> {
    page.saturating_sub(1)
        .checked_mul(limit)
        .and_then(|offset| i64::try_from(offset).ok())
}

async fn bcrypt_verify(plaintext: &str, password_hash: &str) -> bool {
    let plaintext = plaintext.to_string();
    let password_hash = password_hash.to_string();
    let outcome = tokio::task::spawn_blocking(move || verify(plaintext, &password_hash)).await;

    match outcome {
        Ok(Ok(valid)) => valid,
        Ok(Err(e)) => {
            warn!("Stored password hash could not be verified: {}", e);
            false
        }
        Err(e) => {
            warn!("Password verification task failed: {}", e);
            false
        }
    }
}

#[async_trait]
impl CredentialStore for UserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.query_one("email", email.to_string()).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.query_one("id", id.to_string()).await
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let password_hash = self.hash_password(new_user.password).await?;
        let now = Utc::now().to_rfc3339();

        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            name: new_user.name.trim().to_string(),
            password_hash,
            role: new_user.role,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
            last_login: None,
        };

        let row = user.clone();
        self.with_conn("insert user", move |conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, email, name, password_hash, role, is_active, created_at, updated_at, last_login)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.id.to_string(),
                    row.email,
                    row.name,
                    row.password_hash,
                    row.role.as_str(),
                    row.is_active,
                    row.created_at,
                    row.updated_at,
                    row.last_login,
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateEmail),
                Err(e) => Err(StoreError::Other(
                    anyhow::Error::new(e).context("Failed to insert user"),
                )),
            }
        })
        .await?;

        info!(user_id = %user.id, role = user.role.as_str(), "Created user");
        Ok(user)
    }

    async fn verify_secret(&self, user: &User, plaintext: &str) -> bool {
        bcrypt_verify(plaintext, &user.password_hash).await
    }

    async fn verify_absent(&self, plaintext: &str) {
        let _ = bcrypt_verify(plaintext, &self.dummy_hash).await;
    }

    async fn update_last_login(&self, id: Uuid) -> Result<()> {
        self.with_conn("update last login", move |conn| {
            conn.execute(
                "UPDATE users SET last_login = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .context("Failed to update last login")?;
            Ok(())
        })
        .await
    }

    async fn list(&self, page: usize, limit: usize) -> Result<(Vec<User>, usize)> {
        self.with_conn("list users", move |conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            let total = usize::try_from(total).unwrap_or_default();

            // Past the addressable range there is nothing to return
            let Some(offset) = page_offset(page, limit) else {
                return Ok((Vec::new(), total));
            };
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);

            let sql = format!(
                "SELECT {} FROM users ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let users = stmt
                .query_map(params![limit, offset], Self::row_to_user)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok((users, total))
        })
        .await
    }

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>> {
        let name = update.name.map(|name| name.trim().to_string());
        let is_active = update.is_active;

        // Single statement: a row deleted concurrently yields None, not a stale copy
        self.with_conn("update user", move |conn| {
            let sql = format!(
                "UPDATE users
                 SET name = COALESCE(?1, name), is_active = COALESCE(?2, is_active), updated_at = ?3
                 WHERE id = ?4
                 RETURNING {}",
                USER_COLUMNS
            );
            conn.query_row(
                &sql,
                params![name, is_active, Utc::now().to_rfc3339(), id.to_string()],
                Self::row_to_user,
            )
            .optional()
            .context("Failed to update user")
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let rows_affected = self
            .with_conn("delete user", move |conn| {
                conn.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])
                    .context("Failed to delete user")
            })
            .await?;

        if rows_affected > 0 {
            info!(user_id = %id, "Deleted user");
        }
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    // Minimum bcrypt cost keeps the suite fast
    const TEST_COST: u32 = 4;

    fn create_test_store() -> (UserStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = UserStore::new(db_path, TEST_COST).unwrap();
        (store, temp_file)
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Test User".to_string(),
            email: email.to_string(),
            password: "password123".to_string(),
            role: UserRole::User,
        }
    }

    #[tokio::test]
    async fn test_create_and_retrieve_user() {
        let (store, _temp) = create_test_store();

        let created = store.create(new_user("a@x.com")).await.unwrap();
        assert_eq!(created.email, "a@x.com");
        assert_eq!(created.role, UserRole::User);
        assert!(created.is_active);
        assert_ne!(created.password_hash, "password123");

        let by_email = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, created.id);

        let by_id = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "a@x.com");
    }

    #[tokio::test]
    async fn test_missing_lookups_return_none() {
        let (store, _temp) = create_test_store();
        assert!(store.find_by_email("nobody@x.com").await.unwrap().is_none());
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (store, _temp) = create_test_store();
        store.create(new_user("dup@x.com")).await.unwrap();

        match store.create(new_user("dup@x.com")).await {
            Err(StoreError::DuplicateEmail) => {}
            other => panic!("expected DuplicateEmail, got {:?}", other.map(|u| u.id)),
        }
    }

    #[tokio::test]
    async fn test_password_verification() {
        let (store, _temp) = create_test_store();
        let user = store.create(new_user("pw@x.com")).await.unwrap();

        assert!(store.verify_secret(&user, "password123").await);
        assert!(!store.verify_secret(&user, "wrongpassword").await);
    }

    #[tokio::test]
    async fn test_corrupt_hash_is_a_mismatch() {
        let (store, _temp) = create_test_store();
        let mut user = store.create(new_user("bad@x.com")).await.unwrap();
        user.password_hash = "not-a-bcrypt-hash".to_string();

        assert!(!store.verify_secret(&user, "password123").await);
    }

    #[tokio::test]
    async fn test_update_last_login() {
        let (store, _temp) = create_test_store();
        let user = store.create(new_user("login@x.com")).await.unwrap();
        assert!(user.last_login.is_none());

        store.update_last_login(user.id).await.unwrap();
        let reloaded = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(reloaded.last_login.is_some());
    }

    #[tokio::test]
    async fn test_list_users_paginates() {
        let (store, _temp) = create_test_store();
        for i in 0..5 {
            store.create(new_user(&format!("u{}@x.com", i))).await.unwrap();
        }

        let (first, total) = store.list(1, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(first.len(), 2);

        let (last, _) = store.list(3, 2).await.unwrap();
        assert_eq!(last.len(), 1);
    }

    #[tokio::test]
    async fn test_update_changes_only_mutable_fields() {
        let (store, _temp) = create_test_store();
        let user = store.create(new_user("upd@x.com")).await.unwrap();

        let updated = store
            .update(
                user.id,
                UserUpdate {
                    name: Some("  Renamed ".to_string()),
                    is_active: Some(false),
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.role, UserRole::User);
        assert!(!updated.is_active);
        assert_eq!(updated.email, "upd@x.com");
        assert_eq!(updated.password_hash, user.password_hash);

        let reloaded = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.name, "Renamed");
        assert!(!reloaded.is_active);

        // Absent fields are left alone
        let renamed_only = store
            .update(
                user.id,
                UserUpdate {
                    name: Some("Again".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed_only.name, "Again");
        assert!(!renamed_only.is_active);

        assert!(store
            .update(Uuid::new_v4(), UserUpdate::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_after_delete_returns_none() {
        let (store, _temp) = create_test_store();
        let user = store.create(new_user("race@x.com")).await.unwrap();
        assert!(store.delete(user.id).await.unwrap());

        let update = UserUpdate {
            name: Some("Ghost".to_string()),
            ..Default::default()
        };
        assert!(store.update(user.id, update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_far_past_the_end_is_empty() {
        let (store, _temp) = create_test_store();
        store.create(new_user("only@x.com")).await.unwrap();

        let (users, total) = store.list(1_000_000_000_000_000_000, 100).await.unwrap();
        assert!(users.is_empty());
        assert_eq!(total, 1);

        let (users, total) = store.list(usize::MAX, usize::MAX).await.unwrap();
        assert!(users.is_empty());
        assert_eq!(total, 1);
    }

    #[test]
    fn test_page_offset_overflow() {
        assert_eq!(page_offset(1, 20), Some(0));
        assert_eq!(page_offset(3, 20), Some(40));
        assert_eq!(page_offset(usize::MAX, 100), None);
    }

    #[test]
    fn test_only_unique_constraint_counts_as_duplicate() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE t (id TEXT PRIMARY KEY, email TEXT UNIQUE NOT NULL)",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO t VALUES ('1', 'a@x.com')", []).unwrap();

        let dup_email = conn
            .execute("INSERT INTO t VALUES ('2', 'a@x.com')", [])
            .unwrap_err();
        assert!(is_unique_violation(&dup_email));

        let null_email = conn
            .execute("INSERT INTO t VALUES ('3', NULL)", [])
            .unwrap_err();
        assert!(!is_unique_violation(&null_email));

        let dup_key = conn
            .execute("INSERT INTO t VALUES ('1', 'b@x.com')", [])
            .unwrap_err();
        assert!(!is_unique_violation(&dup_key));
    }

    #[tokio::test]
    async fn test_delete_user() {
        let (store, _temp) = create_test_store();
        let user = store.create(new_user("gone@x.com")).await.unwrap();

        assert!(store.delete(user.id).await.unwrap());
        assert!(store.find_by_email("gone@x.com").await.unwrap().is_none());
        assert!(!store.delete(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_admin_runs_once() {
        let (store, _temp) = create_test_store();

        assert!(store.ensure_admin("root@x.com", "rootpass1").await.unwrap());
        assert!(!store.ensure_admin("other@x.com", "rootpass2").await.unwrap());

        let admin = store.find_by_email("root@x.com").await.unwrap().unwrap();
        assert_eq!(admin.role, UserRole::Admin);
        assert!(store.find_by_email("other@x.com").await.unwrap().is_none());
    }
}
