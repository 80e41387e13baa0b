//! Service Configuration
//! Mission: Read every tunable from the environment once, at startup
//!
//! Values come from process env (after `.env` is loaded by `main`). Tests build
//! configs from an explicit lookup so they never depend on the host environment.

use crate::middleware::rate_limit::RateLimitConfig;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::time::Duration;
use tracing::warn;

const DEV_ACCESS_SECRET: &str = "dev-access-secret-change-in-production";
const DEV_REFRESH_SECRET: &str = "dev-refresh-secret-change-in-production";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }
}

/// Page size bounds for list endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_size: usize,
    pub max_size: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: 20,
            max_size: 100,
        }
    }
}

impl PageLimits {
    /// Page is 1-based; limit is clamped to `[1, max_size]`.
    pub fn resolve(&self, page: Option<usize>, limit: Option<usize>) -> (usize, usize) {
        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(self.default_size)
            .clamp(1, self.max_size.max(1));
        (page, limit)
    }
}

/// Admin account created at startup when none exists
#[derive(Clone)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: String,
}

/// Full service configuration. Holds secrets, so it has no `Debug` impl.
#[derive(Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub api_version: String,
    pub db_path: String,
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub bcrypt_cost: u32,
    pub session_cache_enabled: bool,
    pub backend_timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub page_limits: PageLimits,
    pub admin: Option<AdminBootstrap>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = Environment::parse(&get("APP_ENV").unwrap_or_default());

        let (jwt_secret, jwt_refresh_secret) = match (get("JWT_SECRET"), get("JWT_REFRESH_SECRET")) {
            (Some(access), Some(refresh)) => (access, refresh),
            _ if environment == Environment::Production => {
                bail!("JWT_SECRET and JWT_REFRESH_SECRET must be set in production")
            }
            (access, refresh) => {
                warn!("JWT secrets not fully configured; using development fallbacks");
                (
                    access.unwrap_or_else(|| DEV_ACCESS_SECRET.to_string()),
                    refresh.unwrap_or_else(|| DEV_REFRESH_SECRET.to_string()),
                )
            }
        };
        if jwt_secret == jwt_refresh_secret {
            bail!("JWT_SECRET and JWT_REFRESH_SECRET must differ");
        }

        let access_ttl = match get("JWT_EXPIRES_IN") {
            Some(raw) => parse_duration(&raw).context("Invalid JWT_EXPIRES_IN")?,
            None => Duration::from_secs(15 * 60),
        };
        let refresh_ttl = match get("JWT_REFRESH_EXPIRES_IN") {
            Some(raw) => parse_duration(&raw).context("Invalid JWT_REFRESH_EXPIRES_IN")?,
            None => Duration::from_secs(7 * 24 * 3600),
        };

        let bcrypt_cost = parse_or(&get, "BCRYPT_COST", 12u32)?;
        if !(4..=31).contains(&bcrypt_cost) {
            bail!("BCRYPT_COST must be between 4 and 31, got {}", bcrypt_cost);
        }

        let session_cache_enabled = get("SESSION_CACHE_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        let rate_limit = RateLimitConfig {
            max_requests: parse_or(&get, "AUTH_RATE_LIMIT_MAX", 20u32)?,
            window: Duration::from_secs(parse_or(&get, "AUTH_RATE_LIMIT_WINDOW_SECS", 900u64)?),
            burst: 0,
        };

        let page_limits = PageLimits {
            default_size: parse_or(&get, "DEFAULT_PAGE_SIZE", 20usize)?,
            max_size: parse_or(&get, "MAX_PAGE_SIZE", 100usize)?,
        };

        let admin = match (get("ADMIN_EMAIL"), get("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminBootstrap {
                email: email.trim().to_lowercase(),
                password,
            }),
            (Some(_), None) | (None, Some(_)) => {
                warn!("ADMIN_EMAIL and ADMIN_PASSWORD must both be set; skipping admin bootstrap");
                None
            }
            (None, None) => None,
        };

        Ok(Self {
            environment,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 5000u16)?,
            api_version: get("API_VERSION").unwrap_or_else(|| "v1".to_string()),
            db_path: get("AUTH_DB_PATH").unwrap_or_else(|| "authgate.db".to_string()),
            jwt_secret,
            jwt_refresh_secret,
            access_ttl,
            refresh_ttl,
            bcrypt_cost,
            session_cache_enabled,
            backend_timeout: Duration::from_millis(parse_or(&get, "BACKEND_TIMEOUT_MS", 5000u64)?),
            rate_limit,
            page_limits,
            admin,
        })
    }

    /// Fast, self-contained settings for tests.
    pub fn for_testing(db_path: &str) -> Self {
        Self {
            environment: Environment::Test,
            host: "127.0.0.1".to_string(),
            port: 0,
            api_version: "v1".to_string(),
            db_path: db_path.to_string(),
            jwt_secret: "test-access-secret".to_string(),
            jwt_refresh_secret: "test-refresh-secret".to_string(),
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 3600),
            bcrypt_cost: 4,
            session_cache_enabled: true,
            backend_timeout: Duration::from_secs(5),
            rate_limit: RateLimitConfig {
                max_requests: 1000,
                window: Duration::from_secs(60),
                burst: 0,
            },
            page_limits: PageLimits::default(),
            admin: None,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn api_prefix(&self) -> String {
        format!("/api/{}", self.api_version)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid {}={:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}

/// `"900"`, `"30s"`, `"15m"`, `"12h"`, `"7d"`
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let (digits, unit_secs) = match raw.chars().last() {
        Some('s') => (&raw[..raw.len() - 1], 1),
        Some('m') => (&raw[..raw.len() - 1], 60),
        Some('h') => (&raw[..raw.len() - 1], 3600),
        Some('d') => (&raw[..raw.len() - 1], 86400),
        _ => (raw, 1),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("Bad duration {:?}", raw))?;
    if value == 0 {
        bail!("Duration must be positive: {:?}", raw);
    }
    let secs = value
        .checked_mul(unit_secs)
        .ok_or_else(|| anyhow!("Duration out of range: {:?}", raw))?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.port, 5000);
        assert_eq!(config.api_prefix(), "/api/v1");
        assert_eq!(config.access_ttl, Duration::from_secs(900));
        assert_eq!(config.refresh_ttl, Duration::from_secs(604800));
        assert_eq!(config.bcrypt_cost, 12);
        assert!(config.session_cache_enabled);
        assert_eq!(config.page_limits, PageLimits::default());
        assert_ne!(config.jwt_secret, config.jwt_refresh_secret);
        assert!(config.admin.is_none());
    }

    #[test]
    fn test_production_requires_secrets() {
        assert!(config_from(&[("APP_ENV", "production")]).is_err());

        let config = config_from(&[
            ("APP_ENV", "production"),
            ("JWT_SECRET", "a"),
            ("JWT_REFRESH_SECRET", "b"),
        ])
        .unwrap();
        assert!(config.is_production());
    }

    #[test]
    fn test_secrets_must_differ() {
        let result = config_from(&[("JWT_SECRET", "same"), ("JWT_REFRESH_SECRET", "same")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("API_VERSION", "v2"),
            ("JWT_EXPIRES_IN", "30s"),
            ("JWT_REFRESH_EXPIRES_IN", "2h"),
            ("SESSION_CACHE_ENABLED", "false"),
            ("ADMIN_EMAIL", " Root@Example.com "),
            ("ADMIN_PASSWORD", "hunter22"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.api_prefix(), "/api/v2");
        assert_eq!(config.access_ttl, Duration::from_secs(30));
        assert_eq!(config.refresh_ttl, Duration::from_secs(7200));
        assert!(!config.session_cache_enabled);
        assert_eq!(config.admin.unwrap().email, "root@example.com");
    }

    #[test]
    fn test_bad_numbers_are_errors() {
        assert!(config_from(&[("PORT", "eighty")]).is_err());
        assert!(config_from(&[("BCRYPT_COST", "2")]).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("900").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604800));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_page_limits_clamp() {
        let limits = PageLimits::default();
        assert_eq!(limits.resolve(None, None), (1, 20));
        assert_eq!(limits.resolve(Some(0), Some(0)), (1, 1));
        assert_eq!(limits.resolve(Some(3), Some(500)), (3, 100));
    }
}
