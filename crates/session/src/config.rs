//! Session engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `MARKETSYNC_API_BASE_URL` - Backend base URL (e.g., <https://api.example.com/>)
//!
//! ## Optional
//! - `MARKETSYNC_STORE_PATH` - Session store file (default: .marketsync/session.json)
//! - `MARKETSYNC_TOKEN_POLL_ATTEMPTS` - Provider token polling attempts (default: 15)
//! - `MARKETSYNC_TOKEN_POLL_INTERVAL_MS` - Delay between polls in ms (default: 300)
//! - `MARKETSYNC_HTTP_TIMEOUT_SECS` - Backend request timeout (default: 30)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::retry::RetryPolicy;

/// Default number of `get_access_token` polls before giving up.
pub const DEFAULT_TOKEN_POLL_ATTEMPTS: u32 = 15;

/// Default spacing between provider token polls.
pub const DEFAULT_TOKEN_POLL_INTERVAL_MS: u64 = 300;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Session engine configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend base URL; endpoint paths are joined onto it.
    pub api_base_url: Url,
    /// Location of the durable session store.
    pub store_path: PathBuf,
    /// Bounded polling policy for provider access tokens.
    pub token_poll: RetryPolicy,
    /// Per-request timeout for backend calls.
    pub http_timeout: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl SessionConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required keys are missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = parse_base_url(&get_required(&lookup, "MARKETSYNC_API_BASE_URL")?)?;
        let store_path = PathBuf::from(get_or_default(
            &lookup,
            "MARKETSYNC_STORE_PATH",
            ".marketsync/session.json",
        ));

        let attempts: u32 = parse_var(
            &lookup,
            "MARKETSYNC_TOKEN_POLL_ATTEMPTS",
            DEFAULT_TOKEN_POLL_ATTEMPTS,
        )?;
        if attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "MARKETSYNC_TOKEN_POLL_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let interval_ms: u64 = parse_var(
            &lookup,
            "MARKETSYNC_TOKEN_POLL_INTERVAL_MS",
            DEFAULT_TOKEN_POLL_INTERVAL_MS,
        )?;
        let timeout_secs: u64 = parse_var(&lookup, "MARKETSYNC_HTTP_TIMEOUT_SECS", 30)?;

        Ok(Self {
            api_base_url,
            store_path,
            token_poll: RetryPolicy::new(attempts, Duration::from_millis(interval_ms)),
            http_timeout: Duration::from_secs(timeout_secs),
            sentry_dsn: lookup("SENTRY_DSN").filter(|v| !v.is_empty()),
            sentry_environment: lookup("SENTRY_ENVIRONMENT").filter(|v| !v.is_empty()),
        })
    }

    /// Configuration pointing at `base_url` with defaults everywhere else.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if `base_url` is not a valid URL.
    pub fn for_base_url(base_url: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| (key == "MARKETSYNC_API_BASE_URL").then(|| base_url.to_string()))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required variable.
fn get_required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a variable with a default value.
fn get_or_default(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Parse the backend base URL, ensuring a trailing slash so relative joins
/// keep any path prefix (e.g. `/api/`).
fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let url = Url::parse(&normalized).map_err(|e| {
        ConfigError::InvalidEnvVar("MARKETSYNC_API_BASE_URL".to_string(), e.to_string())
    })?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidEnvVar(
            "MARKETSYNC_API_BASE_URL".to_string(),
            "must be an absolute http(s) URL".to_string(),
        ));
    }
    Ok(url)
}
