//! Connector configuration
//!
//! The JSON shape mirrors what operators hand to the connector:
//!
//! ```json
//! {
//!   "auth": { "type": "bearer", "token": "pat-na1-..." },
//!   "rateLimit": { "requestsPerSecond": 10, "burstCapacity": 10 },
//!   "pageSize": 100
//! }
//! ```
//!
//! Everything except `auth` is optional. Configuration is validated up front
//! so a bad token or rate limit fails at `initialize`, not on first use.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConnectorError, Result};

// ============================================================================
// Connector Configuration Constants
// ============================================================================

/// Default HubSpot API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.hubapi.com";

/// Default sustained request rate.
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 10.0;

/// Default burst size of the token bucket.
pub const DEFAULT_BURST_CAPACITY: u32 = 10;

/// Default number of records requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Largest page the HubSpot list endpoints accept.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default timeout for a single remote call in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default number of remote calls per page, first attempt included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry in milliseconds.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// Default upper bound for a single backoff delay in milliseconds.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

fn default_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_backoff_ms() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

/// Authentication settings
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// Private app or OAuth access token sent as `Authorization: Bearer`
    Bearer { token: String },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthConfig::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Token bucket settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    pub requests_per_second: f64,
    pub burst_capacity: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            burst_capacity: DEFAULT_BURST_CAPACITY,
        }
    }
}

/// Retry policy for transient remote failures
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl RetrySettings {
    /// Delay after the given failed attempt (1-based): `initial * 2^(attempt-1)`, capped
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay_ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Connector configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorConfig {
    pub auth: AuthConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl ConnectorConfig {
    /// Configuration with defaults and the given bearer token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            auth: AuthConfig::Bearer {
                token: token.into(),
            },
            rate_limit: None,
            page_size: None,
            base_url: default_base_url(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry: RetrySettings::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: f64, burst_capacity: u32) -> Self {
        self.rate_limit = Some(RateLimitSettings {
            requests_per_second,
            burst_capacity,
        });
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Parse the JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ConnectorError::config(format!("Malformed connector config: {}", e)))
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `HUBSPOT_ACCESS_TOKEN`: bearer token (required)
    /// - `HUBSYNC_API_BASE_URL`: API base URL
    /// - `HUBSYNC_RATE_LIMIT_RPS`, `HUBSYNC_RATE_LIMIT_BURST`: token bucket
    /// - `HUBSYNC_PAGE_SIZE`: records per page (1-100)
    /// - `HUBSYNC_REQUEST_TIMEOUT_SECS`: per-call timeout
    /// - `HUBSYNC_MAX_RETRIES`: attempts per page including the first
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new(std::env::var("HUBSPOT_ACCESS_TOKEN").unwrap_or_default());

        if let Ok(url) = std::env::var("HUBSYNC_API_BASE_URL") {
            config.base_url = url;
        }

        let rps = env_parse::<f64>("HUBSYNC_RATE_LIMIT_RPS")?;
        let burst = env_parse::<u32>("HUBSYNC_RATE_LIMIT_BURST")?;
        if rps.is_some() || burst.is_some() {
            let defaults = RateLimitSettings::default();
            config.rate_limit = Some(RateLimitSettings {
                requests_per_second: rps.unwrap_or(defaults.requests_per_second),
                burst_capacity: burst.unwrap_or(defaults.burst_capacity),
            });
        }

        config.page_size = env_parse("HUBSYNC_PAGE_SIZE")?;

        if let Some(timeout) = env_parse("HUBSYNC_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = timeout;
        }

        if let Some(attempts) = env_parse("HUBSYNC_MAX_RETRIES")? {
            config.retry.max_attempts = attempts;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let token = self.token();
        if token.trim().is_empty() {
            return Err(ConnectorError::config(
                "Missing access token. Set auth.token (or HUBSPOT_ACCESS_TOKEN).",
            ));
        }
        if token.chars().any(char::is_whitespace) {
            return Err(ConnectorError::config("Access token must not contain whitespace"));
        }

        if let Some(limit) = &self.rate_limit {
            if !limit.requests_per_second.is_finite() || limit.requests_per_second <= 0.0 {
                return Err(ConnectorError::config(format!(
                    "rateLimit.requestsPerSecond must be a positive number, got {}",
                    limit.requests_per_second
                )));
            }
            if limit.burst_capacity == 0 {
                return Err(ConnectorError::config(
                    "rateLimit.burstCapacity must be greater than 0",
                ));
            }
        }

        if let Some(page_size) = self.page_size {
            if page_size == 0 || page_size > MAX_PAGE_SIZE {
                return Err(ConnectorError::config(format!(
                    "pageSize must be between 1 and {}, got {}",
                    MAX_PAGE_SIZE, page_size
                )));
            }
        }

        if self.base_url.trim().is_empty() {
            return Err(ConnectorError::config("baseUrl cannot be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConnectorError::config(
                "requestTimeoutSecs must be greater than 0",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConnectorError::config(
                "retry.maxAttempts must be at least 1",
            ));
        }

        Ok(())
    }

    pub fn token(&self) -> &str {
        match &self.auth {
            AuthConfig::Bearer { token } => token,
        }
    }

    /// Effective token bucket settings
    pub fn rate_limit(&self) -> RateLimitSettings {
        self.rate_limit.unwrap_or_default()
    }

    /// Effective page size
    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Sync driver configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncConfig {
    /// Overall deadline for one run; expiry counts as `RemoteUnavailable`
    pub run_timeout: Option<Duration>,
}

impl SyncConfig {
    /// Load from `HUBSYNC_SYNC_TIMEOUT_SECS` (unset or 0 = no deadline)
    pub fn from_env() -> Result<Self> {
        let secs: Option<u64> = env_parse("HUBSYNC_SYNC_TIMEOUT_SECS")?;
        Ok(Self {
            run_timeout: secs.filter(|s| *s > 0).map(Duration::from_secs),
        })
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConnectorError::config(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_inbound_config() {
        let json = r#"{
            "auth": { "type": "bearer", "token": "pat-na1-abc" },
            "rateLimit": { "requestsPerSecond": 4.5, "burstCapacity": 20 },
            "pageSize": 50
        }"#;
        let config = ConnectorConfig::from_json(json).unwrap();

        assert_eq!(config.token(), "pat-na1-abc");
        assert_eq!(config.rate_limit().requests_per_second, 4.5);
        assert_eq!(config.rate_limit().burst_capacity, 20);
        assert_eq!(config.page_size(), 50);
        assert_eq!(config.base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.retry, RetrySettings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_when_optional_fields_missing() {
        let config =
            ConnectorConfig::from_json(r#"{"auth":{"type":"bearer","token":"t"}}"#).unwrap();
        assert_eq!(config.rate_limit(), RateLimitSettings::default());
        assert_eq!(config.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_unknown_auth_type_is_malformed() {
        let err = ConnectorConfig::from_json(r#"{"auth":{"type":"basic","token":"t"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_missing_token() {
        let err = ConnectorConfig::new("  ").validate().unwrap_err();
        assert!(err.to_string().contains("Missing access token"));
    }

    #[test]
    fn test_validate_rejects_zero_refill_rate() {
        let config = ConnectorConfig::new("token").with_rate_limit(0.0, 5);
        assert!(config.validate().is_err());

        let config = ConnectorConfig::new("token").with_rate_limit(f64::NAN, 5);
        assert!(config.validate().is_err());

        let config = ConnectorConfig::new("token").with_rate_limit(1.0, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_page_size_bounds() {
        assert!(ConnectorConfig::new("t").with_page_size(0).validate().is_err());
        assert!(ConnectorConfig::new("t").with_page_size(101).validate().is_err());
        assert!(ConnectorConfig::new("t").with_page_size(100).validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ConnectorConfig::new("super-secret");
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[test]
    fn test_backoff_grows_exponentially_and_caps() {
        let retry = RetrySettings {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(retry.backoff_for(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(4), Duration::from_millis(800));
        assert_eq!(retry.backoff_for(5), Duration::from_millis(1_000));
        assert_eq!(retry.backoff_for(60), Duration::from_millis(1_000));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("HUBSPOT_ACCESS_TOKEN", "env-token");
        std::env::set_var("HUBSYNC_RATE_LIMIT_RPS", "2");
        std::env::set_var("HUBSYNC_PAGE_SIZE", "25");

        let config = ConnectorConfig::from_env();

        std::env::remove_var("HUBSPOT_ACCESS_TOKEN");
        std::env::remove_var("HUBSYNC_RATE_LIMIT_RPS");
        std::env::remove_var("HUBSYNC_PAGE_SIZE");

        let config = config.unwrap();
        assert_eq!(config.token(), "env-token");
        assert_eq!(config.rate_limit().requests_per_second, 2.0);
        assert_eq!(config.rate_limit().burst_capacity, DEFAULT_BURST_CAPACITY);
        assert_eq!(config.page_size(), 25);
    }

    #[test]
    #[serial]
    fn test_from_env_fails_fast_without_token() {
        std::env::remove_var("HUBSPOT_ACCESS_TOKEN");
        assert!(ConnectorConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_sync_config_from_env() {
        std::env::set_var("HUBSYNC_SYNC_TIMEOUT_SECS", "90");
        let config = SyncConfig::from_env();
        std::env::remove_var("HUBSYNC_SYNC_TIMEOUT_SECS");

        assert_eq!(config.unwrap().run_timeout, Some(Duration::from_secs(90)));
    }
}
