//! Provider and session configuration
//!
//! Both structs are built with [`typed_builder`] and can also be loaded from
//! environment variables:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `SESSION_AUTH_BASE_URL` | [`ProviderConfig::base_url`] | required |
//! | `SESSION_AUTH_TIMEOUT_SECS` | [`ProviderConfig::timeout`] | 30 |
//! | `SESSION_AUTH_REFRESH_INTERVAL_SECS` | [`SessionConfig::refresh_interval`] | 900 |
//! | `SESSION_AUTH_REFRESH_LEAD_SECS` | [`SessionConfig::refresh_lead_time`] | 1800 |

use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::error::{Result, SessionError};

/// Environment variable holding the provider base URL
pub const ENV_BASE_URL: &str = "SESSION_AUTH_BASE_URL";
/// Environment variable holding the request timeout in seconds
pub const ENV_TIMEOUT_SECS: &str = "SESSION_AUTH_TIMEOUT_SECS";
/// Environment variable holding the scheduler interval in seconds
pub const ENV_REFRESH_INTERVAL_SECS: &str = "SESSION_AUTH_REFRESH_INTERVAL_SECS";
/// Environment variable holding the proactive refresh lead time in seconds
pub const ENV_REFRESH_LEAD_SECS: &str = "SESSION_AUTH_REFRESH_LEAD_SECS";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default interval between scheduler ticks
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Default window before expiry in which the scheduler refreshes
pub const DEFAULT_REFRESH_LEAD_TIME: Duration = Duration::from_secs(30 * 60);
/// Default length of the login nonce
pub const DEFAULT_NONCE_LENGTH: usize = 20;

/// Identity provider endpoints
#[derive(Debug, Clone, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for ProviderConfig"),
    builder_type(doc = "Builder for ProviderConfig", vis = "pub"),
    build_method(doc = "Build the ProviderConfig")
)]
pub struct ProviderConfig {
    /// Base URL every path is resolved against (e.g. `https://id.example.com/api`)
    #[builder(setter(into))]
    pub base_url: String,

    /// Login endpoint
    #[builder(default = "/login".to_string(), setter(into))]
    pub login_path: String,

    /// Token refresh endpoint
    #[builder(default = "/auth/refresh".to_string(), setter(into))]
    pub refresh_path: String,

    /// Profile endpoint
    #[builder(default = "/profile".to_string(), setter(into))]
    pub profile_path: String,

    /// Logout endpoint
    #[builder(default = "/logout".to_string(), setter(into))]
    pub logout_path: String,

    /// Sign-up endpoint
    #[builder(default = "/register".to_string(), setter(into))]
    pub register_path: String,

    /// Endpoint that sends a password-reset code
    #[builder(default = "/forgot-password/send-otp".to_string(), setter(into))]
    pub reset_request_path: String,

    /// Endpoint that checks a password-reset code
    #[builder(default = "/forgot-password/verify-otp".to_string(), setter(into))]
    pub reset_verify_path: String,

    /// Endpoint that sets the new password
    #[builder(default = "/forgot-password/reset".to_string(), setter(into))]
    pub reset_path: String,

    /// Per-request timeout
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,

    /// Length of the nonce sent with login requests
    #[builder(default = DEFAULT_NONCE_LENGTH)]
    pub nonce_length: usize,
}

impl ProviderConfig {
    /// Load from `SESSION_AUTH_BASE_URL` and `SESSION_AUTH_TIMEOUT_SECS`
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the base URL is missing or a number is malformed
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(ENV_BASE_URL)
            .map_err(|_| SessionError::invalid_config(format!("{ENV_BASE_URL} is not set")))?;
        let timeout = env_secs(ENV_TIMEOUT_SECS)?.unwrap_or(DEFAULT_TIMEOUT);

        let config = Self::builder().base_url(base_url).timeout(timeout).build();
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable
    ///
    /// # Errors
    /// Returns `InvalidConfig` for an empty or non-HTTP base URL
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(SessionError::invalid_config("base URL is empty"));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(SessionError::invalid_config(format!(
                "base URL must start with http:// or https://, got {base}"
            )));
        }
        if self.timeout.is_zero() {
            return Err(SessionError::invalid_config("timeout must be non-zero"));
        }
        Ok(())
    }

    /// Resolve `path` against the base URL.
    ///
    /// Absolute URLs are returned unchanged.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

/// Session-level settings
#[derive(Debug, Clone, TypedBuilder)]
#[builder(
    builder_method(doc = "Create a new builder for SessionConfig"),
    builder_type(doc = "Builder for SessionConfig", vis = "pub"),
    build_method(doc = "Build the SessionConfig")
)]
pub struct SessionConfig {
    /// Identity provider endpoints
    pub provider: ProviderConfig,

    /// How often the background scheduler checks the token
    #[builder(default = DEFAULT_REFRESH_INTERVAL)]
    pub refresh_interval: Duration,

    /// Tokens expiring within this window are refreshed proactively
    #[builder(default = DEFAULT_REFRESH_LEAD_TIME)]
    pub refresh_lead_time: Duration,
}

impl SessionConfig {
    /// Load provider and scheduler settings from the environment
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a variable is missing or malformed
    pub fn from_env() -> Result<Self> {
        let provider = ProviderConfig::from_env()?;
        let refresh_interval =
            env_secs(ENV_REFRESH_INTERVAL_SECS)?.unwrap_or(DEFAULT_REFRESH_INTERVAL);
        let refresh_lead_time =
            env_secs(ENV_REFRESH_LEAD_SECS)?.unwrap_or(DEFAULT_REFRESH_LEAD_TIME);

        if refresh_interval.is_zero() {
            return Err(SessionError::invalid_config(format!(
                "{ENV_REFRESH_INTERVAL_SECS} must be non-zero"
            )));
        }

        Ok(Self {
            provider,
            refresh_interval,
            refresh_lead_time,
        })
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => parse_secs(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| SessionError::invalid_config(format!("{name}={raw:?}: {e}")))
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}
