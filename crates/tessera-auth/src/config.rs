//! Client configuration.
//!
//! [`AuthConfig`] is created once per [`AuthClient`](crate::AuthClient) and
//! shared by every component it wires together. It can be built in code or
//! read from `TESSERA_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Environment variable holding the project id.
pub const ENV_PROJECT_ID: &str = "TESSERA_PROJECT_ID";
/// Environment variable holding the authority base URL.
pub const ENV_BASE_URL: &str = "TESSERA_BASE_URL";
/// Environment variable holding a pinned public key (JWK or JWK set JSON).
pub const ENV_PUBLIC_KEY: &str = "TESSERA_PUBLIC_KEY";
/// Environment variable overriding the clock-skew tolerance, in seconds.
pub const ENV_CLOCK_SKEW_SECS: &str = "TESSERA_CLOCK_SKEW_SECS";
/// Environment variable overriding the authority request timeout, in seconds.
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "TESSERA_REQUEST_TIMEOUT_SECS";

/// Default identity authority.
pub const DEFAULT_BASE_URL: &str = "https://api.tessera.dev";

/// Default clock-skew tolerance applied to `exp` and `nbf`.
///
/// Deliberately small: a token expired by more than this is refreshed.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Default timeout for every call to the identity authority.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a rotated-out signing key keeps verifying tokens.
pub const DEFAULT_KEY_GRACE_PERIOD: Duration = Duration::from_secs(300);

/// Default session cookie name.
pub const SESSION_COOKIE_NAME: &str = "DS";
/// Default refresh cookie name.
pub const REFRESH_COOKIE_NAME: &str = "DSR";

/// Session client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Project (issuer) id tokens are expected to belong to
    pub project_id: String,
    /// Identity authority base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Pinned public key material; when set no keys are fetched for `project_id`
    #[serde(default)]
    pub public_key: Option<String>,
    /// Clock-skew tolerance for expiry and not-before checks
    #[serde(default = "default_clock_skew")]
    pub clock_skew: Duration,
    /// Timeout applied to authority requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// How long keys removed by a rotation remain usable
    #[serde(default = "default_key_grace_period")]
    pub key_grace_period: Duration,
    /// Cookie naming and attributes
    #[serde(default)]
    pub cookies: CookieConfig,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_clock_skew() -> Duration {
    DEFAULT_CLOCK_SKEW
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_key_grace_period() -> Duration {
    DEFAULT_KEY_GRACE_PERIOD
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SameSite {
    /// Cookies are only sent on same-site requests
    #[default]
    Strict,
    /// Cookies are sent on top-level navigations
    Lax,
    /// Cookies are always sent (requires `Secure`)
    None,
}

impl SameSite {
    /// Attribute value as written in `Set-Cookie`
    pub fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Names and fixed attributes of the session and refresh cookies.
///
/// Domain, path, max-age and expiry are never configured here: they come
/// from the authority's response for every minted token pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CookieConfig {
    /// Session token cookie name
    pub session_name: String,
    /// Refresh token cookie name
    pub refresh_name: String,
    /// Mark cookies `Secure`
    pub secure: bool,
    /// Mark cookies `HttpOnly`
    pub http_only: bool,
    /// `SameSite` policy
    pub same_site: SameSite,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            session_name: SESSION_COOKIE_NAME.to_string(),
            refresh_name: REFRESH_COOKIE_NAME.to_string(),
            secure: true,
            http_only: true,
            same_site: SameSite::Strict,
        }
    }
}

impl AuthConfig {
    /// Create a configuration for a project with default settings
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            base_url: default_base_url(),
            public_key: None,
            clock_skew: DEFAULT_CLOCK_SKEW,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            key_grace_period: DEFAULT_KEY_GRACE_PERIOD,
            cookies: CookieConfig::default(),
        }
    }

    /// Build a configuration from `TESSERA_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the project id is missing, a
    /// numeric variable does not parse, or the result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let project_id = lookup(ENV_PROJECT_ID)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                AuthError::Configuration(format!("project id is missing ({ENV_PROJECT_ID})"))
            })?;

        let mut config = Self::new(project_id.trim());

        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            config.base_url = base_url;
        }
        config.public_key = lookup(ENV_PUBLIC_KEY).filter(|v| !v.is_empty());

        if let Some(secs) = lookup(ENV_CLOCK_SKEW_SECS) {
            config.clock_skew = parse_secs(ENV_CLOCK_SKEW_SECS, &secs)?;
        }
        if let Some(secs) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            config.request_timeout = parse_secs(ENV_REQUEST_TIMEOUT_SECS, &secs)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the identity authority base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Pin the public key material instead of fetching it
    #[must_use]
    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }

    /// Set the clock-skew tolerance
    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Set the authority request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the grace period for rotated-out keys
    #[must_use]
    pub fn with_key_grace_period(mut self, grace: Duration) -> Self {
        self.key_grace_period = grace;
        self
    }

    /// Replace the cookie configuration
    #[must_use]
    pub fn with_cookies(mut self, cookies: CookieConfig) -> Self {
        self.cookies = cookies;
        self
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Check the configuration for obvious mistakes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when the project id is empty, the
    /// base URL is unparsable or uses plain HTTP for a non-local host, a cookie
    /// name is empty, or the pinned public key is not valid JWK JSON.
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(AuthError::Configuration("project id is missing".into()));
        }

        let url = url::Url::parse(self.base_url())
            .map_err(|e| AuthError::Configuration(format!("invalid base URL: {e}")))?;
        match url.scheme() {
            "https" => {}
            "http" if is_local_host(url.host_str()) => {}
            "http" => {
                return Err(AuthError::Configuration(
                    "base URL must use HTTPS (HTTP only allowed for localhost)".into(),
                ));
            }
            other => {
                return Err(AuthError::Configuration(format!(
                    "unsupported base URL scheme: {other}"
                )));
            }
        }

        if self.cookies.session_name.is_empty() || self.cookies.refresh_name.is_empty() {
            return Err(AuthError::Configuration("cookie names must not be empty".into()));
        }

        if let Some(public_key) = &self.public_key {
            crate::jwt::keys::parse_public_key(public_key)
                .map_err(|e| AuthError::Configuration(format!("invalid public key: {e}")))?;
        }

        Ok(())
    }
}

fn is_local_host(host: Option<&str>) -> bool {
    matches!(host, Some("localhost" | "127.0.0.1" | "[::1]" | "::1"))
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| AuthError::Configuration(format!("{name} must be a whole number of seconds")))
}
