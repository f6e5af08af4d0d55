//! Identity authority abstraction.
//!
//! The session engine never talks HTTP directly: key fetches, refreshes and
//! the OAuth hand-off go through [`IdentityAuthority`]. [`HttpAuthority`] is
//! the production implementation; tests substitute a mock server or their
//! own implementation.

mod http;

pub use http::HttpAuthority;

use std::fmt;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::{LoginOptions, RefreshToken, UserResponse};

/// Remote identity authority operations consumed by the session engine.
#[async_trait]
pub trait IdentityAuthority: Send + Sync + fmt::Debug {
    /// Fetch the published signing keys for a project.
    ///
    /// Failures are reported as [`AuthError::KeyFetch`](crate::AuthError::KeyFetch).
    async fn fetch_signing_keys(&self, project_id: &str) -> Result<JwkSet>;

    /// Exchange a refresh token for a new token pair.
    ///
    /// Failures are reported as [`AuthError::Refresh`](crate::AuthError::Refresh),
    /// split into rejected and unavailable.
    async fn refresh_session(&self, refresh_token: &RefreshToken) -> Result<JwtResponse>;

    /// Exchange an OAuth authorization code for a token pair.
    async fn exchange_code(&self, code: &str) -> Result<JwtResponse>;

    /// Start an OAuth login and return the provider redirect URL.
    ///
    /// `current` carries the caller's refresh credential for step-up and MFA logins.
    async fn oauth_start(
        &self,
        provider: &str,
        redirect_url: Option<&str>,
        options: &LoginOptions,
        current: Option<&RefreshToken>,
    ) -> Result<String>;

    /// Revoke the session tied to a refresh token.
    async fn logout(&self, refresh_token: &RefreshToken) -> Result<()>;
}

/// Token pair and cookie metadata minted by the authority.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct JwtResponse {
    /// New session token
    pub session_jwt: String,
    /// New refresh token
    pub refresh_jwt: String,
    /// Cookie `Domain` attribute (empty: host-only)
    pub cookie_domain: String,
    /// Cookie `Path` attribute (empty: `/`)
    pub cookie_path: String,
    /// Cookie `Max-Age` in seconds (zero: session cookie)
    pub cookie_max_age: i32,
    /// Cookie expiry as unix seconds (zero: none)
    pub cookie_expiration: i32,
    /// Profile snapshot of the authenticated user
    pub user: Option<UserResponse>,
    /// Whether this was the user's first login
    pub first_seen: bool,
}

impl fmt::Debug for JwtResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtResponse")
            .field("session_jwt", &"[REDACTED]")
            .field("refresh_jwt", &"[REDACTED]")
            .field("cookie_domain", &self.cookie_domain)
            .field("cookie_path", &self.cookie_path)
            .field("cookie_max_age", &self.cookie_max_age)
            .field("cookie_expiration", &self.cookie_expiration)
            .field("user", &self.user)
            .field("first_seen", &self.first_seen)
            .finish()
    }
}

/// Structured error body returned by the authority
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthorityErrorBody {
    /// Machine-readable error code
    pub error_code: String,
    /// Short description
    pub error_description: String,
    /// Extra detail
    pub error_message: String,
}

impl AuthorityErrorBody {
    /// Description and message joined, if either is present
    pub fn description(&self) -> Option<String> {
        match (
            self.error_description.is_empty(),
            self.error_message.is_empty(),
        ) {
            (true, true) => None,
            (false, true) => Some(self.error_description.clone()),
            (true, false) => Some(self.error_message.clone()),
            (false, false) => Some(format!(
                "{}: {}",
                self.error_description, self.error_message
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_jwt_response_wire_names() {
        let response: JwtResponse = serde_json::from_value(json!({
            "sessionJwt": "s",
            "refreshJwt": "r",
            "cookieDomain": "example.com",
            "cookieMaxAge": 600,
            "firstSeen": true,
            "user": {"userId": "U1"}
        }))
        .unwrap();

        assert_eq!(response.session_jwt, "s");
        assert_eq!(response.cookie_domain, "example.com");
        assert_eq!(response.cookie_path, "");
        assert_eq!(response.cookie_max_age, 600);
        assert_eq!(response.cookie_expiration, 0);
        assert!(response.first_seen);
        assert_eq!(response.user.unwrap().user_id, "U1");
    }

    #[test]
    fn test_jwt_response_debug_redacted() {
        let response = JwtResponse {
            session_jwt: "session-secret".into(),
            refresh_jwt: "refresh-secret".into(),
            ..JwtResponse::default()
        };
        let debug = format!("{response:?}");
        assert!(!debug.contains("session-secret"));
        assert!(!debug.contains("refresh-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_error_body_description() {
        let body: AuthorityErrorBody = serde_json::from_value(json!({
            "errorCode": "E061005",
            "errorDescription": "Refresh token expired"
        }))
        .unwrap();
        assert_eq!(body.error_code, "E061005");
        assert_eq!(body.description().as_deref(), Some("Refresh token expired"));
        assert_eq!(AuthorityErrorBody::default().description(), None);
    }
}
