//! Session refresh.
//!
//! [`RefreshCoordinator`] trades a refresh token for a new token pair and
//! verifies the new session token before handing it out. It performs exactly
//! one authority call per invocation and never retries.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::authority::{IdentityAuthority, JwtResponse};
use crate::error::{AuthError, Result};
use crate::jwt::TokenVerifier;
use crate::session::{RefreshToken, Session};

/// Cookie attributes the authority declared for a minted token pair.
///
/// Zero and empty values mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieMetadata {
    /// `Domain` attribute
    pub domain: Option<String>,
    /// `Path` attribute
    pub path: Option<String>,
    /// `Max-Age` in seconds
    pub max_age: Option<i64>,
    /// Expiry as unix seconds
    pub expiration: Option<i64>,
}

impl From<&JwtResponse> for CookieMetadata {
    fn from(response: &JwtResponse) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let positive = |n: i32| (n > 0).then_some(i64::from(n));
        Self {
            domain: non_empty(&response.cookie_domain),
            path: non_empty(&response.cookie_path),
            max_age: positive(response.cookie_max_age),
            expiration: positive(response.cookie_expiration),
        }
    }
}

/// Verified result of a successful refresh.
#[derive(Clone)]
pub struct RefreshedTokens {
    /// The new session, already verified
    pub session: Session,
    /// The rotated refresh token; the one that was spent must not be reused
    pub refresh_token: RefreshToken,
    /// Cookie attributes for propagating the pair
    pub cookie: CookieMetadata,
}

impl fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("session", &self.session)
            .field("refresh_token", &self.refresh_token)
            .field("cookie", &self.cookie)
            .finish()
    }
}

/// Performs refreshes against the identity authority.
#[derive(Debug, Clone)]
pub struct RefreshCoordinator {
    authority: Arc<dyn IdentityAuthority>,
    verifier: TokenVerifier,
    project_id: String,
}

impl RefreshCoordinator {
    /// Create a coordinator that verifies minted tokens against `project_id`
    pub fn new(
        authority: Arc<dyn IdentityAuthority>,
        verifier: TokenVerifier,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            authority,
            verifier,
            project_id: project_id.into(),
        }
    }

    /// Exchange a refresh token for a new, verified token pair.
    ///
    /// # Errors
    ///
    /// - [`RefreshError::Rejected`](crate::RefreshError::Rejected) when the
    ///   authority reports the refresh token expired, revoked or unknown
    /// - [`RefreshError::Unavailable`](crate::RefreshError::Unavailable) on
    ///   timeouts, connection failures and 5xx responses
    /// - [`AuthError::AuthorityResponse`] when a success response lacks either token
    /// - any verification error for the minted session token
    pub async fn refresh(&self, refresh_token: &RefreshToken) -> Result<RefreshedTokens> {
        let response = self.authority.refresh_session(refresh_token).await?;

        if response.session_jwt.is_empty() || response.refresh_jwt.is_empty() {
            error!(
                project_id = %self.project_id,
                has_session = !response.session_jwt.is_empty(),
                has_refresh = !response.refresh_jwt.is_empty(),
                "Refresh response is missing a token"
            );
            return Err(AuthError::AuthorityResponse(
                "refresh response is missing a token".into(),
            ));
        }

        let session = self
            .verifier
            .verify(&response.session_jwt, Some(&self.project_id))
            .await
            .inspect_err(|e| {
                warn!(project_id = %self.project_id, error = %e, "Minted session token failed verification");
            })?;

        let cookie = CookieMetadata::from(&response);
        let mut rotated = RefreshToken::new(self.project_id.clone(), response.refresh_jwt);
        if let Some(expiration) = cookie.expiration {
            rotated = rotated.with_expires_at(expiration as u64);
        }

        info!(
            project_id = %self.project_id,
            expires_at = session.expires_at(),
            "Session refreshed"
        );

        Ok(RefreshedTokens {
            session,
            refresh_token: rotated,
            cookie,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_metadata_treats_zero_as_unset() {
        let response = JwtResponse {
            cookie_domain: "example.com".into(),
            cookie_max_age: 0,
            cookie_expiration: -5,
            ..JwtResponse::default()
        };
        let metadata = CookieMetadata::from(&response);
        assert_eq!(metadata.domain.as_deref(), Some("example.com"));
        assert_eq!(metadata.path, None);
        assert_eq!(metadata.max_age, None);
        assert_eq!(metadata.expiration, None);
    }

    #[test]
    fn test_cookie_metadata_copies_declared_values() {
        let response = JwtResponse {
            cookie_path: "/app".into(),
            cookie_max_age: 3600,
            cookie_expiration: 1_900_000_000,
            ..JwtResponse::default()
        };
        let metadata = CookieMetadata::from(&response);
        assert_eq!(metadata.path.as_deref(), Some("/app"));
        assert_eq!(metadata.max_age, Some(3600));
        assert_eq!(metadata.expiration, Some(1_900_000_000));
    }
}
