//! Top-level client wiring the session engine together.

use std::future::Future;
use std::sync::Arc;

use http::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::authority::{HttpAuthority, IdentityAuthority, JwtResponse};
use crate::binder::{MintedTokens, SessionBinder, SessionValidation};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::jwt::{KeyProvider, TokenVerifier};
use crate::refresh::{CookieMetadata, RefreshCoordinator, RefreshedTokens};
use crate::session::{AuthenticationInfo, LoginOptions, RefreshToken, Session};

/// Session client for one project.
///
/// Owns the key cache for its lifetime; clones share it.
///
/// # Example
///
/// ```rust,no_run
/// use tessera_auth::{AuthClient, AuthConfig};
///
/// # async fn example(headers: http::HeaderMap) -> tessera_auth::Result<()> {
/// let client = AuthClient::new(AuthConfig::new("P2abc"))?;
///
/// let mut response_headers = http::HeaderMap::new();
/// let outcome = client
///     .validate_and_propagate(&headers, Some(&mut response_headers))
///     .await;
/// if let Some(session) = outcome.session() {
///     println!("user {}", session.subject());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: Arc<AuthConfig>,
    authority: Arc<dyn IdentityAuthority>,
    verifier: TokenVerifier,
    refresher: RefreshCoordinator,
    binder: SessionBinder,
}

impl AuthClient {
    /// Create a client talking to the configured identity authority over HTTPS.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the configuration is invalid.
    pub fn new(config: AuthConfig) -> Result<Self> {
        config.validate()?;
        let authority = Arc::new(HttpAuthority::new(&config)?);
        Self::with_authority(config, authority)
    }

    /// Create a client from `TESSERA_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the environment is incomplete or invalid.
    pub fn from_env() -> Result<Self> {
        Self::new(AuthConfig::from_env()?)
    }

    /// Create a client around a custom [`IdentityAuthority`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the configuration is invalid.
    pub fn with_authority(
        config: AuthConfig,
        authority: Arc<dyn IdentityAuthority>,
    ) -> Result<Self> {
        config.validate()?;

        let keys = KeyProvider::new(Arc::clone(&authority), &config)?;
        let verifier = TokenVerifier::new(keys, config.clock_skew);
        let refresher =
            RefreshCoordinator::new(Arc::clone(&authority), verifier.clone(), &config.project_id);
        let binder = SessionBinder::new(
            verifier.clone(),
            refresher.clone(),
            &config.project_id,
            config.cookies.clone(),
        );

        debug!(project_id = %config.project_id, base_url = %config.base_url(), "Session client created");
        Ok(Self {
            config: Arc::new(config),
            authority,
            verifier,
            refresher,
            binder,
        })
    }

    /// Client configuration
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Token verifier
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Signing key cache
    pub fn key_provider(&self) -> &KeyProvider {
        self.verifier.keys()
    }

    /// Refresh coordinator
    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Request/response binder
    pub fn binder(&self) -> &SessionBinder {
        &self.binder
    }

    /// Verify a session token issued for this project.
    ///
    /// # Errors
    ///
    /// Any verification error; see [`TokenVerifier::verify`].
    pub async fn verify_session(&self, token: &str) -> Result<Session> {
        self.verifier
            .verify(token, Some(&self.config.project_id))
            .await
    }

    /// Validate the session carried by request headers, refreshing once on expiry
    pub async fn validate_session(&self, headers: &HeaderMap) -> SessionValidation {
        self.binder.validate_request(headers).await
    }

    /// [`validate_session`](Self::validate_session) that stops when `cancel` fires
    pub async fn validate_session_cancellable(
        &self,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> SessionValidation {
        self.binder
            .validate_cancellable(&self.binder.extract(headers), cancel)
            .await
    }

    /// Validate the request session and write any minted tokens to `sink`
    pub async fn validate_and_propagate(
        &self,
        headers: &HeaderMap,
        sink: Option<&mut HeaderMap>,
    ) -> SessionValidation {
        let outcome = self.validate_session(headers).await;
        if let Some(minted) = outcome.minted() {
            self.binder.propagate(minted, sink);
        }
        outcome
    }

    /// Trade a raw refresh token for a new verified token pair.
    ///
    /// # Errors
    ///
    /// See [`RefreshCoordinator::refresh`].
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let token = RefreshToken::new(self.config.project_id.clone(), refresh_token);
        self.refresher.refresh(&token).await
    }

    /// [`refresh_session`](Self::refresh_session) that aborts when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Cancelled`] on cancellation, otherwise as
    /// [`refresh_session`](Self::refresh_session).
    pub async fn refresh_session_cancellable(
        &self,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> Result<RefreshedTokens> {
        cancellable(cancel, self.refresh_session(refresh_token)).await
    }

    /// Finish any login flow: verify the minted session token, build the
    /// authentication result and write the token cookies to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AuthorityResponse`] when the response carries no
    /// session token, or any verification error.
    pub async fn complete_authentication(
        &self,
        response: &JwtResponse,
        sink: Option<&mut HeaderMap>,
    ) -> Result<AuthenticationInfo> {
        if response.session_jwt.is_empty() {
            return Err(AuthError::AuthorityResponse(
                "authentication response is missing the session token".into(),
            ));
        }

        let session = self.verify_session(&response.session_jwt).await?;
        self.binder.propagate(&MintedTokens::from(response), sink);

        info!(project_id = %session.project_id(), first_seen = response.first_seen, "Authentication completed");
        Ok(AuthenticationInfo {
            session,
            user: response.user.clone(),
            first_seen: response.first_seen,
        })
    }

    /// Start an OAuth login and return the provider URL to redirect to.
    ///
    /// Step-up and MFA logins require the caller's current refresh credential
    /// in `headers`; without it the call fails before reaching the network.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingStepupCredential`] as described above
    /// - [`AuthError::Authority`] / [`AuthError::Transport`] from the authority
    pub async fn start_oauth(
        &self,
        provider: &str,
        redirect_url: Option<&str>,
        options: &LoginOptions,
        headers: &HeaderMap,
    ) -> Result<String> {
        let current = if options.requires_session_credential() {
            let inbound = self.binder.extract(headers);
            let Some(refresh) = inbound.refresh_token() else {
                warn!(provider, "Step-up login requested without a current session");
                return Err(AuthError::MissingStepupCredential);
            };
            Some(RefreshToken::new(self.config.project_id.clone(), refresh))
        } else {
            None
        };

        self.authority
            .oauth_start(provider, redirect_url, options, current.as_ref())
            .await
    }

    /// Exchange an OAuth authorization code and complete the authentication.
    ///
    /// # Errors
    ///
    /// Authority errors from the exchange, or any error from
    /// [`complete_authentication`](Self::complete_authentication).
    pub async fn exchange_oauth_code(
        &self,
        code: &str,
        sink: Option<&mut HeaderMap>,
    ) -> Result<AuthenticationInfo> {
        let response = self.authority.exchange_code(code).await?;
        self.complete_authentication(&response, sink).await
    }

    /// Revoke the request's session and expire its cookies.
    ///
    /// Cookies are cleared even when revocation fails. Without a refresh token
    /// there is nothing to revoke and only the cookies are cleared.
    ///
    /// # Errors
    ///
    /// [`AuthError::Authority`] / [`AuthError::Transport`] from the revocation call.
    pub async fn logout(&self, headers: &HeaderMap, sink: Option<&mut HeaderMap>) -> Result<()> {
        self.logout_with(headers, &CookieMetadata::default(), sink).await
    }

    /// [`AuthClient::logout`] for cookies set with an authority-declared
    /// `Domain` or `Path`.
    ///
    /// The expiring cookies carry the same scope as `metadata`.
    ///
    /// # Errors
    ///
    /// [`AuthError::Authority`] / [`AuthError::Transport`] from the revocation call.
    pub async fn logout_with(
        &self,
        headers: &HeaderMap,
        metadata: &CookieMetadata,
        sink: Option<&mut HeaderMap>,
    ) -> Result<()> {
        let inbound = self.binder.extract(headers);
        let result = match inbound.refresh_token() {
            Some(refresh) => {
                let token = RefreshToken::new(self.config.project_id.clone(), refresh);
                self.authority.logout(&token).await
            }
            None => {
                debug!("Logout without refresh token, clearing cookies only");
                Ok(())
            }
        };
        self.binder.clear_cookies_with(metadata, sink);
        result
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AuthError::Cancelled),
        result = work => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let err = AuthClient::new(AuthConfig::new("")).unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_work() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, std::future::pending::<Result<()>>()).await;
        assert_eq!(result, Err(AuthError::Cancelled));
    }

    #[tokio::test]
    async fn test_work_completes_without_cancel() {
        let cancel = CancellationToken::new();
        let result = cancellable(&cancel, async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
