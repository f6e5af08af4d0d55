//! HTTP implementation of [`IdentityAuthority`].

use std::fmt;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::{AuthorityErrorBody, IdentityAuthority, JwtResponse};
use crate::config::AuthConfig;
use crate::error::{AuthError, RefreshError, Result};
use crate::jwt::is_valid_project_id;
use crate::session::{LoginOptions, RefreshToken};

const KEYS_PATH: &str = "/v2/keys";
const REFRESH_PATH: &str = "/v1/auth/refresh";
const OAUTH_AUTHORIZE_PATH: &str = "/v1/auth/oauth/authorize";
const OAUTH_EXCHANGE_PATH: &str = "/v1/auth/oauth/exchange";
const LOGOUT_PATH: &str = "/v1/auth/logout";

#[derive(Deserialize)]
struct OAuthStartResponse {
    url: String,
}

/// Identity authority reached over HTTPS.
///
/// Every request is authenticated with `Bearer <project_id>`; requests acting
/// on a refresh token send `Bearer <project_id>:<refresh_token>`.
#[derive(Clone)]
pub struct HttpAuthority {
    base_url: String,
    project_id: String,
    http_client: reqwest::Client,
}

impl fmt::Debug for HttpAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAuthority")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("http_client", &"<reqwest::Client>")
            .finish()
    }
}

impl HttpAuthority {
    /// Create an authority client from configuration.
    ///
    /// The configured request timeout applies to every call.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the HTTP client cannot be built.
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(config, http_client))
    }

    /// Create an authority client around an existing `reqwest::Client`
    pub fn with_client(config: &AuthConfig, http_client: reqwest::Client) -> Self {
        Self {
            base_url: config.base_url().to_string(),
            project_id: config.project_id.clone(),
            http_client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn bearer(&self, refresh_token: Option<&RefreshToken>) -> String {
        match refresh_token {
            Some(token) => format!("Bearer {}:{}", self.project_id, token.expose()),
            None => format!("Bearer {}", self.project_id),
        }
    }

    fn post(&self, path: &str, refresh_token: Option<&RefreshToken>) -> RequestBuilder {
        self.http_client
            .post(self.url(path))
            .header(reqwest::header::AUTHORIZATION, self.bearer(refresh_token))
    }

    /// Send a non-refresh request, mapping failures onto transport and authority errors
    async fn send(&self, request: RequestBuilder, operation: &'static str) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            error!(operation, error = %e, "Identity authority unreachable");
            AuthError::Transport(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = error_body(response).await;
        error!(
            operation,
            status = status.as_u16(),
            code = %body.error_code,
            "Identity authority returned error status"
        );
        Err(AuthError::Authority {
            status: status.as_u16(),
            code: body.error_code.clone(),
            description: body.description(),
        })
    }

    async fn jwt_response(&self, response: Response) -> Result<JwtResponse> {
        response
            .json::<JwtResponse>()
            .await
            .map_err(|e| AuthError::AuthorityResponse(format!("invalid token response: {e}")))
    }
}

async fn error_body(response: Response) -> AuthorityErrorBody {
    let bytes = response.bytes().await.unwrap_or_default();
    serde_json::from_slice(&bytes).unwrap_or_default()
}

/// Whether a refresh failure status means the refresh token is no longer usable
fn is_rejection(status: StatusCode) -> bool {
    status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl IdentityAuthority for HttpAuthority {
    async fn fetch_signing_keys(&self, project_id: &str) -> Result<JwkSet> {
        let key_fetch = |reason: String| AuthError::KeyFetch {
            project_id: project_id.to_string(),
            reason,
        };
        if !is_valid_project_id(project_id) {
            return Err(key_fetch("invalid project id".into()));
        }

        let url = self.url(&format!("{KEYS_PATH}/{project_id}"));
        info!(project_id, "Fetching signing keys");

        let response = self
            .http_client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer(None))
            .send()
            .await
            .map_err(|e| {
                error!(project_id, error = %e, "Failed to fetch signing keys");
                key_fetch(e.to_string())
            })?;

        if !response.status().is_success() {
            error!(
                project_id,
                status = response.status().as_u16(),
                "Key endpoint returned error status"
            );
            return Err(key_fetch(format!(
                "key endpoint returned status {}",
                response.status()
            )));
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            error!(project_id, error = %e, "Failed to parse key set JSON");
            key_fetch(format!("invalid key set format: {e}"))
        })?;

        debug!(project_id, key_count = jwks.keys.len(), "Received key set");
        Ok(jwks)
    }

    async fn refresh_session(&self, refresh_token: &RefreshToken) -> Result<JwtResponse> {
        info!(project_id = %refresh_token.project_id, "Refreshing session");

        let response = self
            .post(REFRESH_PATH, Some(refresh_token))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, timeout = e.is_timeout(), "Refresh request failed");
                RefreshError::Unavailable {
                    reason: e.to_string(),
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return self.jwt_response(response).await;
        }

        let body = error_body(response).await;
        if is_rejection(status) {
            warn!(
                status = status.as_u16(),
                code = %body.error_code,
                "Refresh token rejected"
            );
            return Err(RefreshError::Rejected {
                code: body.error_code.clone(),
                description: body.description(),
            }
            .into());
        }

        error!(status = status.as_u16(), code = %body.error_code, "Refresh endpoint unavailable");
        Err(RefreshError::Unavailable {
            reason: format!("refresh endpoint returned status {status}"),
        }
        .into())
    }

    async fn exchange_code(&self, code: &str) -> Result<JwtResponse> {
        let request = self.post(OAUTH_EXCHANGE_PATH, None).json(&json!({ "code": code }));
        let response = self.send(request, "oauth_exchange").await?;
        self.jwt_response(response).await
    }

    async fn oauth_start(
        &self,
        provider: &str,
        redirect_url: Option<&str>,
        options: &LoginOptions,
        current: Option<&RefreshToken>,
    ) -> Result<String> {
        let mut query = vec![("provider", provider)];
        if let Some(redirect_url) = redirect_url.filter(|url| !url.is_empty()) {
            query.push(("redirectURL", redirect_url));
        }

        let request = self.post(OAUTH_AUTHORIZE_PATH, current).query(&query).json(options);
        let response = self.send(request, "oauth_start").await?;
        let start: OAuthStartResponse = response.json().await.map_err(|e| {
            error!(provider, error = %e, "Failed to parse OAuth redirect");
            AuthError::AuthorityResponse(format!("invalid OAuth start response: {e}"))
        })?;

        debug!(provider, "OAuth login started");
        Ok(start.url)
    }

    async fn logout(&self, refresh_token: &RefreshToken) -> Result<()> {
        let request = self.post(LOGOUT_PATH, Some(refresh_token));
        self.send(request, "logout").await?;
        info!(project_id = %refresh_token.project_id, "Session revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_pairs_project_and_refresh_token() {
        let authority = HttpAuthority::new(&AuthConfig::new("P1")).unwrap();
        assert_eq!(authority.bearer(None), "Bearer P1");

        let refresh = RefreshToken::new("P1", "r.t.s");
        assert_eq!(authority.bearer(Some(&refresh)), "Bearer P1:r.t.s");
    }

    #[test]
    fn test_base_url_trailing_slash_ignored() {
        let config = AuthConfig::new("P1").with_base_url("http://localhost:9000/");
        let authority = HttpAuthority::new(&config).unwrap();
        assert_eq!(authority.url(KEYS_PATH), "http://localhost:9000/v2/keys");
    }

    #[test]
    fn test_rejection_statuses() {
        for status in [400u16, 401, 403, 404] {
            assert!(is_rejection(StatusCode::from_u16(status).unwrap()));
        }
        for status in [429u16, 500, 502, 503] {
            assert!(!is_rejection(StatusCode::from_u16(status).unwrap()));
        }
    }

    #[tokio::test]
    async fn test_key_fetch_rejects_unsafe_project_id() {
        let config = AuthConfig::new("P1").with_base_url("http://127.0.0.1:9");
        let authority = HttpAuthority::new(&config).unwrap();
        for project_id in ["..", "", "P1/../v1", "P1%2F"] {
            let err = authority.fetch_signing_keys(project_id).await.unwrap_err();
            assert_eq!(
                err,
                AuthError::KeyFetch {
                    project_id: project_id.to_string(),
                    reason: "invalid project id".into(),
                }
            );
        }
    }

    #[test]
    fn test_debug_hides_client() {
        let authority = HttpAuthority::new(&AuthConfig::new("P1")).unwrap();
        assert!(format!("{authority:?}").contains("<reqwest::Client>"));
    }
}
