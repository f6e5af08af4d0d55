//! Request binding: token extraction, transparent refresh and cookie propagation.
//!
//! The read path ([`SessionBinder::validate`]) runs a single validation attempt:
//!
//! ```text
//! Start ─► token present? ─no──► Anonymous
//!              │yes
//!              ▼
//!         verify token ─ok──► Valid
//!              │expired, refresh token present
//!              ▼
//!         refresh once ─ok──► Valid (minted tokens to propagate)
//!              │
//!              └─err──► Invalid
//! ```
//!
//! The write path ([`SessionBinder::propagate`]) turns minted tokens into
//! `Set-Cookie` headers using the cookie attributes the authority declared.

use std::fmt;

use http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::authority::JwtResponse;
use crate::config::CookieConfig;
use crate::error::AuthError;
use crate::jwt::TokenVerifier;
use crate::refresh::{CookieMetadata, RefreshCoordinator, RefreshedTokens};
use crate::session::{RefreshToken, Session};

/// Session and refresh tokens carried by an inbound request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InboundTokens {
    session: Option<String>,
    refresh: Option<String>,
}

impl fmt::Debug for InboundTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundTokens")
            .field("session", &self.session.as_ref().map(|_| "[REDACTED]"))
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl InboundTokens {
    /// Tokens supplied directly by the caller
    pub fn new(session: Option<String>, refresh: Option<String>) -> Self {
        Self {
            session: session.filter(|t| !t.is_empty()),
            refresh: refresh.filter(|t| !t.is_empty()),
        }
    }

    /// Read tokens from request headers.
    ///
    /// `Authorization: Bearer <session>[:<refresh>]` wins over the session and
    /// refresh cookies, slot by slot.
    pub fn from_headers(headers: &HeaderMap, cookies: &CookieConfig) -> Self {
        let (header_session, header_refresh) = bearer_tokens(headers);
        Self::new(
            header_session.or_else(|| cookie_value(headers, &cookies.session_name)),
            header_refresh.or_else(|| cookie_value(headers, &cookies.refresh_name)),
        )
    }

    /// Override the session token with one the caller provides explicitly
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        if !token.is_empty() {
            self.session = Some(token);
        }
        self
    }

    /// Override the refresh token with one the caller provides explicitly
    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        if !token.is_empty() {
            self.refresh = Some(token);
        }
        self
    }

    /// Session token, if any
    pub fn session_token(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Raw refresh token, if any
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh.as_deref()
    }
}

/// Split the legacy `Bearer <session>:<refresh>` pairing into its two tokens
fn bearer_tokens(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return (None, None);
    };
    let trimmed = value.trim();
    let Some(credentials) = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))
        .map(str::trim)
    else {
        return (None, None);
    };

    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    match credentials.split_once(':') {
        Some((session, refresh)) => (non_empty(session), non_empty(refresh)),
        None => (non_empty(credentials), None),
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Tokens minted by the authority that should reach the client.
#[derive(Clone, PartialEq)]
pub struct MintedTokens {
    session_token: String,
    refresh_token: Option<String>,
    cookie: CookieMetadata,
}

impl fmt::Debug for MintedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MintedTokens")
            .field("session_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("cookie", &self.cookie)
            .finish()
    }
}

impl MintedTokens {
    /// New session token
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// New refresh token, when one was issued
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Cookie attributes declared by the authority
    pub fn cookie(&self) -> &CookieMetadata {
        &self.cookie
    }
}

impl From<&RefreshedTokens> for MintedTokens {
    fn from(tokens: &RefreshedTokens) -> Self {
        Self {
            session_token: tokens.session.token().to_string(),
            refresh_token: Some(tokens.refresh_token.expose().to_string()),
            cookie: tokens.cookie.clone(),
        }
    }
}

impl From<&JwtResponse> for MintedTokens {
    fn from(response: &JwtResponse) -> Self {
        Self {
            session_token: response.session_jwt.clone(),
            refresh_token: (!response.refresh_jwt.is_empty()).then(|| response.refresh_jwt.clone()),
            cookie: CookieMetadata::from(response),
        }
    }
}

/// Outcome of one validation attempt.
#[derive(Debug, Clone)]
pub enum SessionValidation {
    /// No session token was presented
    Anonymous,
    /// The session is valid
    Valid {
        /// Verified session
        session: Session,
        /// Tokens minted by a refresh, to be propagated to the client
        minted: Option<MintedTokens>,
    },
    /// A token was presented but could not be validated
    Invalid(AuthError),
}

impl SessionValidation {
    /// Whether a valid session was established
    pub fn is_valid(&self) -> bool {
        matches!(self, SessionValidation::Valid { .. })
    }

    /// The validated session, if any
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionValidation::Valid { session, .. } => Some(session),
            _ => None,
        }
    }

    /// Tokens to propagate, if a refresh happened
    pub fn minted(&self) -> Option<&MintedTokens> {
        match self {
            SessionValidation::Valid { minted, .. } => minted.as_ref(),
            _ => None,
        }
    }

    /// The validation error, if a token was presented and rejected
    pub fn error(&self) -> Option<&AuthError> {
        match self {
            SessionValidation::Invalid(err) => Some(err),
            _ => None,
        }
    }
}

/// Binds sessions to requests and responses.
#[derive(Debug, Clone)]
pub struct SessionBinder {
    verifier: TokenVerifier,
    refresher: RefreshCoordinator,
    project_id: String,
    cookies: CookieConfig,
}

impl SessionBinder {
    /// Create a binder validating sessions for `project_id`
    pub fn new(
        verifier: TokenVerifier,
        refresher: RefreshCoordinator,
        project_id: impl Into<String>,
        cookies: CookieConfig,
    ) -> Self {
        Self {
            verifier,
            refresher,
            project_id: project_id.into(),
            cookies,
        }
    }

    /// Cookie configuration used for extraction and propagation
    pub fn cookies(&self) -> &CookieConfig {
        &self.cookies
    }

    /// Extract tokens from request headers using the configured cookie names
    pub fn extract(&self, headers: &HeaderMap) -> InboundTokens {
        InboundTokens::from_headers(headers, &self.cookies)
    }

    /// Validate inbound tokens, refreshing at most once on expiry.
    ///
    /// A rejected or failed refresh yields [`SessionValidation::Invalid`]
    /// carrying the refresh error.
    pub async fn validate(&self, inbound: &InboundTokens) -> SessionValidation {
        let Some(session_token) = inbound.session_token() else {
            debug!("No session token presented");
            return SessionValidation::Anonymous;
        };

        let err = match self
            .verifier
            .verify(session_token, Some(&self.project_id))
            .await
        {
            Ok(session) => {
                return SessionValidation::Valid {
                    session,
                    minted: None,
                };
            }
            Err(err) => err,
        };

        let Some(refresh) = inbound.refresh_token().filter(|_| err.is_refreshable()) else {
            debug!(error = %err, "Session token rejected");
            return SessionValidation::Invalid(err);
        };

        debug!(project_id = %self.project_id, "Session expired, attempting refresh");
        let refresh_token = RefreshToken::new(self.project_id.clone(), refresh);
        match self.refresher.refresh(&refresh_token).await {
            Ok(refreshed) => SessionValidation::Valid {
                minted: Some(MintedTokens::from(&refreshed)),
                session: refreshed.session,
            },
            Err(refresh_err) => {
                warn!(error = %refresh_err, "Session refresh failed");
                SessionValidation::Invalid(refresh_err)
            }
        }
    }

    /// [`validate`](Self::validate) that stops early when `cancel` fires.
    ///
    /// Any in-flight key fetch or refresh is dropped and the outcome is
    /// [`AuthError::Cancelled`].
    pub async fn validate_cancellable(
        &self,
        inbound: &InboundTokens,
        cancel: &CancellationToken,
    ) -> SessionValidation {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Session validation cancelled");
                SessionValidation::Invalid(AuthError::Cancelled)
            }
            outcome = self.validate(inbound) => outcome,
        }
    }

    /// Extract tokens from headers and validate them
    pub async fn validate_request(&self, headers: &HeaderMap) -> SessionValidation {
        self.validate(&self.extract(headers)).await
    }

    /// `Set-Cookie` values for minted tokens: the session cookie, then the
    /// refresh cookie when a refresh token was issued.
    pub fn cookie_strings(&self, minted: &MintedTokens) -> Vec<String> {
        let mut cookies = vec![self.format_cookie(
            &self.cookies.session_name,
            &minted.session_token,
            &minted.cookie,
        )];
        if let Some(refresh) = &minted.refresh_token {
            cookies.push(self.format_cookie(&self.cookies.refresh_name, refresh, &minted.cookie));
        }
        cookies
    }

    /// Write minted tokens onto a response as cookies.
    ///
    /// Does nothing when `sink` is `None`.
    pub fn propagate(&self, minted: &MintedTokens, sink: Option<&mut HeaderMap>) {
        let Some(sink) = sink else {
            return;
        };
        for cookie in self.cookie_strings(minted) {
            append_cookie(sink, &cookie);
        }
    }

    /// Write expiring session and refresh cookies for `Path=/` and no domain.
    ///
    /// Does nothing when `sink` is `None`.
    pub fn clear_cookies(&self, sink: Option<&mut HeaderMap>) {
        self.clear_cookies_with(&CookieMetadata::default(), sink);
    }

    /// Write expiring session and refresh cookies scoped like the ones being removed.
    ///
    /// Browsers only drop a cookie whose `Domain` and `Path` match, so pass
    /// the metadata the authority declared when the cookies were set. Its
    /// lifetime fields are ignored.
    pub fn clear_cookies_with(&self, metadata: &CookieMetadata, sink: Option<&mut HeaderMap>) {
        let Some(sink) = sink else {
            return;
        };
        let path = metadata.path.as_deref().unwrap_or("/");
        for name in [&self.cookies.session_name, &self.cookies.refresh_name] {
            let mut cookie = format!("{name}=; Path={path}");
            if let Some(domain) = &metadata.domain {
                cookie.push_str(&format!("; Domain={domain}"));
            }
            cookie.push_str("; Max-Age=0");
            self.push_flags(&mut cookie);
            append_cookie(sink, &cookie);
        }
    }

    fn format_cookie(&self, name: &str, value: &str, metadata: &CookieMetadata) -> String {
        let path = metadata.path.as_deref().unwrap_or("/");
        let mut cookie = format!("{name}={value}; Path={path}");
        if let Some(domain) = &metadata.domain {
            cookie.push_str(&format!("; Domain={domain}"));
        }
        if let Some(max_age) = metadata.max_age {
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }
        if let Some(expires) = metadata.expiration.and_then(http_date) {
            cookie.push_str(&format!("; Expires={expires}"));
        }
        self.push_flags(&mut cookie);
        cookie
    }

    fn push_flags(&self, cookie: &mut String) {
        if self.cookies.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.cookies.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=");
        cookie.push_str(self.cookies.same_site.as_str());
    }
}

fn http_date(unix_seconds: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(unix_seconds, 0)
        .map(|date| date.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

fn append_cookie(sink: &mut HeaderMap, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            sink.append(SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "Skipping cookie with invalid header characters"),
    }
}
