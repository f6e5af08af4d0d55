//! Tower Service implementation for session validation
//!
//! For every `http::Request` this service:
//! - skips validation for bypassed path prefixes
//! - extracts the session and refresh tokens from the `Authorization` header or cookies
//! - validates them, refreshing once when the session token has expired
//! - inserts the [`Session`](crate::Session) into request extensions
//! - appends `Set-Cookie` headers for refreshed tokens to the inner response

use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderValue, Request, Response, StatusCode};
use tower_service::Service;
use tracing::debug;

use crate::binder::{SessionBinder, SessionValidation};

use super::SessionLayerConfig;

/// Tower Service that validates sessions
///
/// # Type Parameters
///
/// * `S` - The inner service type
#[derive(Debug, Clone)]
pub struct SessionService<S> {
    inner: S,
    binder: SessionBinder,
    config: SessionLayerConfig,
}

impl<S> SessionService<S> {
    /// Create a new session service
    pub fn new(inner: S, binder: SessionBinder, config: SessionLayerConfig) -> Self {
        Self {
            inner,
            binder,
            config,
        }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the inner service
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

/// Future type for session service responses
pub type SessionServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

fn unauthorized<B: Default>() -> Response<B> {
    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

impl<S, B, ResBody> Service<Request<B>> for SessionService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    B: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = SessionServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        // The clone has not been polled ready; keep the ready one for this call
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if self.config.should_bypass(req.uri().path()) {
            return Box::pin(inner.call(req));
        }

        let binder = self.binder.clone();
        let allow_anonymous = self.config.allow_anonymous;
        let inbound = binder.extract(req.headers());

        Box::pin(async move {
            match binder.validate(&inbound).await {
                SessionValidation::Valid { session, minted } => {
                    req.extensions_mut().insert(session);
                    let mut response = inner.call(req).await?;
                    if let Some(minted) = minted {
                        binder.propagate(&minted, Some(response.headers_mut()));
                    }
                    Ok(response)
                }
                SessionValidation::Anonymous if allow_anonymous => inner.call(req).await,
                SessionValidation::Anonymous => {
                    debug!(path = %req.uri().path(), "Rejecting request without session");
                    Ok(unauthorized())
                }
                SessionValidation::Invalid(err) => {
                    debug!(path = %req.uri().path(), error = %err, "Rejecting request with invalid session");
                    let mut response = unauthorized();
                    if err.is_logged_out() {
                        binder.clear_cookies(Some(response.headers_mut()));
                    }
                    Ok(response)
                }
            }
        })
    }
}
