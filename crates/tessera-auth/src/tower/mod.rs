//! # Tower Middleware Integration
//!
//! [`SessionLayer`] wraps any `http::Request` service with session validation:
//!
//! - the [`Session`](crate::Session) is inserted into request extensions
//! - invalid sessions are answered with `401 Unauthorized`
//! - absent sessions are answered with `401` unless anonymous access is allowed
//! - tokens minted by a transparent refresh are appended to the response as `Set-Cookie`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use tessera_auth::tower::SessionLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(SessionLayer::from_client(&client).bypass_path("/health"))
//!     .service(my_inner_service);
//! ```
//!
//! ## Request Extensions
//!
//! ```rust,ignore
//! if let Some(session) = req.extensions().get::<Session>() {
//!     println!("Authenticated user: {}", session.subject());
//! }
//! ```

mod layer;
mod service;

pub use layer::SessionLayer;
pub use service::{SessionService, SessionServiceFuture};

/// Configuration for the session layer
#[derive(Debug, Clone, Default)]
pub struct SessionLayerConfig {
    /// Whether requests without a session token reach the inner service
    pub allow_anonymous: bool,
    /// Path prefixes that skip session validation entirely
    pub bypass_paths: Vec<String>,
}

impl SessionLayerConfig {
    /// Create a new config that allows anonymous access
    #[must_use]
    pub fn allow_anonymous() -> Self {
        Self {
            allow_anonymous: true,
            ..Default::default()
        }
    }

    /// Add a path prefix to the bypass list
    #[must_use]
    pub fn bypass_path(mut self, prefix: impl Into<String>) -> Self {
        self.bypass_paths.push(prefix.into());
        self
    }

    /// Check if a request path should bypass validation.
    ///
    /// A prefix matches the path itself and anything below it (`/health`
    /// matches `/health` and `/health/live`, not `/healthz`).
    #[must_use]
    pub fn should_bypass(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            match path.strip_prefix(prefix) {
                Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.is_empty(),
                None => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionLayerConfig::default();
        assert!(!config.allow_anonymous);
        assert!(config.bypass_paths.is_empty());
        assert!(!config.should_bypass("/"));
    }

    #[test]
    fn test_allow_anonymous() {
        assert!(SessionLayerConfig::allow_anonymous().allow_anonymous);
    }

    #[test]
    fn test_should_bypass_on_segment_boundary() {
        let config = SessionLayerConfig::default()
            .bypass_path("/health")
            .bypass_path("/public/");
        assert!(config.should_bypass("/health"));
        assert!(config.should_bypass("/health/live"));
        assert!(!config.should_bypass("/healthz"));
        assert!(config.should_bypass("/public/logo.png"));
        assert!(!config.should_bypass("/me"));
    }
}
