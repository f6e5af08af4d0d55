//! Tower Layer implementation for session validation

use tower::Layer;

use crate::binder::SessionBinder;
use crate::client::AuthClient;

use super::SessionLayerConfig;
use super::service::SessionService;

/// Tower Layer that validates sessions before calling the inner service
///
/// This layer wraps inner services with [`SessionService`].
///
/// # Example
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use tessera_auth::tower::SessionLayer;
///
/// let layer = SessionLayer::from_client(&client).allow_anonymous();
///
/// let service = ServiceBuilder::new()
///     .layer(layer)
///     .service(my_inner_service);
/// ```
#[derive(Debug, Clone)]
pub struct SessionLayer {
    binder: SessionBinder,
    config: SessionLayerConfig,
}

impl SessionLayer {
    /// Create a new session layer with default configuration
    pub fn new(binder: SessionBinder) -> Self {
        Self {
            binder,
            config: SessionLayerConfig::default(),
        }
    }

    /// Create a session layer sharing a client's key cache and configuration
    pub fn from_client(client: &AuthClient) -> Self {
        Self::new(client.binder().clone())
    }

    /// Set the configuration for this layer
    #[must_use]
    pub fn config(mut self, config: SessionLayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Allow requests without a session to pass through
    #[must_use]
    pub fn allow_anonymous(mut self) -> Self {
        self.config.allow_anonymous = true;
        self
    }

    /// Skip validation for a path prefix
    #[must_use]
    pub fn bypass_path(mut self, prefix: impl Into<String>) -> Self {
        self.config.bypass_paths.push(prefix.into());
        self
    }
}

impl<S> Layer<S> for SessionLayer {
    type Service = SessionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService::new(inner, self.binder.clone(), self.config.clone())
    }
}
