//! Tower Layer for the authorizer

use std::sync::Arc;
use tower::Layer;

use crate::authorizer::Authorizer;

use super::AuthorizerLayerConfig;
use super::service::AuthorizerService;

/// Tower Layer that puts an [`Authorizer`] in front of a service
#[derive(Debug, Clone)]
pub struct AuthorizerLayer {
    authorizer: Arc<Authorizer>,
    config: AuthorizerLayerConfig,
}

impl AuthorizerLayer {
    /// Create a layer with default configuration
    pub fn new(authorizer: Arc<Authorizer>) -> Self {
        Self {
            authorizer,
            config: AuthorizerLayerConfig::default(),
        }
    }

    /// Create a layer with custom configuration
    pub fn with_config(authorizer: Arc<Authorizer>, config: AuthorizerLayerConfig) -> Self {
        Self { authorizer, config }
    }

    /// Let `path` through without authorization
    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.config.bypass_paths.push(path.into());
        self
    }
}

impl<S> Layer<S> for AuthorizerLayer {
    type Service = AuthorizerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthorizerService::new(inner, Arc::clone(&self.authorizer), self.config.clone())
    }
}
