//! # Tower middleware for the authorizer
//!
//! - [`AuthorizerLayer`] - wraps a service with bearer-token authorization
//! - [`AuthorizerService`] - the wrapped service
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use tokengate_auth::tower::AuthorizerLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(AuthorizerLayer::new(authorizer))
//!     .service(my_inner_service);
//! ```
//!
//! Each request becomes a `TOKEN` [`AuthorizerRequest`](crate::AuthorizerRequest)
//! whose resource is `"<METHOD> <path>"` and whose credential is the
//! `Authorization` header. On `Allow` the [`Principal`](crate::Principal) is
//! inserted into the request's extensions:
//!
//! ```rust,ignore
//! if let Some(principal) = req.extensions().get::<Principal>() {
//!     println!("caller: {principal}");
//! }
//! ```
//!
//! Every failure produces the same `401` response; the specific reason is only
//! logged.

mod layer;
mod service;

pub use layer::AuthorizerLayer;
pub use service::{AuthorizerService, AuthorizerServiceFuture, UNAUTHORIZED_BODY, unauthorized};

/// Configuration for the authorizer layer
#[derive(Debug, Clone, Default)]
pub struct AuthorizerLayerConfig {
    /// Request paths that skip authorization entirely
    pub bypass_paths: Vec<String>,
}

impl AuthorizerLayerConfig {
    /// Add a path to the bypass list
    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.bypass_paths.push(path.into());
        self
    }

    /// Check if a path should skip authorization
    #[must_use]
    pub fn should_bypass(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| p == path)
    }
}
