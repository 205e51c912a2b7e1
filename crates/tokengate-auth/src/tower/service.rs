//! Tower Service for the authorizer

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{HeaderValue, StatusCode};
use tower_service::Service;
use tracing::debug;

use crate::authorizer::{Authorizer, Decision, log_denial};
use crate::request::AuthorizerRequest;

use super::AuthorizerLayerConfig;

/// Body of every denial
pub const UNAUTHORIZED_BODY: &str = r#"{"message":"Unauthorized"}"#;

/// The uniform `401` response
pub fn unauthorized<ResBody: From<String>>() -> http::Response<ResBody> {
    let mut response = http::Response::new(ResBody::from(UNAUTHORIZED_BODY.to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Tower Service that authorizes each request before forwarding it
#[derive(Debug, Clone)]
pub struct AuthorizerService<S> {
    inner: S,
    authorizer: Arc<Authorizer>,
    config: AuthorizerLayerConfig,
}

impl<S> AuthorizerService<S> {
    /// Wrap `inner`
    pub fn new(inner: S, authorizer: Arc<Authorizer>, config: AuthorizerLayerConfig) -> Self {
        Self {
            inner,
            authorizer,
            config,
        }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

/// Future returned by [`AuthorizerService`]
pub type AuthorizerServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

impl<S, B, ResBody> Service<http::Request<B>> for AuthorizerService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = AuthorizerServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        // The clone may not be ready; keep the one that was polled
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if self.config.should_bypass(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let authorizer = Arc::clone(&self.authorizer);
        let request = AuthorizerRequest {
            kind: authorizer.config().invocation_type.clone(),
            resource: format!("{} {}", req.method(), req.uri().path()),
            authorization_token: req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            headers: Default::default(),
        };

        Box::pin(async move {
            match authorizer.authorize(&request).await {
                Ok(Decision::Allow { principal, resource }) => {
                    debug!(%principal, %resource, "Request authorized");
                    req.extensions_mut().insert(principal);
                    inner.call(req).await
                }
                Ok(Decision::Deny) => Ok(unauthorized()),
                Err(error) => {
                    log_denial(&error, &request.resource);
                    Ok(unauthorized())
                }
            }
        })
    }
}
