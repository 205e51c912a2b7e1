//! The token authorizer
//!
//! [`Authorizer::authorize`] runs one request through the full pipeline:
//! request shape, bearer extraction, structural decode, key resolution,
//! verification and subject extraction. Every stage fails terminally; there is
//! no retry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AuthorizerConfig;
use crate::error::{AuthorizerError, AuthorizerResult, ConfigError};
use crate::extract::bearer_token;
use crate::jwt::{HttpKeySetSource, KeyResolver, KeySetSource, TokenVerifier, decode_header};
use crate::request::AuthorizerRequest;

/// Identity established by a verified token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Wrap a subject
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    /// The subject string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authorization decision for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The caller may invoke `resource` as `principal`
    Allow {
        /// Verified subject
        principal: Principal,
        /// Resource from the request
        resource: String,
    },
    /// The caller may not proceed
    Deny,
}

impl Decision {
    /// Whether this is an `Allow`
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// The principal of an `Allow`
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Allow { principal, .. } => Some(principal),
            Self::Deny => None,
        }
    }
}

/// Bearer-token authorizer
///
/// Cheap to share behind an `Arc`; the key cache and fetch limiter inside are
/// the only mutable state and are safe for concurrent use.
#[derive(Debug)]
pub struct Authorizer {
    config: AuthorizerConfig,
    resolver: KeyResolver,
    verifier: TokenVerifier,
}

impl Authorizer {
    /// Build an authorizer that fetches keys from `config.jwks_uri`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: AuthorizerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let source = HttpKeySetSource::new(config.jwks_uri.clone(), config.fetch_timeout)
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Self::with_source(config, Arc::new(source))
    }

    /// Build an authorizer over an arbitrary key-set source
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn with_source(
        config: AuthorizerConfig,
        source: Arc<dyn KeySetSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        info!(
            jwks_uri = %config.jwks_uri,
            audience = %config.audience,
            issuer = %config.issuer,
            algorithms = ?config.allowed_algorithms,
            "Token authorizer configured"
        );

        Ok(Self {
            resolver: KeyResolver::new(source, &config),
            verifier: TokenVerifier::new(&config),
            config,
        })
    }

    /// The configuration this authorizer was built with
    pub fn config(&self) -> &AuthorizerConfig {
        &self.config
    }

    /// The signing-key resolver
    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Decide whether `request` may proceed
    ///
    /// # Errors
    ///
    /// Returns the [`AuthorizerError`] of the first stage that fails.
    pub async fn authorize(&self, request: &AuthorizerRequest) -> AuthorizerResult<Decision> {
        if request.kind != self.config.invocation_type {
            return Err(AuthorizerError::malformed_request(format!(
                "unsupported invocation type '{}'",
                request.kind
            )));
        }

        let credential = request
            .credential()
            .ok_or_else(|| AuthorizerError::malformed_request("no credential field"))?;

        let token = bearer_token(credential)?;
        let decoded = decode_header(token)?;
        let jwk = self.resolver.resolve(&decoded.kid).await?;

        let claims = self
            .verifier
            .verify(token, &decoded.header, &jwk)
            .into_result()?;

        let subject = claims.subject().ok_or(AuthorizerError::MissingSubject)?;

        debug!(kid = %decoded.kid, resource = %request.resource, "Token verified");

        Ok(Decision::Allow {
            principal: Principal::new(subject),
            resource: request.resource.clone(),
        })
    }

    /// Like [`authorize`](Self::authorize), but any failure is logged and
    /// becomes [`Decision::Deny`]
    pub async fn authorize_or_deny(&self, request: &AuthorizerRequest) -> Decision {
        match self.authorize(request).await {
            Ok(decision) => decision,
            Err(error) => {
                log_denial(&error, &request.resource);
                Decision::Deny
            }
        }
    }
}

/// Emit the structured log line for a denied request
///
/// The token itself is never logged.
pub fn log_denial(error: &AuthorizerError, resource: &str) {
    warn!(
        error_kind = %error.kind(),
        reason = error.reason(),
        resource,
        error = %error,
        "Request denied"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{KeyResolutionError, VerificationFailure};
    use crate::jwt::jwks::parse_key_set;
    use async_trait::async_trait;
    use jsonwebtoken::jwk::Jwk;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    const TRUSTED_PEM: &str = include_str!("../tests/fixtures/trusted_rsa.pem");
    const JWKS: &str = include_str!("../tests/fixtures/jwks.json");
    const AUDIENCE: &str = "my-api";
    const ISSUER: &str = "https://tenant.auth0.com/";

    #[derive(Debug)]
    struct StaticSource;

    #[async_trait]
    impl KeySetSource for StaticSource {
        async fn fetch(&self) -> Result<Vec<Jwk>, KeyResolutionError> {
            parse_key_set(JWKS.as_bytes())
        }

        fn location(&self) -> &str {
            "static"
        }
    }

    fn authorizer() -> Authorizer {
        let config = AuthorizerConfig::new(
            "https://tenant.auth0.com/.well-known/jwks.json",
            AUDIENCE,
            ISSUER,
        )
        .unwrap();
        Authorizer::with_source(config, Arc::new(StaticSource)).unwrap()
    }

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn token(claims: serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("abc".to_string());
        encode(
            &header,
            &claims,
            &EncodingKey::from_rsa_pem(TRUSTED_PEM.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    fn request(token: &str) -> AuthorizerRequest {
        AuthorizerRequest::token("GET /customers", format!("Bearer {token}"))
    }

    #[tokio::test]
    async fn allows_valid_token() {
        let jwt = token(json!({
            "sub": "auth0|42", "aud": AUDIENCE, "iss": ISSUER, "exp": now() + 600
        }));

        let decision = authorizer().authorize(&request(&jwt)).await.unwrap();
        assert_eq!(
            decision,
            Decision::Allow {
                principal: Principal::new("auth0|42"),
                resource: "GET /customers".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn wrong_invocation_type() {
        let mut req = request("a.b.c");
        req.kind = "REQUEST".to_string();
        assert!(matches!(
            authorizer().authorize(&req).await,
            Err(AuthorizerError::MalformedRequest(_))
        ));
    }

    #[tokio::test]
    async fn missing_credential() {
        let req = AuthorizerRequest {
            kind: "TOKEN".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            authorizer().authorize(&req).await,
            Err(AuthorizerError::MalformedRequest(_))
        ));
    }

    #[tokio::test]
    async fn missing_subject() {
        let jwt = token(json!({ "aud": AUDIENCE, "iss": ISSUER, "exp": now() + 600 }));
        assert!(matches!(
            authorizer().authorize(&request(&jwt)).await,
            Err(AuthorizerError::MissingSubject)
        ));
    }

    #[tokio::test]
    async fn audience_mismatch_is_verification_failure() {
        let jwt = token(json!({
            "sub": "auth0|42", "aud": "someone-else", "iss": ISSUER, "exp": now() + 600
        }));
        let err = authorizer().authorize(&request(&jwt)).await.unwrap_err();
        assert!(matches!(
            err,
            AuthorizerError::VerificationFailed(VerificationFailure::AudienceMismatch)
        ));
    }

    #[tokio::test]
    async fn authorize_or_deny_swallows_errors() {
        let decision = authorizer()
            .authorize_or_deny(&AuthorizerRequest::token("GET /x", "Basic abc"))
            .await;
        assert_eq!(decision, Decision::Deny);
        assert!(decision.principal().is_none());
    }
}
