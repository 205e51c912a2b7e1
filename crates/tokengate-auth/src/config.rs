//! Authorizer configuration
//!
//! Built once at process start, validated, then handed to
//! [`Authorizer::new`](crate::Authorizer::new). Nothing here is re-read per
//! request.

use std::time::Duration;

use jsonwebtoken::Algorithm;
use url::Url;

use crate::error::ConfigError;

/// Invocation type of a token-based authorizer request
pub const TOKEN_INVOCATION_TYPE: &str = "TOKEN";

/// Asymmetric algorithms that may be placed in the allow-list
pub const ASYMMETRIC_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Immutable configuration for an [`Authorizer`](crate::Authorizer)
#[derive(Debug, Clone)]
pub struct AuthorizerConfig {
    /// Key-set endpoint
    pub jwks_uri: Url,
    /// Expected `aud` claim
    pub audience: String,
    /// Expected `iss` claim
    pub issuer: String,
    /// Expected request `type`
    pub invocation_type: String,
    /// Accepted signature algorithms (asymmetric only)
    pub allowed_algorithms: Vec<Algorithm>,
    /// How long a resolved key stays cached
    pub cache_ttl: Duration,
    /// Upper bound on cached keys
    pub max_cached_keys: usize,
    /// Outbound fetch budget per `jwks_rate_window`
    pub jwks_requests_per_window: u32,
    /// Window for `jwks_requests_per_window`
    pub jwks_rate_window: Duration,
    /// Upper bound on a single key-set fetch
    pub fetch_timeout: Duration,
    /// Clock skew tolerated on `exp`/`nbf`
    pub leeway: Duration,
}

impl AuthorizerConfig {
    /// Create a configuration with default tuning
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any value is empty, the URL does not parse, or
    /// the key-set endpoint is plain HTTP on a non-loopback host.
    pub fn new(
        jwks_uri: &str,
        audience: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            jwks_uri: parse_jwks_uri(jwks_uri)?,
            audience: audience.into(),
            issuer: issuer.into(),
            invocation_type: TOKEN_INVOCATION_TYPE.to_string(),
            allowed_algorithms: vec![Algorithm::RS256],
            cache_ttl: Duration::from_secs(600),
            max_cached_keys: 32,
            jwks_requests_per_window: 10,
            jwks_rate_window: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(5),
            leeway: Duration::ZERO,
        };
        config.validate()?;
        Ok(config)
    }

    /// Derive the key-set endpoint and issuer from an Auth0 tenant domain
    ///
    /// `tenant.auth0.com` yields `https://tenant.auth0.com/.well-known/jwks.json`
    /// and issuer `https://tenant.auth0.com/`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the domain or audience is empty.
    pub fn for_auth0_domain(domain: &str, audience: impl Into<String>) -> Result<Self, ConfigError> {
        let domain = domain
            .trim()
            .trim_start_matches("https://")
            .trim_end_matches('/');
        if domain.is_empty() {
            return Err(ConfigError::Missing("domain"));
        }
        Self::new(
            &format!("https://{domain}/.well-known/jwks.json"),
            audience,
            format!("https://{domain}/"),
        )
    }

    /// Replace the algorithm allow-list
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAlgorithms`] if the list is empty or holds
    /// a symmetric algorithm.
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Result<Self, ConfigError> {
        self.allowed_algorithms = algorithms;
        self.validate()?;
        Ok(self)
    }

    /// Set the key cache TTL
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the key cache bound
    #[must_use]
    pub fn with_max_cached_keys(mut self, max: usize) -> Self {
        self.max_cached_keys = max;
        self
    }

    /// Set the outbound fetch budget
    #[must_use]
    pub fn with_rate_limit(mut self, requests: u32, window: Duration) -> Self {
        self.jwks_requests_per_window = requests;
        self.jwks_rate_window = window;
        self
    }

    /// Set the per-fetch timeout
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the clock skew tolerance
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Set the expected request type
    #[must_use]
    pub fn with_invocation_type(mut self, invocation_type: impl Into<String>) -> Self {
        self.invocation_type = invocation_type.into();
        self
    }

    /// Check every invariant
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audience.trim().is_empty() {
            return Err(ConfigError::Missing("audience"));
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Missing("issuer"));
        }
        if self.invocation_type.trim().is_empty() {
            return Err(ConfigError::Missing("invocation_type"));
        }
        check_scheme(&self.jwks_uri)?;

        if self.allowed_algorithms.is_empty() {
            return Err(ConfigError::InvalidAlgorithms(
                "at least one algorithm is required".to_string(),
            ));
        }
        if let Some(alg) = self
            .allowed_algorithms
            .iter()
            .find(|alg| !ASYMMETRIC_ALGORITHMS.contains(alg))
        {
            return Err(ConfigError::InvalidAlgorithms(format!(
                "{alg:?} is not an asymmetric algorithm"
            )));
        }

        if self.max_cached_keys == 0 {
            return Err(ConfigError::OutOfRange {
                name: "max_cached_keys",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.jwks_requests_per_window == 0 {
            return Err(ConfigError::OutOfRange {
                name: "jwks_requests_per_window",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                name: "fetch_timeout",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_jwks_uri(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::Missing("jwks_uri"));
    }
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        name: "jwks_uri",
        reason: e.to_string(),
    })?;
    check_scheme(&url)?;
    Ok(url)
}

fn check_scheme(url: &Url) -> Result<(), ConfigError> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(url) => Ok(()),
        _ => Err(ConfigError::InsecureScheme("jwks_uri")),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(d)) => d == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
