//! Command-line and environment configuration
//!
//! Every option can come from a flag or its environment variable. The
//! authorizer settings are required: the server refuses to start if the
//! key-set endpoint, audience or issuer cannot be determined.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokengate_auth::{AuthorizerConfig, ConfigError};
use url::Url;

use crate::logging::LoggingConfig;

/// tokengate - bearer-token gateway for the customer API
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tokengate",
    version,
    about = "Bearer-token gateway: verifies identity-provider JWTs in front of a customer API",
    author
)]
pub struct ServerArgs {
    /// Published key-set URL of the identity provider
    #[arg(long, env = "JWKS_URI")]
    pub jwks_uri: Option<String>,

    /// Expected `aud` claim
    #[arg(long, env = "AUTH_AUDIENCE")]
    pub audience: Option<String>,

    /// Expected `iss` claim
    #[arg(long, env = "AUTH_ISSUER")]
    pub issuer: Option<String>,

    /// Auth0 tenant domain; derives the key-set URL and issuer when they are not given
    #[arg(long, env = "AUTH0_DOMAIN")]
    pub auth0_domain: Option<String>,

    /// Address to listen on
    #[arg(long, env = "API_BIND", default_value = "0.0.0.0:3001")]
    pub bind: SocketAddr,

    /// Frontend origin allowed by CORS
    #[arg(long, env = "SERVICE_URL", default_value = "http://localhost:3000")]
    pub allowed_origin: String,

    /// Key-set fetches allowed per minute
    #[arg(long, default_value_t = 10)]
    pub jwks_requests_per_minute: u32,

    /// How long a fetched key stays cached
    #[arg(long, default_value_t = 600)]
    pub jwks_cache_ttl_secs: u64,

    /// Key-set fetch timeout
    #[arg(long, default_value_t = 5000)]
    pub jwks_timeout_ms: u64,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

/// Validated server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,
    /// CORS origin
    pub allowed_origin: String,
    /// Authorizer settings
    pub authorizer: AuthorizerConfig,
}

impl ServerArgs {
    /// Logging settings implied by the flags
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig::from_verbosity(self.verbose, self.quiet, self.log_json)
    }

    /// Validate and build the server configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required value is missing or any value is
    /// invalid.
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let audience = non_empty(self.audience).ok_or(ConfigError::Missing("audience"))?;
        let jwks_uri = non_empty(self.jwks_uri);
        let issuer = non_empty(self.issuer);

        let mut authorizer = match (jwks_uri, non_empty(self.auth0_domain)) {
            (Some(jwks_uri), domain) => {
                let issuer = match (issuer.clone(), domain) {
                    (Some(issuer), _) => issuer,
                    (None, Some(domain)) => {
                        AuthorizerConfig::for_auth0_domain(&domain, audience.clone())?.issuer
                    }
                    (None, None) => return Err(ConfigError::Missing("issuer")),
                };
                AuthorizerConfig::new(&jwks_uri, audience, issuer)?
            }
            (None, Some(domain)) => AuthorizerConfig::for_auth0_domain(&domain, audience)?,
            (None, None) => return Err(ConfigError::Missing("jwks_uri")),
        };
        if let Some(issuer) = issuer {
            authorizer.issuer = issuer;
        }

        let authorizer = authorizer
            .with_rate_limit(self.jwks_requests_per_minute, Duration::from_secs(60))
            .with_cache_ttl(Duration::from_secs(self.jwks_cache_ttl_secs))
            .with_fetch_timeout(Duration::from_millis(self.jwks_timeout_ms));
        authorizer.validate()?;

        Url::parse(&self.allowed_origin).map_err(|e| ConfigError::InvalidUrl {
            name: "allowed_origin",
            reason: e.to_string(),
        })?;

        Ok(ServerConfig {
            bind: self.bind,
            allowed_origin: self.allowed_origin.trim_end_matches('/').to_string(),
            authorizer,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
