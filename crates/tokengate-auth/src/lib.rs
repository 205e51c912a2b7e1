//! # tokengate-auth - Bearer Token Authorizer
//!
//! Decides whether a request carrying `Authorization: Bearer <jwt>` may
//! proceed, against an identity provider that publishes its signing keys as a
//! JSON Web Key Set (Auth0 and friends).
//!
//! ## Pipeline
//!
//! ```text
//! AuthorizerRequest
//!   ─► request shape      (type == TOKEN, credential present)
//!   ─► bearer extraction  (Bearer <[-0-9a-zA-Z._]+>)
//!   ─► structural decode  (three segments, header with kid)
//!   ─► key resolution     (per-kid cache, single flight, rate limit, timeout)
//!   ─► verification       (alg allow-list, signature, exp, aud, iss)
//!   ─► subject            (non-empty sub)
//!   ─► Decision::Allow { principal, resource }
//! ```
//!
//! Any stage failing ends the attempt with an [`AuthorizerError`] whose
//! [`kind`](AuthorizerError::kind) tells operators what went wrong. Callers
//! facing clients should collapse all of them into one generic denial.
//!
//! ## Architecture
//!
//! - [`authorizer`] - the orchestrating [`Authorizer`]
//! - [`config`] - immutable [`AuthorizerConfig`]
//! - [`request`] - the inbound [`AuthorizerRequest`] record
//! - [`extract`] - bearer credential extraction
//! - [`jwt`] - header decoding, key resolution and verification
//! - [`policy`] - gateway-facing [`PolicyResponse`]
//! - [`rate_limit`] - sliding-window limiter for key-set fetches
//! - `tower` - Tower layer (feature `tower`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokengate_auth::{Authorizer, AuthorizerConfig, AuthorizerRequest, Decision};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthorizerConfig::for_auth0_domain("tenant.auth0.com", "https://api.example.com")?;
//! let authorizer = Authorizer::new(config)?;
//!
//! let request = AuthorizerRequest::token("GET /customers", "Bearer eyJhbGciOi...");
//! match authorizer.authorize(&request).await {
//!     Ok(Decision::Allow { principal, .. }) => println!("hello {principal}"),
//!     Ok(Decision::Deny) | Err(_) => println!("Unauthorized"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `tower` - [`tower::AuthorizerLayer`] for HTTP services

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod authorizer;
pub mod config;
pub mod error;
pub mod extract;
pub mod jwt;
pub mod policy;
pub mod rate_limit;
pub mod request;

#[cfg(feature = "tower")]
#[cfg_attr(docsrs, doc(cfg(feature = "tower")))]
pub mod tower;

pub use authorizer::{Authorizer, Decision, Principal};
pub use config::{AuthorizerConfig, TOKEN_INVOCATION_TYPE};
pub use error::{
    AuthorizerError, AuthorizerErrorKind, AuthorizerResult, ConfigError, KeyResolutionError,
    VerificationFailure,
};
pub use jwt::{TokenHeader, VerificationResult, VerifiedClaims};
pub use policy::{Effect, PolicyResponse};
pub use rate_limit::{FetchRateLimiter, RateLimitInfo};
pub use request::AuthorizerRequest;
