//! Error types for the token authorizer
//!
//! Every failure of a single authorization attempt is terminal. The variants
//! exist so operators can tell issuer misconfiguration, forged or expired
//! tokens, and key-set outages apart in logs; callers facing the outside world
//! must collapse all of them into one generic denial.
//!
//! Display strings never contain the raw token or key material.

use std::time::Duration;

use thiserror::Error;

use crate::rate_limit::RateLimitInfo;

/// Result type for authorizer operations
pub type AuthorizerResult<T> = Result<T, AuthorizerError>;

/// Failure of a single `authorize` call
#[derive(Debug, Error)]
pub enum AuthorizerError {
    /// The request does not look like an authorizer invocation
    #[error("malformed authorizer request: {0}")]
    MalformedRequest(String),

    /// The credential field is not `Bearer <token>`
    #[error("credential does not match `Bearer <token>`")]
    InvalidCredentialFormat,

    /// The token is not a structurally valid JWT with a key identifier
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// No signing key could be obtained for the token's key identifier
    #[error("signing key resolution failed: {0}")]
    KeyResolutionFailed(#[from] KeyResolutionError),

    /// Signature, algorithm, or registered claims did not check out
    #[error("token verification failed: {0}")]
    VerificationFailed(#[from] VerificationFailure),

    /// The verified payload has no usable subject
    #[error("verified token carries no subject")]
    MissingSubject,
}

/// Stable, low-cardinality label for an [`AuthorizerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorizerErrorKind {
    /// See [`AuthorizerError::MalformedRequest`]
    MalformedRequest,
    /// See [`AuthorizerError::InvalidCredentialFormat`]
    InvalidCredentialFormat,
    /// See [`AuthorizerError::InvalidToken`]
    InvalidToken,
    /// See [`AuthorizerError::KeyResolutionFailed`]
    KeyResolutionFailed,
    /// See [`AuthorizerError::VerificationFailed`]
    VerificationFailed,
    /// See [`AuthorizerError::MissingSubject`]
    MissingSubject,
}

impl AuthorizerErrorKind {
    /// Label used in structured log fields
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedRequest => "malformed_request",
            Self::InvalidCredentialFormat => "invalid_credential_format",
            Self::InvalidToken => "invalid_token",
            Self::KeyResolutionFailed => "key_resolution_failed",
            Self::VerificationFailed => "verification_failed",
            Self::MissingSubject => "missing_subject",
        }
    }
}

impl std::fmt::Display for AuthorizerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthorizerError {
    /// Create a malformed request error
    #[must_use]
    pub fn malformed_request(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    /// Create an invalid token error
    #[must_use]
    pub fn invalid_token(msg: impl Into<String>) -> Self {
        Self::InvalidToken(msg.into())
    }

    /// The kind of this error, for logging
    pub fn kind(&self) -> AuthorizerErrorKind {
        match self {
            Self::MalformedRequest(_) => AuthorizerErrorKind::MalformedRequest,
            Self::InvalidCredentialFormat => AuthorizerErrorKind::InvalidCredentialFormat,
            Self::InvalidToken(_) => AuthorizerErrorKind::InvalidToken,
            Self::KeyResolutionFailed(_) => AuthorizerErrorKind::KeyResolutionFailed,
            Self::VerificationFailed(_) => AuthorizerErrorKind::VerificationFailed,
            Self::MissingSubject => AuthorizerErrorKind::MissingSubject,
        }
    }

    /// Finer-grained reason, for logging
    pub fn reason(&self) -> &'static str {
        match self {
            Self::KeyResolutionFailed(e) => e.reason(),
            Self::VerificationFailed(f) => f.reason(),
            other => other.kind().as_str(),
        }
    }
}

/// Why a signing key could not be resolved
#[derive(Debug, Clone, Error)]
pub enum KeyResolutionError {
    /// Transport-level failure talking to the key-set endpoint
    #[error("key-set endpoint unreachable: {0}")]
    Unreachable(String),

    /// The fetch did not complete in time
    #[error("key-set fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint answered with a non-success status
    #[error("key-set endpoint returned HTTP {0}")]
    Status(u16),

    /// The endpoint's body is not a key-set document
    #[error("invalid key-set document: {0}")]
    InvalidDocument(String),

    /// The key set has no key with this identifier
    #[error("no key with id `{0}` in key set")]
    UnknownKeyId(String),

    /// The key exists but cannot verify signatures
    #[error("key `{kid}` is not usable for signature verification: {reason}")]
    UnusableKey {
        /// Key identifier
        kid: String,
        /// What is wrong with it
        reason: String,
    },

    /// Outbound fetch budget exhausted
    #[error("key-set fetch rate limited: {0}")]
    RateLimited(RateLimitInfo),
}

impl KeyResolutionError {
    /// Label used in structured log fields
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "jwks_unreachable",
            Self::Timeout(_) => "jwks_timeout",
            Self::Status(_) => "jwks_http_status",
            Self::InvalidDocument(_) => "jwks_invalid_document",
            Self::UnknownKeyId(_) => "unknown_kid",
            Self::UnusableKey { .. } => "unusable_key",
            Self::RateLimited(_) => "jwks_rate_limited",
        }
    }
}

/// Why cryptographic or claim verification failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    /// The header's `alg` is not in the asymmetric allow-list
    #[error("algorithm `{0}` is not allowed")]
    DisallowedAlgorithm(String),

    /// The resolved key cannot be used with the declared algorithm
    #[error("key type does not match algorithm `{0}`")]
    KeyMismatch(String),

    /// Signature does not verify against the resolved key
    #[error("signature is invalid")]
    InvalidSignature,

    /// `exp` is not in the future
    #[error("token has expired")]
    Expired,

    /// `nbf` is in the future
    #[error("token is not valid yet")]
    NotYetValid,

    /// `aud` does not contain the expected audience
    #[error("audience does not match")]
    AudienceMismatch,

    /// `iss` is not the expected issuer
    #[error("issuer does not match")]
    IssuerMismatch,

    /// A required registered claim is absent
    #[error("required claim `{0}` is missing")]
    MissingClaim(String),

    /// The payload could not be decoded
    #[error("claims are malformed: {0}")]
    MalformedClaims(String),
}

impl VerificationFailure {
    /// Label used in structured log fields
    pub fn reason(&self) -> &'static str {
        match self {
            Self::DisallowedAlgorithm(_) => "disallowed_algorithm",
            Self::KeyMismatch(_) => "key_mismatch",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::AudienceMismatch => "audience_mismatch",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::MissingClaim(_) => "missing_claim",
            Self::MalformedClaims(_) => "malformed_claims",
        }
    }
}

/// Startup configuration problems
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required option was not provided
    #[error("missing required configuration value `{0}`")]
    Missing(&'static str),

    /// A URL option could not be parsed
    #[error("invalid URL for `{name}`: {reason}")]
    InvalidUrl {
        /// Option name
        name: &'static str,
        /// Parse error
        reason: String,
    },

    /// Plain HTTP to a non-loopback host
    #[error("`{0}` must use https (http is only accepted for loopback hosts)")]
    InsecureScheme(&'static str),

    /// The algorithm allow-list is empty or names a non-asymmetric algorithm
    #[error("invalid algorithm allow-list: {0}")]
    InvalidAlgorithms(String),

    /// A numeric option is out of range
    #[error("invalid value for `{name}`: {reason}")]
    OutOfRange {
        /// Option name
        name: &'static str,
        /// What is wrong
        reason: String,
    },

    /// The key-set HTTP client could not be built
    #[error("failed to build key-set HTTP client: {0}")]
    HttpClient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(
            AuthorizerError::InvalidCredentialFormat.kind(),
            AuthorizerErrorKind::InvalidCredentialFormat
        );
        assert_eq!(
            AuthorizerError::from(VerificationFailure::Expired).kind(),
            AuthorizerErrorKind::VerificationFailed
        );
        assert_eq!(
            AuthorizerError::from(KeyResolutionError::Status(503)).kind(),
            AuthorizerErrorKind::KeyResolutionFailed
        );
    }

    #[test]
    fn reasons_are_specific() {
        let err = AuthorizerError::from(VerificationFailure::IssuerMismatch);
        assert_eq!(err.reason(), "issuer_mismatch");

        let err = AuthorizerError::from(KeyResolutionError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.reason(), "jwks_timeout");

        assert_eq!(AuthorizerError::MissingSubject.reason(), "missing_subject");
    }

    #[test]
    fn display_does_not_echo_credentials() {
        let err = AuthorizerError::InvalidCredentialFormat;
        assert_eq!(err.to_string(), "credential does not match `Bearer <token>`");
    }
}
