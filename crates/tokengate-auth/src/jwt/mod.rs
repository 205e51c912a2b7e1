//! JWT handling for the authorizer
//!
//! ```text
//! credential ─► decode_header ─► KeyResolver::resolve ─► TokenVerifier::verify
//!                 (structure)       (jwks cache)            (signature + claims)
//! ```
//!
//! - `jwks` - key-set fetching and the per-kid key cache
//! - `validator` - signature and claim verification

pub mod jwks;
pub mod validator;

pub use jwks::{HttpKeySetSource, KeyResolver, KeySetSource};
pub use validator::{TokenVerifier, VerificationResult};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::AuthorizerError;

/// The JOSE header fields the authorizer needs
///
/// `alg` stays a string here: an unknown or `none` algorithm is a
/// verification failure, not a structural one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Declared signature algorithm
    #[serde(default)]
    pub alg: String,
    /// Key identifier
    #[serde(default)]
    pub kid: Option<String>,
    /// Token type
    #[serde(default)]
    pub typ: Option<String>,
}

/// A structurally valid token: three segments and a header with a key id
#[derive(Debug, Clone)]
pub struct DecodedHeader {
    /// Parsed header
    pub header: TokenHeader,
    /// Non-empty key identifier taken from the header
    pub kid: String,
}

/// Split a compact JWT and decode its header, without verifying anything
///
/// # Errors
///
/// Returns [`AuthorizerError::InvalidToken`] if the token does not have three
/// segments, the header is not base64url JSON, or `kid` is absent or empty.
pub fn decode_header(token: &str) -> Result<DecodedHeader, AuthorizerError> {
    let mut segments = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AuthorizerError::invalid_token("expected three segments"));
    };

    if header_b64.is_empty() || payload_b64.is_empty() {
        return Err(AuthorizerError::invalid_token("empty header or payload segment"));
    }

    let raw = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| AuthorizerError::invalid_token(format!("header is not base64url: {e}")))?;

    let header: TokenHeader = serde_json::from_slice(&raw)
        .map_err(|e| AuthorizerError::invalid_token(format!("header is not a JSON object: {e}")))?;

    let kid = match header.kid.as_deref().map(str::trim) {
        Some(kid) if !kid.is_empty() => kid.to_string(),
        _ => return Err(AuthorizerError::invalid_token("header has no kid")),
    };

    Ok(DecodedHeader { header, kid })
}

/// `aud` may be a single string or an array of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// Single audience
    One(String),
    /// Several audiences
    Many(Vec<String>),
}

impl Audience {
    /// Whether `expected` is among the audiences
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Self::One(aud) => aud == expected,
            Self::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

/// Payload of a token whose signature and registered claims have been checked
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    /// Subject (principal identifier)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Expiration time (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    /// Issued at (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Not before (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Space-separated scopes granted to the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Everything else
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl VerifiedClaims {
    /// The subject, if present and non-empty
    pub fn subject(&self) -> Option<&str> {
        self.sub.as_deref().filter(|s| !s.trim().is_empty())
    }
}
