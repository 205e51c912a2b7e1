//! Authorizer request record
//!
//! The shape a gateway hands to the authorizer. It mirrors a Lambda-style
//! authorizer event: a `type`, the target resource, and either a dedicated
//! `authorizationToken` field (token authorizers) or a header map (request
//! authorizers).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::TOKEN_INVOCATION_TYPE;

/// Inbound authorization request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerRequest {
    /// Invocation type, e.g. `TOKEN`
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Resource the decision applies to
    #[serde(rename = "methodArn", alias = "resource", default)]
    pub resource: String,

    /// Credential for token authorizers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_token: Option<String>,

    /// Request headers for request authorizers
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl AuthorizerRequest {
    /// A `TOKEN` request carrying `credential` for `resource`
    pub fn token(resource: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            kind: TOKEN_INVOCATION_TYPE.to_string(),
            resource: resource.into(),
            authorization_token: Some(credential.into()),
            headers: HashMap::new(),
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The credential-carrying field
    ///
    /// The dedicated token field wins; otherwise the `Authorization` header.
    pub fn credential(&self) -> Option<&str> {
        self.authorization_token
            .as_deref()
            .or_else(|| self.header("authorization"))
    }
}
