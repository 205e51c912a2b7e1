//! Gateway-facing authorizer response
//!
//! The IAM-style policy document an API gateway expects back from a custom
//! authorizer:
//!
//! ```json
//! {
//!   "principalId": "auth0|123",
//!   "policyDocument": {
//!     "Version": "2012-10-17",
//!     "Statement": [{ "Action": "execute-api:Invoke", "Effect": "Allow", "Resource": "..." }]
//!   },
//!   "context": { "sub": "auth0|123" }
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::authorizer::Decision;

/// Policy language version
pub const POLICY_VERSION: &str = "2012-10-17";

/// The only action an authorizer grants
pub const INVOKE_ACTION: &str = "execute-api:Invoke";

/// Principal reported for denied requests
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

/// Statement effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Permit the action
    Allow,
    /// Refuse the action
    Deny,
}

/// One policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Granted action
    pub action: String,
    /// Allow or deny
    pub effect: Effect,
    /// Resource the statement covers
    pub resource: String,
}

/// Policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy language version
    pub version: String,
    /// Statements
    pub statement: Vec<Statement>,
}

/// Full authorizer response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResponse {
    /// Identity the gateway attributes the call to
    pub principal_id: String,
    /// What the principal may do
    pub policy_document: PolicyDocument,
    /// Values forwarded to the backend
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

impl PolicyResponse {
    fn new(principal_id: String, effect: Effect, resource: String) -> Self {
        Self {
            principal_id,
            policy_document: PolicyDocument {
                version: POLICY_VERSION.to_string(),
                statement: vec![Statement {
                    action: INVOKE_ACTION.to_string(),
                    effect,
                    resource,
                }],
            },
            context: HashMap::new(),
        }
    }

    /// Translate a decision
    ///
    /// `requested` is used for denials, which carry no resource of their own.
    pub fn from_decision(decision: &Decision, requested: &str) -> Self {
        match decision {
            Decision::Allow { principal, resource } => {
                let mut response =
                    Self::new(principal.to_string(), Effect::Allow, resource.clone());
                response
                    .context
                    .insert("sub".to_string(), principal.to_string());
                response
            }
            Decision::Deny => Self::new(
                ANONYMOUS_PRINCIPAL.to_string(),
                Effect::Deny,
                requested.to_string(),
            ),
        }
    }

    /// The effect of the first statement
    pub fn effect(&self) -> Option<Effect> {
        self.policy_document.statement.first().map(|s| s.effect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::Principal;
    use serde_json::json;

    const ARN: &str = "arn:aws:execute-api:us-east-1:123456789012:abc/prod/GET/customers";

    #[test]
    fn allow_serializes_to_gateway_shape() {
        let decision = Decision::Allow {
            principal: Principal::new("auth0|42"),
            resource: ARN.to_string(),
        };
        let value = serde_json::to_value(PolicyResponse::from_decision(&decision, ARN)).unwrap();

        assert_eq!(
            value,
            json!({
                "principalId": "auth0|42",
                "policyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Action": "execute-api:Invoke",
                        "Effect": "Allow",
                        "Resource": ARN
                    }]
                },
                "context": { "sub": "auth0|42" }
            })
        );
    }

    #[test]
    fn deny_has_no_context() {
        let response = PolicyResponse::from_decision(&Decision::Deny, ARN);
        assert_eq!(response.effect(), Some(Effect::Deny));
        assert_eq!(response.principal_id, ANONYMOUS_PRINCIPAL);

        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("context").is_none());
    }
}
