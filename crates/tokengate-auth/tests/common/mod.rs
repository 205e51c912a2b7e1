//! Common test utilities for integration tests
//!
//! A wiremock-backed key-set endpoint plus helpers for minting tokens with the
//! fixture keys.

#![allow(dead_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use tokengate_auth::AuthorizerConfig;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const TRUSTED_PEM: &str = include_str!("../fixtures/trusted_rsa.pem");
pub const ROGUE_PEM: &str = include_str!("../fixtures/rogue_rsa.pem");
pub const JWKS: &str = include_str!("../fixtures/jwks.json");

pub const AUDIENCE: &str = "my-api";
pub const ISSUER: &str = "https://tenant.auth0.com/";
pub const SUBJECT: &str = "auth0|123";
pub const RESOURCE: &str = "arn:aws:execute-api:us-east-1:123456789012:abc/prod/GET/customers";

const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Mock key-set endpoint
pub struct MockJwksServer {
    pub server: MockServer,
    pub jwks_uri: String,
}

impl MockJwksServer {
    /// Start an endpoint with nothing mounted
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let jwks_uri = format!("{}{}", server.uri(), JWKS_PATH);
        Self { server, jwks_uri }
    }

    /// Start an endpoint serving the fixture key set, expecting exactly
    /// `fetches` requests before the server is dropped
    pub async fn serving_fixture(fetches: u64) -> Self {
        let mock = Self::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS, "application/json"))
            .expect(fetches)
            .mount(&mock.server)
            .await;
        mock
    }

    /// Serve `body` with `status`, optionally after `delay`
    pub async fn respond(&self, status: u16, body: Value, delay: Option<Duration>) {
        let mut template = ResponseTemplate::new(status).set_body_json(body);
        if let Some(delay) = delay {
            template = template.set_delay(delay);
        }
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    /// Authorizer configuration pointed at this endpoint
    pub fn config(&self) -> AuthorizerConfig {
        AuthorizerConfig::new(&self.jwks_uri, AUDIENCE, ISSUER).expect("valid test config")
    }
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs()
}

/// Claims that pass every check
pub fn valid_claims() -> Value {
    json!({
        "sub": SUBJECT,
        "aud": AUDIENCE,
        "iss": ISSUER,
        "iat": now(),
        "exp": now() + 3600,
    })
}

/// Sign `claims` with an RSA key from the fixtures
pub fn sign_rs256(pem: &str, kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("fixture PEM parses");
    encode(&header, claims, &key).expect("token encodes")
}

/// A token signed by the trusted key under `kid=abc`
pub fn trusted_token(claims: &Value) -> String {
    sign_rs256(TRUSTED_PEM, Some("abc"), claims)
}

/// `Authorization` header value for `token`
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
