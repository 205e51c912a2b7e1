//! Signature and claim verification
//!
//! Checks, in order:
//! - the declared `alg` is in the asymmetric allow-list (never `none`, never `HS*`)
//! - the resolved key's type and declared algorithm agree with `alg`
//! - the signature
//! - `exp` strictly in the future, `nbf` not in the future (with leeway)
//! - `aud` contains the expected audience, `iss` equals the expected issuer

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use tracing::debug;

use super::{TokenHeader, VerifiedClaims};
use crate::config::AuthorizerConfig;
use crate::error::VerificationFailure;

/// Outcome of verifying one token against one key
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationResult {
    /// Signature and registered claims checked out
    Verified(VerifiedClaims),
    /// Something did not
    Failed(VerificationFailure),
}

impl VerificationResult {
    /// Whether verification succeeded
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }

    /// Convert into a `Result`
    ///
    /// # Errors
    ///
    /// Returns the [`VerificationFailure`] of a failed verification.
    pub fn into_result(self) -> Result<VerifiedClaims, VerificationFailure> {
        match self {
            Self::Verified(claims) => Ok(claims),
            Self::Failed(failure) => Err(failure),
        }
    }
}

/// Verifies tokens for one issuer/audience pair
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    expected_audience: String,
    expected_issuer: String,
    allowed_algorithms: Vec<Algorithm>,
    leeway_secs: u64,
}

impl TokenVerifier {
    /// Build from the authorizer configuration
    pub fn new(config: &AuthorizerConfig) -> Self {
        Self {
            expected_audience: config.audience.clone(),
            expected_issuer: config.issuer.clone(),
            allowed_algorithms: config.allowed_algorithms.clone(),
            leeway_secs: config.leeway.as_secs(),
        }
    }

    /// Verify `token` against `jwk`
    pub fn verify(&self, token: &str, header: &TokenHeader, jwk: &Jwk) -> VerificationResult {
        self.verify_at(token, header, jwk, unix_now())
    }

    fn verify_at(&self, token: &str, header: &TokenHeader, jwk: &Jwk, now: u64) -> VerificationResult {
        let algorithm = match Algorithm::from_str(&header.alg) {
            Ok(alg) if self.allowed_algorithms.contains(&alg) => alg,
            _ => {
                return VerificationResult::Failed(VerificationFailure::DisallowedAlgorithm(
                    header.alg.clone(),
                ));
            }
        };

        if !key_fits_algorithm(jwk, algorithm) {
            return VerificationResult::Failed(VerificationFailure::KeyMismatch(header.alg.clone()));
        }

        let key = match DecodingKey::from_jwk(jwk) {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "JWK could not be turned into a decoding key");
                return VerificationResult::Failed(VerificationFailure::KeyMismatch(
                    header.alg.clone(),
                ));
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_audience(&[&self.expected_audience]);
        validation.set_issuer(&[&self.expected_issuer]);
        validation.set_required_spec_claims(&["exp", "aud", "iss"]);

        let claims = match decode::<VerifiedClaims>(token, &key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                return VerificationResult::Failed(map_error_kind(e.kind(), &header.alg));
            }
        };

        // `exp` equal to now is already expired
        if let Some(exp) = claims.exp
            && exp.saturating_add(self.leeway_secs) <= now
        {
            return VerificationResult::Failed(VerificationFailure::Expired);
        }

        VerificationResult::Verified(claims)
    }
}

fn key_fits_algorithm(jwk: &Jwk, algorithm: Algorithm) -> bool {
    let family_matches = match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => matches!(
            algorithm,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ),
        AlgorithmParameters::EllipticCurve(_) => {
            matches!(algorithm, Algorithm::ES256 | Algorithm::ES384)
        }
        AlgorithmParameters::OctetKeyPair(_) => algorithm == Algorithm::EdDSA,
        // Symmetric keys never verify anything here
        _ => false,
    };

    family_matches && !declared_algorithm_conflicts(jwk, algorithm)
}

/// A key that pins `alg` may only verify that algorithm
fn declared_algorithm_conflicts(jwk: &Jwk, algorithm: Algorithm) -> bool {
    let Some(declared) = jwk.common.key_algorithm.as_ref() else {
        return false;
    };
    match (serde_json::to_value(declared), serde_json::to_value(algorithm)) {
        (Ok(declared), Ok(expected)) => declared != expected,
        _ => true,
    }
}

fn map_error_kind(kind: &ErrorKind, alg: &str) -> VerificationFailure {
    match kind {
        ErrorKind::InvalidSignature => VerificationFailure::InvalidSignature,
        ErrorKind::ExpiredSignature => VerificationFailure::Expired,
        ErrorKind::ImmatureSignature => VerificationFailure::NotYetValid,
        ErrorKind::InvalidAudience => VerificationFailure::AudienceMismatch,
        ErrorKind::InvalidIssuer => VerificationFailure::IssuerMismatch,
        ErrorKind::MissingRequiredClaim(claim) => VerificationFailure::MissingClaim(claim.clone()),
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidKeyFormat => {
            VerificationFailure::KeyMismatch(alg.to_string())
        }
        other => VerificationFailure::MalformedClaims(format!("{other:?}")),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
