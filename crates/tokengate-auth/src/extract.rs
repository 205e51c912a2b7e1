//! Bearer credential extraction

use crate::error::AuthorizerError;

const BEARER_PREFIX: &str = "Bearer ";

/// Pull the token out of a `Bearer <token>` credential
///
/// The token must be non-empty and consist only of base64url characters and
/// dots. The token's content is not inspected.
///
/// # Errors
///
/// Returns [`AuthorizerError::InvalidCredentialFormat`] on any mismatch.
pub fn bearer_token(credential: &str) -> Result<&str, AuthorizerError> {
    let token = credential
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthorizerError::InvalidCredentialFormat)?;

    if token.is_empty() || !token.bytes().all(is_token_byte) {
        return Err(AuthorizerError::InvalidCredentialFormat);
    }
    Ok(token)
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.')
}
