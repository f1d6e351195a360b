use subtle::ConstantTimeEq;

/// Header carrying the API key on protected routes.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing API key")]
    Missing,
    #[error("invalid API key")]
    Invalid,
}

/// Validates the provided API key against the key configured at startup.
///
/// Returns `Ok(())` if the key matches, or an error if it is missing or wrong.
pub fn validate_api_key(provided_key: Option<&str>, expected_key: &str) -> Result<(), AuthError> {
    let provided = provided_key
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(AuthError::Missing)?;

    if bool::from(provided.as_bytes().ct_eq(expected_key.as_bytes())) {
        Ok(())
    } else {
        Err(AuthError::Invalid)
    }
}
