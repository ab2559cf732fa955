//! Opaque token generation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

const TOKEN_ENTROPY_BYTES: usize = 32;

#[derive(Debug, Error)]
#[error("Failed to gather entropy: {0}")]
pub struct TokenError(#[from] getrandom::Error);

pub trait TokenGenerator: Send + Sync {
    fn generate_authorize_token(&self) -> Result<String, TokenError>;

    /// Returns the access token and, when requested, a refresh token.
    fn generate_access_token(
        &self,
        generate_refresh: bool,
    ) -> Result<(String, Option<String>), TokenError>;
}

/// Generates unpadded URL-safe base64 strings over 32 random bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate_authorize_token(&self) -> Result<String, TokenError> {
        random_token()
    }

    fn generate_access_token(
        &self,
        generate_refresh: bool,
    ) -> Result<(String, Option<String>), TokenError> {
        let access = random_token()?;
        let refresh = if generate_refresh {
            Some(random_token()?)
        } else {
            None
        };
        Ok((access, refresh))
    }
}

/// A fresh random token. Tokens never start with `-` so they cannot be
/// mistaken for a command line flag when pasted into a CLI.
pub fn random_token() -> Result<String, TokenError> {
    loop {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        getrandom::fill(&mut bytes)?;
        let token = URL_SAFE_NO_PAD.encode(bytes);
        if !token.starts_with('-') {
            return Ok(token);
        }
    }
}
