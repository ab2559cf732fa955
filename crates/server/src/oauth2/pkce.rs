//! Proof Key for Code Exchange (RFC 7636).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    Plain,
    S256,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::Plain => "plain",
            CodeChallengeMethod::S256 => "S256",
        }
    }

    /// An absent or empty method means `plain`.
    pub fn parse(method: Option<&str>) -> Result<Self, ProtocolError> {
        match method.unwrap_or_default() {
            "" | "plain" => Ok(CodeChallengeMethod::Plain),
            "S256" => Ok(CodeChallengeMethod::S256),
            _ => Err(ProtocolError::invalid_request(
                "code_challenge_method transform algorithm not supported (rfc7636)",
            )),
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Challenges and verifiers share the same alphabet and length bounds:
/// 43 to 128 characters of `[A-Za-z0-9._~-]`.
pub fn is_valid_code(value: &str) -> bool {
    (43..=128).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'~' | b'-'))
}

pub fn verify(method: CodeChallengeMethod, challenge: &str, verifier: &str) -> bool {
    let computed = match method {
        CodeChallengeMethod::Plain => verifier.to_owned(),
        CodeChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
    };
    computed.as_bytes().ct_eq(challenge.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Appendix B of RFC 7636.
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn s256_matches_rfc_vector() {
        assert!(verify(CodeChallengeMethod::S256, CHALLENGE, VERIFIER));
        assert!(!verify(CodeChallengeMethod::S256, CHALLENGE, "x".repeat(43).as_str()));
    }

    #[test]
    fn plain_compares_directly() {
        assert!(verify(CodeChallengeMethod::Plain, VERIFIER, VERIFIER));
        assert!(!verify(CodeChallengeMethod::Plain, CHALLENGE, VERIFIER));
    }

    #[test]
    fn method_defaults_to_plain() {
        assert_eq!(CodeChallengeMethod::parse(None).unwrap(), CodeChallengeMethod::Plain);
        assert_eq!(CodeChallengeMethod::parse(Some("")).unwrap(), CodeChallengeMethod::Plain);
        assert_eq!(
            CodeChallengeMethod::parse(Some("S256")).unwrap(),
            CodeChallengeMethod::S256
        );
        assert!(CodeChallengeMethod::parse(Some("s256")).is_err());
    }

    #[test]
    fn code_format() {
        assert!(is_valid_code(VERIFIER));
        assert!(!is_valid_code("short"));
        assert!(!is_valid_code(&"a".repeat(129)));
        assert!(!is_valid_code(&format!("{}+", "a".repeat(43))));
    }
}
