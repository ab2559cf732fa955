//! Signed cookie session storage.
//!
//! The session values are serialized as base64url JSON and signed with the
//! `cookie` crate's signed jar. Each configured secret is expanded into a
//! [`Key`]. New cookies are signed with the first key and any key is accepted
//! on read so secrets can be rotated.

use std::path::Path;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use cookie::Key;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::RequestContext;
use crate::token::TokenError;

/// Shortest master secret `Key::derive_from` accepts.
const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session secret: {0}")]
    InvalidSecret(String),
    #[error("Failed to read session secrets: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Entropy(#[from] TokenError),
    #[error("Failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to sign session cookie")]
    Sign,
}

#[derive(Clone)]
pub struct SessionSecrets {
    keys: Vec<Key>,
}

impl SessionSecrets {
    pub fn new(secrets: Vec<Vec<u8>>) -> Result<Self, SessionError> {
        if secrets.is_empty() {
            return Err(SessionError::InvalidSecret("at least one secret is required".into()));
        }
        let keys = secrets
            .iter()
            .map(|secret| {
                if secret.len() < MIN_SECRET_BYTES {
                    return Err(SessionError::InvalidSecret(format!(
                        "secrets must be at least {MIN_SECRET_BYTES} bytes"
                    )));
                }
                Ok(Key::derive_from(secret))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { keys })
    }

    /// A single random secret. Sessions signed with it do not survive a restart.
    pub fn generate() -> Result<Self, SessionError> {
        let mut secret = vec![0u8; MIN_SECRET_BYTES];
        getrandom::fill(&mut secret).map_err(TokenError::from)?;
        Self::new(vec![secret])
    }

    /// Reads one standard-base64 secret per line; the first line signs.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let contents = std::fs::read_to_string(path)?;
        let secrets = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| {
                STANDARD
                    .decode(l)
                    .map_err(|e| SessionError::InvalidSecret(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(secrets)
    }

    /// Signs `cookie` with the first key, returning the cookie carrying the
    /// signed value.
    fn sign(&self, cookie: Cookie<'static>) -> Option<Cookie<'static>> {
        let key = self.keys.first()?;
        let name = cookie.name().to_owned();
        let mut jar = cookie::CookieJar::new();
        jar.signed_mut(key).add(cookie);
        jar.get(&name).cloned()
    }

    /// Returns the cookie with its verified plain value if any key signed it.
    fn verify(&self, cookie: &Cookie<'static>) -> Option<Cookie<'static>> {
        let jar = cookie::CookieJar::new();
        self.keys
            .iter()
            .find_map(|key| jar.signed(key).verify(cookie.clone()))
    }
}

/// Values kept in the session cookie. Empty fields mean "no session".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionValues {
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_uid: String,
    /// Unix timestamp after which the session is ignored.
    #[serde(default)]
    pub expires: i64,
}

#[derive(Clone)]
pub struct CookieSessionStore {
    name: String,
    secrets: SessionSecrets,
    secure: bool,
}

impl CookieSessionStore {
    pub fn new(name: impl Into<String>, secrets: SessionSecrets, secure: bool) -> Self {
        Self {
            name: name.into(),
            secrets,
            secure,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decodes and verifies the session cookie. Missing, tampered or
    /// undecodable cookies yield empty values.
    pub fn load(&self, jar: &CookieJar) -> SessionValues {
        let Some(cookie) = jar.get(&self.name) else {
            return SessionValues::default();
        };
        match self.decode(cookie) {
            Some(values) => values,
            None => {
                tracing::debug!(cookie = %self.name, "ignoring invalid session cookie");
                SessionValues::default()
            }
        }
    }

    fn decode(&self, cookie: &Cookie<'static>) -> Option<SessionValues> {
        let verified = self.secrets.verify(cookie)?;
        let json = URL_SAFE_NO_PAD.decode(verified.value()).ok()?;
        serde_json::from_slice(&json).ok()
    }

    pub fn save(&self, ctx: &mut RequestContext, values: &SessionValues) -> Result<(), SessionError> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(values)?);
        let cookie = Cookie::build((self.name.clone(), payload))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build();
        let signed = self.secrets.sign(cookie).ok_or(SessionError::Sign)?;
        ctx.add_cookie(signed);
        Ok(())
    }

    pub fn clear(&self, ctx: &mut RequestContext) {
        ctx.remove_cookie(Cookie::build((self.name.clone(), String::new())).path("/").build());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};

    fn ctx() -> RequestContext {
        RequestContext::new(Method::GET, "/".parse().unwrap(), HeaderMap::new(), CookieJar::new())
    }

    fn values() -> SessionValues {
        SessionValues {
            user_name: "alice".into(),
            user_uid: "uid-1".into(),
            expires: 4_102_444_800,
        }
    }

    #[test]
    fn save_then_load() {
        let store = CookieSessionStore::new("ssn", SessionSecrets::generate().unwrap(), true);
        let mut ctx = ctx();
        store.save(&mut ctx, &values()).unwrap();
        assert_eq!(store.load(&ctx.jar), values());
    }

    #[test]
    fn saved_cookie_does_not_carry_plain_values() {
        let store = CookieSessionStore::new("ssn", SessionSecrets::generate().unwrap(), true);
        let mut ctx = ctx();
        store.save(&mut ctx, &values()).unwrap();
        let cookie = ctx.jar.get("ssn").unwrap();
        let plain = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&values()).unwrap());
        assert_ne!(cookie.value(), plain);
        assert!(cookie.http_only().unwrap_or(false));
        assert_eq!(cookie.path(), Some("/"));
    }

    #[test]
    fn tampered_cookie_is_ignored() {
        let store = CookieSessionStore::new("ssn", SessionSecrets::generate().unwrap(), true);
        let mut ctx = ctx();
        store.save(&mut ctx, &values()).unwrap();
        let value = ctx.jar.get("ssn").unwrap().value().to_owned();
        let plain = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&values()).unwrap());
        let signature = value.strip_suffix(plain.as_str()).unwrap();

        // the signature of a real session spliced onto different values
        let forged = URL_SAFE_NO_PAD.encode(br#"{"user_name":"root","user_uid":"0","expires":4102444800}"#);
        let swapped = format!("{signature}{forged}");
        let jar = CookieJar::new().add(Cookie::new("ssn", swapped));
        assert_eq!(store.load(&jar), SessionValues::default());

        let jar = CookieJar::new().add(Cookie::new("ssn", forged));
        assert_eq!(store.load(&jar), SessionValues::default());
    }

    #[test]
    fn cookie_signed_with_another_secret_is_ignored() {
        let ours = CookieSessionStore::new("ssn", SessionSecrets::new(vec![vec![1u8; 32]]).unwrap(), true);
        let theirs = CookieSessionStore::new("ssn", SessionSecrets::new(vec![vec![2u8; 32]]).unwrap(), true);
        let mut ctx = ctx();
        theirs.save(&mut ctx, &values()).unwrap();
        assert_eq!(ours.load(&ctx.jar), SessionValues::default());
    }

    #[test]
    fn rotated_secret_still_verifies() {
        let old = vec![7u8; 32];
        let new = vec![9u8; 32];
        let before = CookieSessionStore::new("ssn", SessionSecrets::new(vec![old.clone()]).unwrap(), true);
        let after = CookieSessionStore::new("ssn", SessionSecrets::new(vec![new, old]).unwrap(), true);

        let mut ctx = ctx();
        before.save(&mut ctx, &values()).unwrap();
        assert_eq!(after.load(&ctx.jar), values());
    }

    #[test]
    fn short_secrets_are_rejected() {
        assert!(SessionSecrets::new(vec![vec![1u8; 8]]).is_err());
        assert!(SessionSecrets::new(vec![]).is_err());
    }
}
