//! Password based authenticators.
//!
//! Hashes use Argon2id in PHC string format.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;

use super::{IdentityMapper, PasswordAuthenticator, ProviderIdentity};
use crate::error::AuthError;
use crate::user::UserInfo;

/// Hash a password using Argon2id.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash. Malformed hashes never match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Argon2 is deliberately slow, so verification runs off the async workers.
pub async fn verify_password_blocking(password: &str, hash: &str) -> Result<bool, AuthError> {
    let (password, hash) = (password.to_owned(), hash.to_owned());
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AuthError::Backend(format!("password verification task failed: {e}")))
}

/// Accepts any non-empty username and password.
pub struct AllowAllPasswordAuthenticator {
    provider_name: String,
    mapper: Arc<dyn IdentityMapper>,
}

impl AllowAllPasswordAuthenticator {
    pub fn new(provider_name: impl Into<String>, mapper: Arc<dyn IdentityMapper>) -> Self {
        Self {
            provider_name: provider_name.into(),
            mapper,
        }
    }
}

#[async_trait]
impl PasswordAuthenticator for AllowAllPasswordAuthenticator {
    async fn authenticate_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserInfo>, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Ok(None);
        }
        let identity = ProviderIdentity::new(&self.provider_name, username);
        self.mapper.user_for(&identity).await.map(Some)
    }
}

pub struct DenyAllPasswordAuthenticator;

#[async_trait]
impl PasswordAuthenticator for DenyAllPasswordAuthenticator {
    async fn authenticate_password(
        &self,
        _username: &str,
        _password: &str,
    ) -> Result<Option<UserInfo>, AuthError> {
        Ok(None)
    }
}

/// Checks credentials against a `user:hash` file loaded at startup.
pub struct HtpasswdAuthenticator {
    provider_name: String,
    users: HashMap<String, String>,
    mapper: Arc<dyn IdentityMapper>,
}

impl HtpasswdAuthenticator {
    pub fn new(
        provider_name: impl Into<String>,
        users: HashMap<String, String>,
        mapper: Arc<dyn IdentityMapper>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            users,
            mapper,
        }
    }

    pub fn load(
        provider_name: impl Into<String>,
        path: &Path,
        mapper: Arc<dyn IdentityMapper>,
    ) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::new(provider_name, parse_htpasswd(&contents), mapper))
    }
}

/// Parses `user:hash` lines, skipping blanks and `#` comments.
pub fn parse_htpasswd(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(user, hash)| (user.to_owned(), hash.to_owned()))
        .collect()
}

#[async_trait]
impl PasswordAuthenticator for HtpasswdAuthenticator {
    async fn authenticate_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserInfo>, AuthError> {
        let Some(hash) = self.users.get(username) else {
            return Ok(None);
        };
        if !verify_password_blocking(password, hash).await? {
            return Ok(None);
        }
        let identity = ProviderIdentity::new(&self.provider_name, username);
        self.mapper.user_for(&identity).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::ClaimIdentityMapper;

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password("my-secure-password-123!").expect("Failed to hash password");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("my-secure-password-123!", &hash));
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn test_verify_invalid_hash_format() {
        assert!(!verify_password("password", "not-a-valid-hash"));
        assert!(!verify_password("password", ""));
    }

    #[test]
    fn htpasswd_parsing_skips_comments() {
        let users = parse_htpasswd("# users\nalice:$argon2id$x\n\nbob:$argon2id$y\nbroken\n");
        assert_eq!(users.len(), 2);
        assert_eq!(users["alice"], "$argon2id$x");
    }

    #[tokio::test]
    async fn htpasswd_authenticates_known_users() {
        let mut users = HashMap::new();
        users.insert("alice".to_owned(), hash_password("wonderland").unwrap());
        let auth = HtpasswdAuthenticator::new("htpasswd", users, Arc::new(ClaimIdentityMapper::new()));

        let user = auth.authenticate_password("alice", "wonderland").await.unwrap();
        assert_eq!(user.unwrap().name, "alice");
        assert!(auth.authenticate_password("alice", "nope").await.unwrap().is_none());
        assert!(auth.authenticate_password("mallory", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn allow_all_requires_both_fields() {
        let auth = AllowAllPasswordAuthenticator::new("anypassword", Arc::new(ClaimIdentityMapper::new()));
        assert!(auth.authenticate_password("", "pw").await.unwrap().is_none());
        assert!(auth.authenticate_password("bob", "").await.unwrap().is_none());
        assert_eq!(
            auth.authenticate_password("bob", "pw").await.unwrap().unwrap().name,
            "bob"
        );
    }
}
