//! Authenticators: turning a request, a password or an external identity
//! into a [`UserInfo`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::AuthError;
use crate::user::UserInfo;

pub mod basic;
pub mod header;
pub mod identity;
pub mod password;

pub use basic::BasicAuthRequestAuthenticator;
pub use header::RequestHeaderAuthenticator;
pub use identity::{ClaimIdentityMapper, IdentityMapper, ProviderIdentity};
pub use password::{
    AllowAllPasswordAuthenticator, DenyAllPasswordAuthenticator, HtpasswdAuthenticator,
};

/// Resolves the principal behind an incoming request, if any.
#[async_trait]
pub trait RequestAuthenticator: Send + Sync {
    async fn authenticate_request(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<UserInfo>, AuthError>;
}

#[async_trait]
pub trait PasswordAuthenticator: Send + Sync {
    async fn authenticate_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserInfo>, AuthError>;
}

/// Tries each authenticator in order. The first principal found wins; errors
/// are only reported when nobody succeeded.
pub struct UnionRequestAuthenticator {
    authenticators: Vec<Arc<dyn RequestAuthenticator>>,
}

impl UnionRequestAuthenticator {
    pub fn new(authenticators: Vec<Arc<dyn RequestAuthenticator>>) -> Self {
        Self { authenticators }
    }
}

#[async_trait]
impl RequestAuthenticator for UnionRequestAuthenticator {
    async fn authenticate_request(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<UserInfo>, AuthError> {
        let mut last_error = None;
        for authenticator in &self.authenticators {
            match authenticator.authenticate_request(ctx).await {
                Ok(Some(user)) => return Ok(Some(user)),
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(error = %err, "request authenticator failed");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

pub struct UnionPasswordAuthenticator {
    authenticators: Vec<Arc<dyn PasswordAuthenticator>>,
}

impl UnionPasswordAuthenticator {
    pub fn new(authenticators: Vec<Arc<dyn PasswordAuthenticator>>) -> Self {
        Self { authenticators }
    }
}

#[async_trait]
impl PasswordAuthenticator for UnionPasswordAuthenticator {
    async fn authenticate_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserInfo>, AuthError> {
        let mut last_error = None;
        for authenticator in &self.authenticators {
            match authenticator.authenticate_password(username, password).await {
                Ok(Some(user)) => return Ok(Some(user)),
                Ok(None) => {}
                Err(err) => last_error = Some(err),
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<Option<UserInfo>, &'static str>);

    #[async_trait]
    impl PasswordAuthenticator for Fixed {
        async fn authenticate_password(
            &self,
            _username: &str,
            _password: &str,
        ) -> Result<Option<UserInfo>, AuthError> {
            self.0.clone().map_err(|e| AuthError::Backend(e.into()))
        }
    }

    #[tokio::test]
    async fn first_success_wins_over_errors() {
        let union = UnionPasswordAuthenticator::new(vec![
            Arc::new(Fixed(Err("ldap down"))),
            Arc::new(Fixed(Ok(None))),
            Arc::new(Fixed(Ok(Some(UserInfo::new("alice", "1"))))),
        ]);
        let user = union.authenticate_password("alice", "pw").await.unwrap();
        assert_eq!(user.unwrap().name, "alice");
    }

    #[tokio::test]
    async fn errors_surface_when_nobody_succeeds() {
        let union = UnionPasswordAuthenticator::new(vec![
            Arc::new(Fixed(Ok(None))),
            Arc::new(Fixed(Err("ldap down"))),
        ]);
        assert!(union.authenticate_password("alice", "pw").await.is_err());

        let empty = UnionPasswordAuthenticator::new(vec![Arc::new(Fixed(Ok(None)))]);
        assert!(empty.authenticate_password("a", "b").await.unwrap().is_none());
    }
}
