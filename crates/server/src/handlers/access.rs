//! Token endpoint authorization by grant type.

use std::sync::Arc;

use async_trait::async_trait;

use super::AccessHandler;
use crate::authn::PasswordAuthenticator;
use crate::error::AuthError;
use crate::oauth2::request::{AccessRequest, Client, GrantType};
use crate::user::UserInfo;

/// Authenticates a `grant_type=assertion` request.
#[async_trait]
pub trait AssertionAuthenticator: Send + Sync {
    async fn authenticate_assertion(
        &self,
        assertion_type: &str,
        assertion: &str,
    ) -> Result<Option<UserInfo>, AuthError>;
}

/// Authenticates a `grant_type=client_credentials` request.
#[async_trait]
pub trait ClientCredentialsAuthenticator: Send + Sync {
    async fn authenticate_client(&self, client: &Client) -> Result<Option<UserInfo>, AuthError>;
}

pub struct DenyAssertion;

#[async_trait]
impl AssertionAuthenticator for DenyAssertion {
    async fn authenticate_assertion(
        &self,
        _: &str,
        _: &str,
    ) -> Result<Option<UserInfo>, AuthError> {
        Ok(None)
    }
}

pub struct DenyClientCredentials;

#[async_trait]
impl ClientCredentialsAuthenticator for DenyClientCredentials {
    async fn authenticate_client(&self, _: &Client) -> Result<Option<UserInfo>, AuthError> {
        Ok(None)
    }
}

/// Code exchanges are authorized by the code itself; direct grants go to the
/// matching authenticator. Refresh tokens are never issued.
pub struct AccessAuthenticator {
    password: Arc<dyn PasswordAuthenticator>,
    assertion: Arc<dyn AssertionAuthenticator>,
    client: Arc<dyn ClientCredentialsAuthenticator>,
}

impl AccessAuthenticator {
    pub fn new(
        password: Arc<dyn PasswordAuthenticator>,
        assertion: Arc<dyn AssertionAuthenticator>,
        client: Arc<dyn ClientCredentialsAuthenticator>,
    ) -> Self {
        Self {
            password,
            assertion,
            client,
        }
    }
}

#[async_trait]
impl AccessHandler for AccessAuthenticator {
    async fn handle_access(&self, ar: &mut AccessRequest) -> Result<(), AuthError> {
        let user = match ar.grant_type {
            GrantType::AuthorizationCode | GrantType::RefreshToken => {
                ar.authorized = true;
                ar.generate_refresh = false;
                return Ok(());
            }
            GrantType::Password => {
                self.password
                    .authenticate_password(&ar.username, &ar.password)
                    .await?
            }
            GrantType::Assertion => {
                self.assertion
                    .authenticate_assertion(&ar.assertion_type, &ar.assertion)
                    .await?
            }
            GrantType::ClientCredentials => self.client.authenticate_client(&ar.client).await?,
        };

        match user {
            Some(user) => {
                tracing::debug!(grant_type = ar.grant_type.as_str(), user = %user.name, "direct grant authenticated");
                ar.authorized = true;
                ar.generate_refresh = false;
                ar.user = Some(user);
            }
            None => {
                tracing::debug!(grant_type = ar.grant_type.as_str(), "direct grant denied");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::DenyAllPasswordAuthenticator;
    use crate::model::OAuthClient;

    struct AcceptAll;

    #[async_trait]
    impl PasswordAuthenticator for AcceptAll {
        async fn authenticate_password(
            &self,
            username: &str,
            _: &str,
        ) -> Result<Option<UserInfo>, AuthError> {
            Ok(Some(UserInfo::new(username, "uid")))
        }
    }

    fn request(grant_type: GrantType) -> AccessRequest {
        let mut ar = AccessRequest::new(grant_type, Client::new(OAuthClient::new("cli")), 3600);
        ar.username = "alice".into();
        ar.password = "pw".into();
        ar
    }

    fn denying() -> AccessAuthenticator {
        AccessAuthenticator::new(
            Arc::new(DenyAllPasswordAuthenticator),
            Arc::new(DenyAssertion),
            Arc::new(DenyClientCredentials),
        )
    }

    #[tokio::test]
    async fn code_exchange_is_preauthorized() {
        let mut ar = request(GrantType::AuthorizationCode);
        ar.generate_refresh = true;
        denying().handle_access(&mut ar).await.unwrap();
        assert!(ar.authorized);
        assert!(!ar.generate_refresh);
    }

    #[tokio::test]
    async fn direct_grants_are_denied_by_default() {
        for grant_type in [
            GrantType::Password,
            GrantType::Assertion,
            GrantType::ClientCredentials,
        ] {
            let mut ar = request(grant_type);
            denying().handle_access(&mut ar).await.unwrap();
            assert!(!ar.authorized, "{grant_type:?} should be denied");
            assert!(ar.user.is_none());
        }
    }

    #[tokio::test]
    async fn wired_password_authenticator_sets_user() {
        let handler = AccessAuthenticator::new(
            Arc::new(AcceptAll),
            Arc::new(DenyAssertion),
            Arc::new(DenyClientCredentials),
        );
        let mut ar = request(GrantType::Password);
        handler.handle_access(&mut ar).await.unwrap();
        assert!(ar.authorized);
        assert_eq!(ar.user.unwrap().name, "alice");
    }
}
