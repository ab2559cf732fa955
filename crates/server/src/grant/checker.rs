use std::sync::Arc;

use async_trait::async_trait;

use super::{Grant, GrantCheckError, GrantChecker};
use crate::error::StoreError;
use crate::model::{OAuthClientAuthorization, client_authorization_name};
use crate::retry::{Backoff, retry_on_conflict};
use crate::scope;
use crate::storage::ObjectStore;
use crate::user::UserInfo;

/// Looks the grant up in the stored client authorizations.
pub struct ClientAuthorizationGrantChecker {
    authorizations: Arc<dyn ObjectStore<OAuthClientAuthorization>>,
}

impl ClientAuthorizationGrantChecker {
    pub fn new(authorizations: Arc<dyn ObjectStore<OAuthClientAuthorization>>) -> Self {
        Self { authorizations }
    }

    /// The authorization for `user`, or `None`. An authorization recorded for
    /// a previous incarnation of the user (different UID) is deleted, guarded
    /// by its own UID so a concurrent re-approval is never removed.
    async fn current_authorization(
        &self,
        name: &str,
        user: &UserInfo,
    ) -> Result<Option<OAuthClientAuthorization>, StoreError> {
        let authorization = match self.authorizations.get(name).await {
            Ok(authorization) => authorization,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        if authorization.user_uid == user.uid {
            return Ok(Some(authorization));
        }

        tracing::info!(
            authorization = %name,
            "deleting client authorization left over from a previous user with the same name"
        );
        match self
            .authorizations
            .delete(name, Some(&authorization.meta.uid))
            .await
        {
            Ok(()) => Ok(None),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl GrantChecker for ClientAuthorizationGrantChecker {
    async fn has_authorized_client(
        &self,
        user: &UserInfo,
        grant: &Grant,
    ) -> Result<bool, GrantCheckError> {
        if user.uid.is_empty() {
            return Err(GrantCheckError::EmptyUid);
        }
        let name = &client_authorization_name(&user.name, grant.client.id());
        let authorization = retry_on_conflict(Backoff::CONFLICT, || {
            self.current_authorization(name, user)
        })
        .await?;

        Ok(authorization
            .is_some_and(|auth| scope::covers(&auth.scopes, &scope::split(&grant.scope))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OAuthClient;
    use crate::oauth2::request::Client;
    use crate::storage::MemoryStore;

    fn grant(scope: &str) -> Grant {
        Grant {
            client: Client::new(OAuthClient::new("console")),
            scope: scope.into(),
            expiration: 300,
            redirect_uri: "https://console.example.com/cb".into(),
        }
    }

    async fn store_with(auth: OAuthClientAuthorization) -> Arc<MemoryStore<OAuthClientAuthorization>> {
        let store = Arc::new(MemoryStore::new());
        store.create(auth).await.unwrap();
        store
    }

    #[tokio::test]
    async fn empty_uid_is_an_error() {
        let checker = ClientAuthorizationGrantChecker::new(Arc::new(MemoryStore::new()));
        let err = checker
            .has_authorized_client(&UserInfo::new("alice", ""), &grant("user:info"))
            .await
            .unwrap_err();
        assert!(matches!(err, GrantCheckError::EmptyUid));
    }

    #[tokio::test]
    async fn missing_authorization_is_not_authorized() {
        let checker = ClientAuthorizationGrantChecker::new(Arc::new(MemoryStore::new()));
        assert!(
            !checker
                .has_authorized_client(&UserInfo::new("alice", "1"), &grant("user:info"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn covered_scopes_are_authorized() {
        let store = store_with(OAuthClientAuthorization::new(
            "alice",
            "1",
            "console",
            vec!["user:info".into(), "user:check-access".into()],
        ))
        .await;
        let checker = ClientAuthorizationGrantChecker::new(store);
        let alice = UserInfo::new("alice", "1");

        assert!(checker.has_authorized_client(&alice, &grant("user:info")).await.unwrap());
        assert!(
            !checker
                .has_authorized_client(&alice, &grant("user:info user:full"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn stale_uid_authorization_is_deleted() {
        let store = store_with(OAuthClientAuthorization::new(
            "alice",
            "old-uid",
            "console",
            vec!["user:info".into()],
        ))
        .await;
        let checker = ClientAuthorizationGrantChecker::new(store.clone());

        let authorized = checker
            .has_authorized_client(&UserInfo::new("alice", "new-uid"), &grant("user:info"))
            .await
            .unwrap();
        assert!(!authorized);
        assert!(store.get("alice:console").await.unwrap_err().is_not_found());
    }
}
