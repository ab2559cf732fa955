//! Browser sessions, CSRF tokens and the bootstrap user.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::authn::RequestAuthenticator;
use crate::context::RequestContext;
use crate::error::AuthError;
use crate::user::UserInfo;

pub mod bootstrap;
pub mod csrf;
pub mod store;

pub use bootstrap::{BOOTSTRAP_USER, BootstrapPasswordAuthenticator, BootstrapUserDataGetter};
pub use csrf::CookieCsrf;
pub use store::{CookieSessionStore, SessionError, SessionSecrets, SessionValues};

/// Authenticates requests from the session cookie and records successful
/// logins into it.
pub struct SessionAuthenticator {
    store: CookieSessionStore,
    max_age_seconds: i64,
    bootstrap: Option<Arc<BootstrapUserDataGetter>>,
    bootstrap_max_age_seconds: i64,
}

impl SessionAuthenticator {
    pub fn new(store: CookieSessionStore, max_age_seconds: i64) -> Self {
        Self {
            store,
            max_age_seconds,
            bootstrap: None,
            bootstrap_max_age_seconds: max_age_seconds,
        }
    }

    pub fn with_bootstrap(
        mut self,
        getter: Arc<BootstrapUserDataGetter>,
        bootstrap_max_age_seconds: i64,
    ) -> Self {
        self.bootstrap = Some(getter);
        self.bootstrap_max_age_seconds = bootstrap_max_age_seconds;
        self
    }

    pub fn authentication_succeeded(
        &self,
        user: &UserInfo,
        ctx: &mut RequestContext,
    ) -> Result<(), SessionError> {
        let max_age = if user.name == BOOTSTRAP_USER {
            self.bootstrap_max_age_seconds
        } else {
            self.max_age_seconds
        };
        let values = SessionValues {
            user_name: user.name.clone(),
            user_uid: user.uid.clone(),
            expires: OffsetDateTime::now_utc().unix_timestamp().saturating_add(max_age),
        };
        tracing::debug!(user = %user.name, max_age, "recording session");
        self.store.save(ctx, &values)
    }

    pub fn invalidate_authentication(&self, ctx: &mut RequestContext) {
        self.store.clear(ctx);
    }
}

#[async_trait]
impl RequestAuthenticator for SessionAuthenticator {
    async fn authenticate_request(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<UserInfo>, AuthError> {
        let values = self.store.load(&ctx.jar);
        if values.user_name.is_empty() || values.user_uid.is_empty() {
            return Ok(None);
        }
        if values.expires <= OffsetDateTime::now_utc().unix_timestamp() {
            tracing::debug!(user = %values.user_name, "session expired");
            return Ok(None);
        }

        if values.user_name == BOOTSTRAP_USER {
            let Some(getter) = &self.bootstrap else {
                return Ok(None);
            };
            match getter.get().await? {
                Some(data) if data.uid == values.user_uid => {}
                _ => {
                    tracing::info!("bootstrap user session no longer valid");
                    return Ok(None);
                }
            }
        }

        Ok(Some(UserInfo::new(values.user_name, values.user_uid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::password::hash_password;
    use axum::http::{HeaderMap, Method};
    use axum_extra::extract::cookie::CookieJar;

    fn ctx(jar: CookieJar) -> RequestContext {
        RequestContext::new(Method::GET, "/".parse().unwrap(), HeaderMap::new(), jar)
    }

    fn store() -> CookieSessionStore {
        CookieSessionStore::new("ssn", SessionSecrets::new(vec![vec![3u8; 32]]).unwrap(), false)
    }

    #[tokio::test]
    async fn session_roundtrip() {
        let auth = SessionAuthenticator::new(store(), 300);
        let mut login = ctx(CookieJar::new());
        auth.authentication_succeeded(&UserInfo::new("alice", "uid-1"), &mut login)
            .unwrap();

        let next = ctx(login.jar.clone());
        let user = auth.authenticate_request(&next).await.unwrap().unwrap();
        assert_eq!(user, UserInfo::new("alice", "uid-1"));

        let mut logout = ctx(login.jar);
        auth.invalidate_authentication(&mut logout);
        let after = ctx(logout.jar);
        assert!(auth.authenticate_request(&after).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_sessions_are_ignored() {
        let auth = SessionAuthenticator::new(store(), -1);
        let mut login = ctx(CookieJar::new());
        auth.authentication_succeeded(&UserInfo::new("alice", "uid-1"), &mut login)
            .unwrap();
        assert!(auth.authenticate_request(&ctx(login.jar)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bootstrap_session_dies_with_password_change() {
        let path = std::env::temp_dir().join(format!("kubeadmin-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, hash_password("first").unwrap()).await.unwrap();
        let getter = Arc::new(BootstrapUserDataGetter::new(&path));
        let auth = SessionAuthenticator::new(store(), 300).with_bootstrap(getter.clone(), 3600);

        let data = getter.get().await.unwrap().unwrap();
        let mut login = ctx(CookieJar::new());
        auth.authentication_succeeded(&UserInfo::new(BOOTSTRAP_USER, data.uid), &mut login)
            .unwrap();
        assert!(
            auth.authenticate_request(&ctx(login.jar.clone()))
                .await
                .unwrap()
                .is_some()
        );

        tokio::fs::write(&path, hash_password("second").unwrap()).await.unwrap();
        assert!(auth.authenticate_request(&ctx(login.jar)).await.unwrap().is_none());
        let _ = tokio::fs::remove_file(&path).await;
    }
}
