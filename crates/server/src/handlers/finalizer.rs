use std::sync::Arc;

use crate::context::RequestContext;
use crate::session::SessionAuthenticator;

/// Last step of an authorize request that was not handed off to another
/// page: the login session only bridges login, consent and authorize, so it
/// is dropped here.
pub struct SessionFinalizer {
    session: Option<Arc<SessionAuthenticator>>,
}

impl SessionFinalizer {
    pub fn new(session: Option<Arc<SessionAuthenticator>>) -> Self {
        Self { session }
    }

    pub fn finish(&self, ctx: &mut RequestContext) {
        if let Some(session) = &self.session {
            session.invalidate_authentication(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::RequestAuthenticator;
    use crate::session::{CookieSessionStore, SessionSecrets};
    use crate::user::UserInfo;
    use axum::http::{HeaderMap, Method};
    use axum_extra::extract::cookie::CookieJar;

    #[tokio::test]
    async fn finish_clears_the_session() {
        let store =
            CookieSessionStore::new("ssn", SessionSecrets::new(vec![vec![9u8; 32]]).unwrap(), false);
        let session = Arc::new(SessionAuthenticator::new(store, 300));
        let mut ctx = RequestContext::new(
            Method::GET,
            "/oauth/authorize".parse().unwrap(),
            HeaderMap::new(),
            CookieJar::new(),
        );
        session
            .authentication_succeeded(&UserInfo::new("alice", "uid-1"), &mut ctx)
            .unwrap();
        assert!(session.authenticate_request(&ctx).await.unwrap().is_some());

        SessionFinalizer::new(Some(session.clone())).finish(&mut ctx);
        assert!(session.authenticate_request(&ctx).await.unwrap().is_none());
    }
}
