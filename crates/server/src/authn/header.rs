use std::sync::Arc;

use async_trait::async_trait;

use super::{IdentityMapper, ProviderIdentity, RequestAuthenticator};
use crate::context::RequestContext;
use crate::error::AuthError;
use crate::user::UserInfo;

/// Trusts identity headers set by an authenticating front proxy.
pub struct RequestHeaderAuthenticator {
    provider_name: String,
    id_headers: Vec<String>,
    name_headers: Vec<String>,
    preferred_username_headers: Vec<String>,
    email_headers: Vec<String>,
    mapper: Arc<dyn IdentityMapper>,
}

impl RequestHeaderAuthenticator {
    pub fn new(
        provider_name: impl Into<String>,
        id_headers: Vec<String>,
        mapper: Arc<dyn IdentityMapper>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            id_headers,
            name_headers: Vec::new(),
            preferred_username_headers: Vec::new(),
            email_headers: Vec::new(),
            mapper,
        }
    }

    pub fn with_claim_headers(
        mut self,
        name_headers: Vec<String>,
        preferred_username_headers: Vec<String>,
        email_headers: Vec<String>,
    ) -> Self {
        self.name_headers = name_headers;
        self.preferred_username_headers = preferred_username_headers;
        self.email_headers = email_headers;
        self
    }
}

fn first_header(ctx: &RequestContext, names: &[String]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| ctx.header(name))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_owned)
}

#[async_trait]
impl RequestAuthenticator for RequestHeaderAuthenticator {
    async fn authenticate_request(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<UserInfo>, AuthError> {
        let Some(id) = first_header(ctx, &self.id_headers) else {
            return Ok(None);
        };
        let mut identity = ProviderIdentity::new(&self.provider_name, id);
        identity.display_name = first_header(ctx, &self.name_headers);
        identity.preferred_username = first_header(ctx, &self.preferred_username_headers);
        identity.email = first_header(ctx, &self.email_headers);
        self.mapper.user_for(&identity).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::ClaimIdentityMapper;
    use axum::http::{HeaderMap, Method};
    use axum_extra::extract::cookie::CookieJar;

    #[tokio::test]
    async fn reads_first_present_header() {
        let auth = RequestHeaderAuthenticator::new(
            "proxy",
            vec!["X-Remote-User".into(), "X-Forwarded-User".into()],
            Arc::new(ClaimIdentityMapper::new()),
        )
        .with_claim_headers(vec![], vec![], vec!["X-Remote-Email".into()]);

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-user", "carol".parse().unwrap());
        headers.insert("x-remote-email", "carol@example.com".parse().unwrap());
        let ctx = RequestContext::new(Method::GET, "/".parse().unwrap(), headers, CookieJar::new());

        let user = auth.authenticate_request(&ctx).await.unwrap().unwrap();
        assert_eq!(user.name, "carol");
        assert_eq!(user.email.as_deref(), Some("carol@example.com"));

        let anonymous =
            RequestContext::new(Method::GET, "/".parse().unwrap(), HeaderMap::new(), CookieJar::new());
        assert!(auth.authenticate_request(&anonymous).await.unwrap().is_none());
    }
}
