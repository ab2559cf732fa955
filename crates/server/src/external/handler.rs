use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;

use super::{CsrfRedirectingState, Provider, TokenData, request_error};
use crate::authn::IdentityMapper;
use crate::context::RequestContext;
use crate::error::{AuthError, ProtocolError, ProviderError};
use crate::handlers::{AuthenticationErrorHandler, Redirector};
use crate::response::{found, json_error};
use crate::scope;
use crate::session::SessionAuthenticator;
use crate::user::UserInfo;

/// Sends browsers to an external identity provider and completes the login
/// when they come back.
pub struct ExternalOAuthHandler {
    provider_name: String,
    provider: Arc<dyn Provider>,
    state: CsrfRedirectingState,
    callback_url: String,
    mapper: Arc<dyn IdentityMapper>,
    session: Arc<SessionAuthenticator>,
    errors: Arc<dyn AuthenticationErrorHandler>,
    http: reqwest::Client,
    timeout: Duration,
}

impl ExternalOAuthHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider_name: impl Into<String>,
        provider: Arc<dyn Provider>,
        state: CsrfRedirectingState,
        callback_url: impl Into<String>,
        mapper: Arc<dyn IdentityMapper>,
        session: Arc<SessionAuthenticator>,
        errors: Arc<dyn AuthenticationErrorHandler>,
        http: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            provider,
            state,
            callback_url: callback_url.into(),
            mapper,
            session,
            errors,
            http,
            timeout,
        }
    }

    /// The provider's authorize URL for a browser that should return to
    /// `then` afterwards.
    pub fn authorize_url(&self, ctx: &mut RequestContext, then: &str) -> Result<String, AuthError> {
        let config = self.provider.client_config();
        let state = self.state.generate(ctx, then)?;
        let mut params = vec![
            ("response_type".to_owned(), "code".to_owned()),
            ("client_id".to_owned(), config.client_id),
            ("redirect_uri".to_owned(), self.callback_url.clone()),
            ("scope".to_owned(), scope::join(&config.scopes)),
            ("state".to_owned(), state),
        ];
        self.provider.add_custom_parameters(&mut params);

        let mut url = url::Url::parse(&config.authorize_url)
            .map_err(|e| AuthError::Backend(format!("invalid authorize URL: {e}")))?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url.into())
    }

    #[tracing::instrument(skip_all, fields(provider = %self.provider_name))]
    pub async fn handle_callback(&self, mut ctx: RequestContext) -> Response {
        match self.complete_login(&mut ctx).await {
            Ok(then) => {
                let response = found(&then);
                ctx.finish(response)
            }
            Err(err) => {
                tracing::warn!(error = %err, "external login failed");
                let response = match self.errors.authentication_error(&err, &mut ctx) {
                    Some(response) => response,
                    None => json_error(&ProtocolError::server_error()),
                };
                ctx.finish(response)
            }
        }
    }

    async fn complete_login(&self, ctx: &mut RequestContext) -> Result<String, AuthError> {
        let state = ctx.query_param("state").unwrap_or_default();
        let then = self.state.check(ctx, &state)?;

        if let Some(error) = ctx.query_param("error").filter(|e| !e.is_empty()) {
            return Err(ProviderError::Denied {
                error,
                description: ctx.query_param("error_description"),
            }
            .into());
        }
        let code = ctx
            .query_param("code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::Claims("callback is missing the code".into()))?;

        let token = self.exchange_code(&code).await?;
        let identity = self.provider.get_user_identity(&token).await?;
        let user: UserInfo = self.mapper.user_for(&identity).await?;

        self.session
            .authentication_succeeded(&user, ctx)
            .map_err(|e| AuthError::Session(e.to_string()))?;
        tracing::info!(user = %user.name, identity = %identity.key(), "external login succeeded");
        Ok(then)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenData, ProviderError> {
        let config = self.provider.client_config();
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.callback_url.as_str()),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(&config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                context: format!("token exchange failed: {body}"),
            });
        }
        let token: TokenData = response
            .json()
            .await
            .map_err(|e| request_error(e, self.timeout))?;
        if token.access_token.is_empty() {
            return Err(ProviderError::Claims("token response has no access_token".into()));
        }
        Ok(token)
    }
}

#[async_trait]
impl Redirector for ExternalOAuthHandler {
    async fn authentication_redirect(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<Response, AuthError> {
        let then = ctx.server_relative_url();
        let target = self.authorize_url(ctx, &then)?;
        tracing::debug!(provider = %self.provider_name, "redirecting to identity provider");
        Ok(found(&target))
    }
}
