//! Consent enforcement: the second link of the authorize chain.

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;

use super::{AuthorizeHandler, Outcome};
use crate::context::RequestContext;
use crate::error::{AuthError, ErrorCode, ProtocolError};
use crate::grant::{Grant, GrantChecker};
use crate::model::GrantMethod;
use crate::oauth2::request::AuthorizeRequest;
use crate::response::found;
use crate::scope::{self, ScopeRegistry, validate_scope_restrictions};
use crate::user::UserInfo;

/// What a [`GrantHandler`] decided about a grant the user has not yet
/// approved.
#[derive(Debug)]
pub enum GrantDecision {
    Approved,
    Denied,
    /// The handler wrote a response, usually a redirect to the consent page.
    Handled(Response),
}

#[async_trait]
pub trait GrantHandler: Send + Sync {
    async fn handle_grant(
        &self,
        user: &UserInfo,
        grant: &Grant,
        ctx: &mut RequestContext,
    ) -> Result<GrantDecision, AuthError>;
}

/// Checks the requested scopes and makes sure the user approved them for
/// this client.
pub struct GrantCheck {
    checker: Arc<dyn GrantChecker>,
    handler: Arc<dyn GrantHandler>,
    registry: Arc<ScopeRegistry>,
}

impl GrantCheck {
    pub fn new(
        checker: Arc<dyn GrantChecker>,
        handler: Arc<dyn GrantHandler>,
        registry: Arc<ScopeRegistry>,
    ) -> Self {
        Self {
            checker,
            handler,
            registry,
        }
    }
}

#[async_trait]
impl AuthorizeHandler for GrantCheck {
    async fn handle_authorize(
        &self,
        ar: &mut AuthorizeRequest,
        ctx: &mut RequestContext,
    ) -> Outcome {
        if !ar.authorized {
            return Outcome::Continue;
        }

        if ar.scope.trim().is_empty() {
            ar.scope = scope::DEFAULT_SCOPE.to_owned();
        }
        let scopes = scope::split(&ar.scope);

        if let Err(errs) = self.registry.validate_scopes(&scopes) {
            return Outcome::Error(ProtocolError::new(
                ErrorCode::InvalidScope,
                errs.to_string(),
            ));
        }
        if let Err(err) = validate_scope_restrictions(ar.client.record(), &scopes) {
            return Outcome::Error(ProtocolError::access_denied(format!("scope denied: {err}")));
        }

        let Some(user) = ar.user.clone() else {
            tracing::error!(client_id = %ar.client.id(), "grant check reached without a user");
            return Outcome::Error(ProtocolError::server_error());
        };
        let grant = Grant {
            client: ar.client.clone(),
            scope: ar.scope.clone(),
            expiration: ar.expiration,
            redirect_uri: ar.redirect_uri.clone(),
        };

        match self.checker.has_authorized_client(&user, &grant).await {
            Ok(true) => return Outcome::Continue,
            Ok(false) => {}
            Err(err) => {
                tracing::error!(user = %user.name, client_id = %grant.client.id(), error = %err, "unable to check client authorization");
                return Outcome::Error(ProtocolError::server_error());
            }
        }

        match self.handler.handle_grant(&user, &grant, ctx).await {
            Ok(GrantDecision::Approved) => {
                ar.authorized = true;
                Outcome::Continue
            }
            Ok(GrantDecision::Denied) => {
                tracing::info!(user = %user.name, client_id = %grant.client.id(), "grant denied");
                ar.authorized = false;
                Outcome::Continue
            }
            Ok(GrantDecision::Handled(response)) => Outcome::Handled(response),
            Err(err) => {
                tracing::error!(user = %user.name, error = %err, "grant handler failed");
                Outcome::Error(ProtocolError::server_error())
            }
        }
    }
}

/// Approves every grant without asking.
pub struct AutoGrant;

#[async_trait]
impl GrantHandler for AutoGrant {
    async fn handle_grant(
        &self,
        _: &UserInfo,
        _: &Grant,
        _: &mut RequestContext,
    ) -> Result<GrantDecision, AuthError> {
        Ok(GrantDecision::Approved)
    }
}

/// Rejects every grant not already approved.
pub struct DenyGrant;

#[async_trait]
impl GrantHandler for DenyGrant {
    async fn handle_grant(
        &self,
        _: &UserInfo,
        _: &Grant,
        _: &mut RequestContext,
    ) -> Result<GrantDecision, AuthError> {
        Ok(GrantDecision::Denied)
    }
}

/// Sends the browser to the consent page, which returns to the current
/// authorize URL once the user decides. A return carrying `error` means the
/// user declined.
pub struct RedirectGrant {
    url: String,
}

impl RedirectGrant {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl GrantHandler for RedirectGrant {
    async fn handle_grant(
        &self,
        _: &UserInfo,
        grant: &Grant,
        ctx: &mut RequestContext,
    ) -> Result<GrantDecision, AuthError> {
        // The consent page sends a declining user back with `error` set.
        if ctx.query_param("error").is_some_and(|e| !e.is_empty()) {
            return Ok(GrantDecision::Denied);
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("then", &ctx.server_relative_url())
            .append_pair("client_id", grant.client.id())
            .append_pair("scope", &grant.scope)
            .append_pair("redirect_uri", &grant.redirect_uri)
            .finish();
        Ok(GrantDecision::Handled(found(&format!("{}?{}", self.url, query))))
    }
}

/// Picks a handler from the client's grant method, falling back to the
/// server default.
pub struct PerClientGrant {
    auto: Arc<dyn GrantHandler>,
    prompt: Arc<dyn GrantHandler>,
    deny: Arc<dyn GrantHandler>,
    default_method: GrantMethod,
}

impl PerClientGrant {
    pub fn new(prompt: Arc<dyn GrantHandler>, default_method: GrantMethod) -> Self {
        Self {
            auto: Arc::new(AutoGrant),
            prompt,
            deny: Arc::new(DenyGrant),
            default_method,
        }
    }
}

#[async_trait]
impl GrantHandler for PerClientGrant {
    async fn handle_grant(
        &self,
        user: &UserInfo,
        grant: &Grant,
        ctx: &mut RequestContext,
    ) -> Result<GrantDecision, AuthError> {
        let method = grant
            .client
            .record()
            .grant_method
            .unwrap_or(self.default_method);
        let handler = match method {
            GrantMethod::Auto => &self.auto,
            GrantMethod::Prompt => &self.prompt,
            GrantMethod::Deny => &self.deny,
        };
        handler.handle_grant(user, grant, ctx).await
    }
}
