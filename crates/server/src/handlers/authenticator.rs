use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::response::Response;

use super::{AuthorizeHandler, Outcome};
use crate::authn::RequestAuthenticator;
use crate::context::RequestContext;
use crate::error::{AuthError, ProtocolError};
use crate::oauth2::request::{AuthorizeRequest, Client};

/// Decides what to do with a request that carries no usable identity.
#[async_trait]
pub trait AuthenticationHandler: Send + Sync {
    /// `Ok(None)` leaves the request unauthenticated, which ends the flow
    /// with `access_denied`.
    async fn authentication_needed(
        &self,
        client: &Client,
        ctx: &mut RequestContext,
    ) -> Result<Option<Response>, AuthError>;
}

/// Turns an authentication failure into a response, when it knows how.
pub trait AuthenticationErrorHandler: Send + Sync {
    fn authentication_error(&self, err: &AuthError, ctx: &mut RequestContext) -> Option<Response>;
}

/// Sends a browser somewhere to log in.
#[async_trait]
pub trait Redirector: Send + Sync {
    async fn authentication_redirect(&self, ctx: &mut RequestContext)
    -> Result<Response, AuthError>;
}

/// Produces `WWW-Authenticate` style headers for non-browser clients.
pub trait Challenger: Send + Sync {
    fn authentication_challenge(&self, ctx: &RequestContext) -> Result<HeaderMap, AuthError>;
}

/// First link of the authorize chain: establishes who is asking.
pub struct AuthorizeAuthenticator {
    request: Arc<dyn RequestAuthenticator>,
    handler: Arc<dyn AuthenticationHandler>,
    errors: Arc<dyn AuthenticationErrorHandler>,
}

impl AuthorizeAuthenticator {
    pub fn new(
        request: Arc<dyn RequestAuthenticator>,
        handler: Arc<dyn AuthenticationHandler>,
        errors: Arc<dyn AuthenticationErrorHandler>,
    ) -> Self {
        Self {
            request,
            handler,
            errors,
        }
    }

    fn handle_error(&self, err: AuthError, ctx: &mut RequestContext) -> Outcome {
        tracing::debug!(error = %err, "OAuth authentication error");
        match self.errors.authentication_error(&err, ctx) {
            Some(response) => Outcome::Handled(response),
            None => Outcome::Error(ProtocolError::server_error()),
        }
    }
}

#[async_trait]
impl AuthorizeHandler for AuthorizeAuthenticator {
    async fn handle_authorize(
        &self,
        ar: &mut AuthorizeRequest,
        ctx: &mut RequestContext,
    ) -> Outcome {
        match self.request.authenticate_request(ctx).await {
            Ok(Some(user)) => {
                tracing::debug!(user = %user.name, "OAuth authentication succeeded");
                ar.user = Some(user);
                ar.authorized = true;
                Outcome::Continue
            }
            Ok(None) => match self.handler.authentication_needed(&ar.client, ctx).await {
                Ok(Some(response)) => Outcome::Handled(response),
                Ok(None) => Outcome::Continue,
                Err(err) => self.handle_error(err, ctx),
            },
            Err(err) => self.handle_error(err, ctx),
        }
    }
}
