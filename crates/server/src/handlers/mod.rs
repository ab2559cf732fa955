//! Pluggable steps of the authorize and token flows.
//!
//! The engine runs every [`AuthorizeHandler`] in order until one of them
//! produces a response or an error. A handler that lets the flow continue
//! may mark the request authorized and attach the user.

use async_trait::async_trait;
use axum::response::Response;

use crate::context::RequestContext;
use crate::error::{AuthError, ProtocolError};
use crate::oauth2::request::{AccessRequest, AuthorizeRequest};

pub mod access;
pub mod authenticator;
pub mod errorpage;
pub mod finalizer;
pub mod grant;
pub mod unauthenticated;

pub use access::{
    AccessAuthenticator, AssertionAuthenticator, ClientCredentialsAuthenticator, DenyAssertion,
    DenyClientCredentials,
};
pub use authenticator::{
    AuthenticationErrorHandler, AuthenticationHandler, AuthorizeAuthenticator, Challenger,
    Redirector,
};
pub use errorpage::ErrorPageHandler;
pub use finalizer::SessionFinalizer;
pub use grant::{
    AutoGrant, DenyGrant, GrantCheck, GrantDecision, GrantHandler, PerClientGrant, RedirectGrant,
};
pub use unauthenticated::{
    BasicAuthChallenger, IDP_PARAM, LoginRedirector, PlaceholderChallenger,
    UnionAuthenticationHandler,
};

#[derive(Debug)]
pub enum Outcome {
    /// Let the next handler run.
    Continue,
    /// The handler wrote the response (a redirect, a form, a challenge).
    Handled(Response),
    /// Stop and report this error back to the client.
    Error(ProtocolError),
}

#[async_trait]
pub trait AuthorizeHandler: Send + Sync {
    async fn handle_authorize(&self, ar: &mut AuthorizeRequest, ctx: &mut RequestContext)
    -> Outcome;
}

#[async_trait]
pub trait AccessHandler: Send + Sync {
    async fn handle_access(&self, ar: &mut AccessRequest) -> Result<(), AuthError>;
}
