//! Login through external OAuth2 / OpenID Connect identity providers.
//!
//! A [`Provider`] only knows how to talk to its identity provider. The
//! [`ExternalOAuthHandler`] drives the browser round trip around it: the
//! redirect out, the CSRF-bound state, the code exchange on the callback,
//! and handing the resulting identity to the mapper and the session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{OriginalUri, Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::authn::ProviderIdentity;
use crate::context::RequestContext;
use crate::error::ProviderError;

pub mod handler;
pub mod openid;
pub mod state;

pub use handler::ExternalOAuthHandler;
pub use openid::{OpenIdClaims, OpenIdConfig, OpenIdProvider, OpenIdUrls};
pub use state::CsrfRedirectingState;

/// Path of the callback route below the API prefix.
pub const CALLBACK_PATH: &str = "/oauth2callback";

/// How this server acts as a client of the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
}

/// Token endpoint response from the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenData {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn client_config(&self) -> ClientConfig;

    /// Adds provider specific parameters to the outbound authorize request.
    fn add_custom_parameters(&self, _params: &mut Vec<(String, String)>) {}

    async fn get_user_identity(&self, token: &TokenData)
    -> Result<ProviderIdentity, ProviderError>;
}

/// Maps a reqwest failure, recognising timeouts.
pub fn request_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::from(err)
    }
}

/// Shared HTTP client for identity provider calls.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("rust-oauth-server/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Network(e.to_string()))
}

/// Callback routes for every configured external provider.
pub fn callback_router(handlers: HashMap<String, Arc<ExternalOAuthHandler>>, prefix: &str) -> Router {
    Router::new()
        .route(&format!("{prefix}{CALLBACK_PATH}/{{provider}}"), get(callback))
        .with_state(Arc::new(handlers))
}

async fn callback(
    State(handlers): State<Arc<HashMap<String, Arc<ExternalOAuthHandler>>>>,
    Path(provider): Path<String>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let Some(handler) = handlers.get(&provider) else {
        tracing::debug!(provider, "callback for unknown identity provider");
        return StatusCode::NOT_FOUND.into_response();
    };
    handler
        .handle_callback(RequestContext::new(method, uri, headers, jar))
        .await
}
