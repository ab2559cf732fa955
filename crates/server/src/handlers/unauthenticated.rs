//! Strategies for requests that arrive without an identity.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::{AuthenticationErrorHandler, AuthenticationHandler, Challenger, Redirector};
use crate::context::RequestContext;
use crate::error::AuthError;
use crate::oauth2::request::Client;
use crate::render::ProviderLink;
use crate::response::{found, set_query_param};
use crate::selectprovider::SelectProvider;

/// Query parameter naming the provider the user picked.
pub const IDP_PARAM: &str = "idp";

const SERVER_RELATIVE_URL_VAR: &str = "${server-relative-url}";
const URL_VAR: &str = "${url}";

/// Challenges non-browser clients; sends browsers to a login page, either
/// directly when there is one choice or via the provider selection page.
pub struct UnionAuthenticationHandler {
    challengers: Vec<Arc<dyn Challenger>>,
    redirectors: Vec<(String, Arc<dyn Redirector>)>,
    errors: Arc<dyn AuthenticationErrorHandler>,
    selector: SelectProvider,
}

impl UnionAuthenticationHandler {
    pub fn new(
        challengers: Vec<Arc<dyn Challenger>>,
        redirectors: Vec<(String, Arc<dyn Redirector>)>,
        errors: Arc<dyn AuthenticationErrorHandler>,
        selector: SelectProvider,
    ) -> Self {
        Self {
            challengers,
            redirectors,
            errors,
            selector,
        }
    }

    fn challenge(&self, ctx: &RequestContext) -> Result<Option<Response>, AuthError> {
        let mut headers = HeaderMap::new();
        let mut errors = Vec::new();
        for challenger in &self.challengers {
            match challenger.authentication_challenge(ctx) {
                Ok(found) => {
                    for (name, value) in found.iter() {
                        headers.append(name, value.clone());
                    }
                }
                Err(err) => errors.push(err),
            }
        }

        if headers.is_empty() {
            return match errors.into_iter().next() {
                Some(err) => Err(err),
                None => Ok(None),
            };
        }

        let locations = headers.get_all(header::LOCATION).iter().count();
        let has_challenge = headers.contains_key(header::WWW_AUTHENTICATE);
        let status = match (locations, has_challenge) {
            (1.., true) => {
                return Err(AuthError::Backend(
                    "redirect header and challenge header cannot both be set".into(),
                ));
            }
            (2.., false) => {
                return Err(AuthError::Backend("multiple redirect headers set".into()));
            }
            (1, false) => StatusCode::FOUND,
            _ => StatusCode::UNAUTHORIZED,
        };
        // A challenger producing headers handles the request; other
        // challengers' errors are dropped.
        Ok(Some((status, headers).into_response()))
    }

    async fn redirect(
        &self,
        redirector: &Arc<dyn Redirector>,
        ctx: &mut RequestContext,
    ) -> Result<Option<Response>, AuthError> {
        match redirector.authentication_redirect(ctx).await {
            Ok(response) => Ok(Some(response)),
            Err(err) => match self.errors.authentication_error(&err, ctx) {
                Some(response) => Ok(Some(response)),
                None => Err(err),
            },
        }
    }
}

#[async_trait]
impl AuthenticationHandler for UnionAuthenticationHandler {
    async fn authentication_needed(
        &self,
        client: &Client,
        ctx: &mut RequestContext,
    ) -> Result<Option<Response>, AuthError> {
        if client.record().respond_with_challenges {
            return self.challenge(ctx);
        }

        if let Some(name) = ctx.query_param(IDP_PARAM).filter(|n| !n.is_empty()) {
            let Some((_, redirector)) = self.redirectors.iter().find(|(n, _)| *n == name) else {
                return Err(AuthError::Backend(format!(
                    "Unable to locate redirect handler: {name}"
                )));
            };
            return self.redirect(redirector, ctx).await;
        }

        match self.redirectors.as_slice() {
            [] => Ok(None),
            [(_, only)] if !self.selector.force() => self.redirect(only, ctx).await,
            many => {
                let relative = ctx.server_relative_url();
                let providers = many
                    .iter()
                    .map(|(name, _)| ProviderLink {
                        name: name.clone(),
                        url: set_query_param(&relative, IDP_PARAM, name)
                            .unwrap_or_else(|| relative.clone()),
                    })
                    .collect();
                Ok(Some(self.selector.select_authentication(providers)))
            }
        }
    }
}

/// Redirects to a login URL template. `${server-relative-url}` in the
/// template is replaced with the escaped current request URL, `${url}` with
/// the same URL resolved against the public base URL.
pub struct LoginRedirector {
    template: String,
    base_url: Option<String>,
}

impl LoginRedirector {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            base_url: None,
        }
    }

    /// Needed when the template points at another site and uses `${url}`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn target(&self, ctx: &RequestContext) -> String {
        let relative = ctx.server_relative_url();
        let mut target = self
            .template
            .replace(SERVER_RELATIVE_URL_VAR, &urlencoding::encode(&relative));
        if target.contains(URL_VAR) {
            let absolute = match &self.base_url {
                Some(base) => format!("{}{}", base.trim_end_matches('/'), relative),
                None => relative,
            };
            target = target.replace(URL_VAR, &urlencoding::encode(&absolute));
        }
        target
    }
}

#[async_trait]
impl Redirector for LoginRedirector {
    async fn authentication_redirect(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<Response, AuthError> {
        Ok(found(&self.target(ctx)))
    }
}

/// A login URL doubles as a challenge: the client is told where to go via
/// `Location`.
impl Challenger for LoginRedirector {
    fn authentication_challenge(&self, ctx: &RequestContext) -> Result<HeaderMap, AuthError> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&self.target(ctx))
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        headers.insert(header::LOCATION, value);
        Ok(headers)
    }
}

/// `WWW-Authenticate: Basic` for CLI clients.
pub struct BasicAuthChallenger {
    realm: String,
}

impl BasicAuthChallenger {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
        }
    }
}

impl Challenger for BasicAuthChallenger {
    fn authentication_challenge(&self, _ctx: &RequestContext) -> Result<HeaderMap, AuthError> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Basic realm=\"{}\"", self.realm))
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        headers.insert(header::WWW_AUTHENTICATE, value);
        Ok(headers)
    }
}

/// Tells clients of browser-only providers where to get a token by hand.
pub struct PlaceholderChallenger {
    token_request_url: String,
}

impl PlaceholderChallenger {
    pub fn new(token_request_url: impl Into<String>) -> Self {
        Self {
            token_request_url: token_request_url.into(),
        }
    }
}

impl Challenger for PlaceholderChallenger {
    fn authentication_challenge(&self, _ctx: &RequestContext) -> Result<HeaderMap, AuthError> {
        let mut headers = HeaderMap::new();
        let warning = format!(
            "199 oauth \"You must obtain an API token by visiting {}\"",
            self.token_request_url
        );
        let value = HeaderValue::from_str(&warning).map_err(|e| AuthError::Backend(e.to_string()))?;
        headers.insert(header::WARNING, value);
        Ok(headers)
    }
}
