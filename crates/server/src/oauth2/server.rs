//! The protocol engine behind `/authorize`, `/token` and `/info`.
//!
//! The engine parses and validates requests, runs the authorize handler
//! chain, issues codes and tokens, and serializes every outcome per
//! RFC 6749. Handlers never write protocol errors themselves; they return an
//! [`Outcome`] and the engine renders it.

use std::sync::Arc;

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

use super::pkce::{self, CodeChallengeMethod};
use super::request::{
    AccessData, AccessRequest, AuthorizeData, AuthorizeRequest, Client, GrantType, ResponseType,
};
use super::storage::{RegistryStorage, StorageError};
use crate::authn::basic::basic_credentials;
use crate::context::RequestContext;
use crate::error::{ErrorCode, ProtocolError};
use crate::handlers::{AccessHandler, AuthorizeHandler, Outcome, SessionFinalizer};
use crate::render::{ErrorPage, Renderer};
use crate::response::{InfoResponse, TokenResponse, error_redirect, json_error, redirect_with};
use crate::token::TokenGenerator;
use crate::user::UserInfo;

const TOKEN_TYPE: &str = "Bearer";

/// Lifetimes used when a client does not override them.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub authorize_expiration: i64,
    pub access_expiration: i64,
    pub access_inactivity_timeout: Option<i64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            authorize_expiration: 300,
            access_expiration: 86400,
            access_inactivity_timeout: None,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct AuthorizeParams {
    /// `code` or `token`
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    /// Space separated scopes. Defaults to `user:full`.
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    /// `plain` (default) or `S256`
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, ToSchema)]
pub struct TokenParams {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub assertion_type: Option<String>,
    pub assertion: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct InfoParams {
    /// An authorization code to describe instead of a bearer token.
    pub code: Option<String>,
}

/// Where a failed authorize request reports its error.
enum AuthorizeFailure {
    /// No trustworthy redirect URI yet; answer the user agent directly.
    Direct(ProtocolError),
    Redirect {
        redirect_uri: String,
        state: String,
        fragment: bool,
        error: ProtocolError,
    },
}

pub struct OAuthServer {
    config: ServerConfig,
    storage: Arc<RegistryStorage>,
    tokens: Arc<dyn TokenGenerator>,
    authorize_handlers: Vec<Arc<dyn AuthorizeHandler>>,
    finalizer: SessionFinalizer,
    access_handler: Arc<dyn AccessHandler>,
    renderer: Arc<dyn Renderer>,
}

impl OAuthServer {
    pub fn new(
        config: ServerConfig,
        storage: Arc<RegistryStorage>,
        tokens: Arc<dyn TokenGenerator>,
        authorize_handlers: Vec<Arc<dyn AuthorizeHandler>>,
        finalizer: SessionFinalizer,
        access_handler: Arc<dyn AccessHandler>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            config,
            storage,
            tokens,
            authorize_handlers,
            finalizer,
            access_handler,
            renderer,
        }
    }

    pub fn storage(&self) -> &Arc<RegistryStorage> {
        &self.storage
    }

    // ---------------------------------------------------------------------
    // authorize
    // ---------------------------------------------------------------------

    #[tracing::instrument(skip_all, fields(client_id = params.client_id.as_deref().unwrap_or_default()))]
    pub async fn handle_authorize(
        &self,
        params: AuthorizeParams,
        mut ctx: RequestContext,
    ) -> Response {
        let mut ar = match self.parse_authorize(params).await {
            Ok(ar) => ar,
            Err(AuthorizeFailure::Direct(error)) => {
                tracing::debug!(%error, "rejecting authorize request");
                let response = self.direct_error(&ctx, &error);
                return ctx.finish(response);
            }
            Err(AuthorizeFailure::Redirect {
                redirect_uri,
                state,
                fragment,
                error,
            }) => {
                tracing::debug!(%error, "rejecting authorize request");
                return ctx.finish(error_redirect(&redirect_uri, &state, &error, fragment));
            }
        };

        for handler in &self.authorize_handlers {
            match handler.handle_authorize(&mut ar, &mut ctx).await {
                Outcome::Continue => {}
                Outcome::Handled(response) => return ctx.finish(response),
                Outcome::Error(error) => {
                    self.finalizer.finish(&mut ctx);
                    let fragment = ar.response_type.uses_fragment();
                    let response = error_redirect(&ar.redirect_uri, &ar.state, &error, fragment);
                    return ctx.finish(response);
                }
            }
        }

        self.finalizer.finish(&mut ctx);
        let response = self.finish_authorize(ar).await;
        ctx.finish(response)
    }

    async fn parse_authorize(
        &self,
        params: AuthorizeParams,
    ) -> Result<AuthorizeRequest, AuthorizeFailure> {
        let client_id = params.client_id.unwrap_or_default();
        if client_id.is_empty() {
            return Err(AuthorizeFailure::Direct(ProtocolError::invalid_request(
                "client_id is required",
            )));
        }
        let client = match self.storage.get_client(&client_id).await {
            Ok(client) => client,
            Err(err) if err.is_not_found() => {
                return Err(AuthorizeFailure::Direct(ProtocolError::new(
                    ErrorCode::UnauthorizedClient,
                    "The client is not authorized to request a token using this method.",
                )));
            }
            Err(err) => {
                tracing::error!(error = %err, "unable to load client");
                return Err(AuthorizeFailure::Direct(ProtocolError::server_error()));
            }
        };

        let redirect_uri = validate_redirect_uri(
            client.redirect_uris(),
            params.redirect_uri.as_deref().unwrap_or_default(),
        )
        .map_err(AuthorizeFailure::Direct)?;
        let state = params.state.unwrap_or_default();

        let response_type: ResponseType = match params
            .response_type
            .as_deref()
            .unwrap_or_default()
            .parse()
        {
            Ok(response_type) => response_type,
            Err(()) => {
                return Err(AuthorizeFailure::Redirect {
                    redirect_uri,
                    state,
                    fragment: false,
                    error: ProtocolError::bare(ErrorCode::UnsupportedResponseType),
                });
            }
        };
        let fragment = response_type.uses_fragment();
        let redirect_error = |error| AuthorizeFailure::Redirect {
            redirect_uri: redirect_uri.clone(),
            state: state.clone(),
            fragment,
            error,
        };

        let code_challenge = params.code_challenge.unwrap_or_default();
        let code_challenge_method = if code_challenge.is_empty() {
            None
        } else {
            let method = CodeChallengeMethod::parse(params.code_challenge_method.as_deref())
                .map_err(redirect_error)?;
            if !pkce::is_valid_code(&code_challenge) {
                return Err(redirect_error(ProtocolError::invalid_request(
                    "code_challenge invalid (rfc7636)",
                )));
            }
            Some(method)
        };

        let expiration = match response_type {
            ResponseType::Code => self.config.authorize_expiration,
            ResponseType::Token => client.access_token_max_age(self.config.access_expiration),
        };

        Ok(AuthorizeRequest {
            response_type,
            client,
            scope: params.scope.unwrap_or_default(),
            redirect_uri,
            state,
            code_challenge,
            code_challenge_method,
            expiration,
            authorized: false,
            user: None,
        })
    }

    async fn finish_authorize(&self, ar: AuthorizeRequest) -> Response {
        let fragment = ar.response_type.uses_fragment();
        let fail = |error: ProtocolError| error_redirect(&ar.redirect_uri, &ar.state, &error, fragment);

        if !ar.authorized {
            return fail(ProtocolError::access_denied(
                "The resource owner or authorization server denied the request.",
            ));
        }
        let Some(user) = ar.user.clone() else {
            tracing::error!(client_id = %ar.client.id(), "authorized request without a user");
            return fail(ProtocolError::server_error());
        };

        let issued = match ar.response_type {
            ResponseType::Code => self.issue_code(&ar, user).await.map(|code| {
                redirect_with(
                    &ar.redirect_uri,
                    &[("code", code.as_str()), ("state", ar.state.as_str())],
                    false,
                )
            }),
            ResponseType::Token => {
                let access = self
                    .issue_access(
                        ar.client.clone(),
                        user,
                        ar.scope.clone(),
                        ar.redirect_uri.clone(),
                        None,
                        ar.expiration,
                    )
                    .await;
                access.map(|data| {
                    let expires_in = data.expires_in.to_string();
                    redirect_with(
                        &ar.redirect_uri,
                        &[
                            ("access_token", data.access_token.as_str()),
                            ("token_type", TOKEN_TYPE),
                            ("expires_in", expires_in.as_str()),
                            ("scope", data.scope.as_str()),
                            ("state", ar.state.as_str()),
                        ],
                        true,
                    )
                })
            }
        };

        match issued {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "stored redirect URI no longer parses");
                json_error(&ProtocolError::server_error())
            }
            Err(error) => fail(error),
        }
    }

    async fn issue_code(&self, ar: &AuthorizeRequest, user: UserInfo) -> Result<String, ProtocolError> {
        let code = self.tokens.generate_authorize_token().map_err(|err| {
            tracing::error!(error = %err, "unable to generate authorization code");
            ProtocolError::server_error()
        })?;
        let data = AuthorizeData {
            code: code.clone(),
            client: ar.client.clone(),
            expires_in: ar.expiration,
            scope: ar.scope.clone(),
            redirect_uri: ar.redirect_uri.clone(),
            state: ar.state.clone(),
            created_at: OffsetDateTime::now_utc(),
            user,
            code_challenge: ar.code_challenge.clone(),
            code_challenge_method: ar
                .code_challenge_method
                .map(|m| m.as_str().to_owned())
                .unwrap_or_default(),
        };
        self.storage.save_authorize(&data).await.map_err(|err| {
            tracing::error!(error = %err, client_id = %ar.client.id(), "unable to save authorization code");
            ProtocolError::server_error()
        })?;
        tracing::info!(client_id = %ar.client.id(), user = %data.user.name, "issued authorization code");
        Ok(code)
    }

    async fn issue_access(
        &self,
        client: Client,
        user: UserInfo,
        scope: String,
        redirect_uri: String,
        authorize_code: Option<String>,
        expires_in: i64,
    ) -> Result<AccessData, ProtocolError> {
        // Refresh tokens are never issued.
        let (access_token, _) = self.tokens.generate_access_token(false).map_err(|err| {
            tracing::error!(error = %err, "unable to generate access token");
            ProtocolError::server_error()
        })?;
        let inactivity_timeout_seconds =
            client.access_token_inactivity_timeout(self.config.access_inactivity_timeout);
        let data = AccessData {
            client,
            authorize_code,
            access_token,
            refresh_token: None,
            expires_in,
            scope,
            redirect_uri,
            created_at: OffsetDateTime::now_utc(),
            user,
            inactivity_timeout_seconds,
        };
        self.storage.save_access(&data).await.map_err(|err| {
            tracing::error!(error = %err, client_id = %data.client.id(), "unable to save access token");
            ProtocolError::server_error()
        })?;
        tracing::info!(client_id = %data.client.id(), user = %data.user.name, "issued access token");
        Ok(data)
    }

    fn direct_error(&self, ctx: &RequestContext, error: &ProtocolError) -> Response {
        if ctx.wants_html() {
            let message = error
                .description
                .clone()
                .unwrap_or_else(|| error.code.as_str().to_owned());
            self.renderer
                .error(ErrorPage::new(error.code.status(), error.code.as_str(), message))
        } else {
            json_error(error)
        }
    }

    // ---------------------------------------------------------------------
    // token
    // ---------------------------------------------------------------------

    #[tracing::instrument(skip_all, fields(grant_type = params.grant_type.as_deref().unwrap_or_default()))]
    pub async fn handle_token(&self, headers: &HeaderMap, params: TokenParams) -> Response {
        match self.access(headers, params).await {
            Ok(data) => {
                let body = TokenResponse {
                    access_token: data.access_token,
                    token_type: TOKEN_TYPE.to_owned(),
                    expires_in: data.expires_in,
                    refresh_token: data.refresh_token,
                    scope: data.scope,
                };
                (
                    StatusCode::OK,
                    [(header::CACHE_CONTROL, "no-store"), (header::PRAGMA, "no-cache")],
                    Json(body),
                )
                    .into_response()
            }
            Err(error) => {
                tracing::debug!(%error, "token request failed");
                json_error(&error)
            }
        }
    }

    async fn access(
        &self,
        headers: &HeaderMap,
        params: TokenParams,
    ) -> Result<AccessData, ProtocolError> {
        let grant_type = params.grant_type.as_deref().unwrap_or_default();
        if grant_type.is_empty() {
            return Err(ProtocolError::invalid_request("grant_type is required"));
        }
        let grant_type: GrantType = grant_type
            .parse()
            .map_err(|()| ProtocolError::bare(ErrorCode::UnsupportedGrantType))?;

        let client = self.authenticate_client(headers, &params).await?;
        let mut ar = AccessRequest::new(
            grant_type,
            client.clone(),
            client.access_token_max_age(self.config.access_expiration),
        );
        ar.redirect_uri = params.redirect_uri.clone().unwrap_or_default();
        ar.scope = params.scope.clone().unwrap_or_default();

        match grant_type {
            GrantType::AuthorizationCode => {
                let data = self.load_code(&client, &params).await?;
                ar.redirect_uri = data.redirect_uri.clone();
                ar.scope = data.scope.clone();
                ar.user = Some(data.user.clone());
                ar.authorize_data = Some(data);
            }
            GrantType::RefreshToken => {
                let token = params.refresh_token.as_deref().unwrap_or_default();
                return match self.storage.load_refresh(token).await {
                    Ok(_) => Err(ProtocolError::server_error()),
                    Err(err) => {
                        tracing::debug!(error = %err, "refresh token rejected");
                        Err(ProtocolError::invalid_grant("refresh tokens are not supported"))
                    }
                };
            }
            GrantType::Password => {
                ar.username = params.username.clone().unwrap_or_default();
                ar.password = params.password.clone().unwrap_or_default();
            }
            GrantType::Assertion => {
                ar.assertion_type = params.assertion_type.clone().unwrap_or_default();
                ar.assertion = params.assertion.clone().unwrap_or_default();
            }
            GrantType::ClientCredentials => {}
        }

        if let Err(err) = self.access_handler.handle_access(&mut ar).await {
            tracing::warn!(error = %err, client_id = %client.id(), "access handler failed");
            return Err(ProtocolError::server_error());
        }
        if !ar.authorized {
            return Err(ProtocolError::access_denied(
                "The resource owner or authorization server denied the request.",
            ));
        }
        let Some(user) = ar.user.clone() else {
            return Err(ProtocolError::access_denied(
                "The resource owner or authorization server denied the request.",
            ));
        };

        let authorize_code = match &ar.authorize_data {
            Some(data) => {
                // The delete is what makes a code single-use: of two
                // concurrent redemptions only one can remove it.
                match self.storage.remove_authorize(&data.code).await {
                    Ok(()) => Some(data.code.clone()),
                    Err(err) if err.is_not_found() => {
                        tracing::info!(client_id = %client.id(), "authorization code already redeemed");
                        return Err(ProtocolError::invalid_grant(
                            "authorization code has already been used",
                        ));
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "unable to delete authorization code");
                        return Err(ProtocolError::server_error());
                    }
                }
            }
            None => None,
        };

        self.issue_access(
            client,
            user,
            ar.scope,
            ar.redirect_uri,
            authorize_code,
            ar.expiration,
        )
        .await
    }

    async fn authenticate_client(
        &self,
        headers: &HeaderMap,
        params: &TokenParams,
    ) -> Result<Client, ProtocolError> {
        let (id, secret) = match basic_credentials(headers) {
            Some(credentials) => credentials,
            None => (
                params.client_id.clone().unwrap_or_default(),
                params.client_secret.clone().unwrap_or_default(),
            ),
        };
        if id.is_empty() {
            return Err(ProtocolError::bare(ErrorCode::InvalidClient));
        }
        let client = match self.storage.get_client(&id).await {
            Ok(client) => client,
            Err(err) if err.is_not_found() => {
                return Err(ProtocolError::bare(ErrorCode::InvalidClient));
            }
            Err(err) => {
                tracing::error!(error = %err, "unable to load client");
                return Err(ProtocolError::server_error());
            }
        };
        if !client.secret_matches(&secret) {
            tracing::info!(client_id = %id, "client secret mismatch");
            return Err(ProtocolError::bare(ErrorCode::InvalidClient));
        }
        Ok(client)
    }

    async fn load_code(
        &self,
        client: &Client,
        params: &TokenParams,
    ) -> Result<AuthorizeData, ProtocolError> {
        let code = params.code.as_deref().unwrap_or_default();
        if code.is_empty() {
            return Err(ProtocolError::invalid_request("code is required"));
        }
        let data = self
            .storage
            .load_authorize(code)
            .await
            .map_err(|err| storage_grant_error(err, "authorization code"))?;

        if data.client.id() != client.id() {
            return Err(ProtocolError::invalid_grant(
                "authorization code was issued to another client",
            ));
        }
        if data.is_expired_at(OffsetDateTime::now_utc()) {
            return Err(ProtocolError::invalid_grant("authorization code expired"));
        }
        let redirect_uri = params.redirect_uri.as_deref().unwrap_or_default();
        if !redirect_uri.is_empty() && redirect_uri != data.redirect_uri {
            return Err(ProtocolError::invalid_grant("redirect_uri does not match"));
        }

        if !data.code_challenge.is_empty() {
            let verifier = params.code_verifier.as_deref().unwrap_or_default();
            if verifier.is_empty() {
                return Err(ProtocolError::invalid_request(
                    "code_verifier required (rfc7636)",
                ));
            }
            if !pkce::is_valid_code(verifier) {
                return Err(ProtocolError::invalid_request(
                    "code_verifier invalid (rfc7636)",
                ));
            }
            let method = CodeChallengeMethod::parse(Some(&data.code_challenge_method))
                .map_err(|_| ProtocolError::server_error())?;
            if !pkce::verify(method, &data.code_challenge, verifier) {
                return Err(ProtocolError::invalid_grant(
                    "code_verifier failed comparison with code_challenge",
                ));
            }
        }
        Ok(data)
    }

    // ---------------------------------------------------------------------
    // info
    // ---------------------------------------------------------------------

    #[tracing::instrument(skip_all)]
    pub async fn handle_info(&self, headers: &HeaderMap, params: InfoParams) -> Response {
        let result = match params.code.as_deref().filter(|c| !c.is_empty()) {
            Some(code) => self.code_info(code).await,
            None => match bearer_token(headers) {
                Some(token) => self.token_info(&token).await,
                None => Err(ProtocolError::invalid_request("bearer token is required")),
            },
        };
        match result {
            Ok(info) => (
                StatusCode::OK,
                [(header::CACHE_CONTROL, "no-store"), (header::PRAGMA, "no-cache")],
                Json(info),
            )
                .into_response(),
            Err(error) => json_error(&error),
        }
    }

    async fn code_info(&self, code: &str) -> Result<InfoResponse, ProtocolError> {
        let data = self
            .storage
            .load_authorize(code)
            .await
            .map_err(|err| storage_grant_error(err, "authorization code"))?;
        let now = OffsetDateTime::now_utc();
        if data.is_expired_at(now) {
            return Err(ProtocolError::invalid_grant("authorization code expired"));
        }
        Ok(InfoResponse {
            client_id: data.client.id().to_owned(),
            access_token: None,
            token_type: String::new(),
            expires_in: data.remaining_seconds(now),
            scope: data.scope,
            redirect_uri: data.redirect_uri,
            user_name: data.user.name,
            user_uid: data.user.uid,
        })
    }

    async fn token_info(&self, token: &str) -> Result<InfoResponse, ProtocolError> {
        let data = self
            .storage
            .load_access(token)
            .await
            .map_err(|err| storage_grant_error(err, "access token"))?;
        let now = OffsetDateTime::now_utc();
        let lapsed = if data.is_expired_at(now) {
            Some("access token expired")
        } else if data.is_inactive_at(now) {
            Some("access token timed out")
        } else {
            None
        };
        if let Some(reason) = lapsed {
            match self.storage.remove_access(&data.access_token).await {
                Ok(()) => tracing::debug!(client_id = %data.client.id(), reason, "removed lapsed access token"),
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    tracing::warn!(error = %err, client_id = %data.client.id(), "unable to remove lapsed access token")
                }
            }
            return Err(ProtocolError::invalid_grant(reason));
        }

        // Only tokens issued with an inactivity timeout get it pushed out.
        if data.inactivity_timeout_seconds.is_some_and(|t| t > 0)
            && let Some(timeout) = data
                .client
                .access_token_inactivity_timeout(self.config.access_inactivity_timeout)
        {
            let elapsed = (now - data.created_at).whole_seconds().max(0);
            if let Err(err) = self
                .storage
                .extend_inactivity_timeout(&data.access_token, elapsed.saturating_add(timeout))
                .await
            {
                tracing::warn!(error = %err, client_id = %data.client.id(), "unable to extend token inactivity timeout");
            }
        }

        Ok(InfoResponse {
            client_id: data.client.id().to_owned(),
            expires_in: data.remaining_seconds(now),
            access_token: Some(data.access_token),
            token_type: TOKEN_TYPE.to_owned(),
            scope: data.scope,
            redirect_uri: data.redirect_uri,
            user_name: data.user.name,
            user_uid: data.user.uid,
        })
    }
}

/// Grant-level storage failures become `invalid_grant`; everything else is
/// logged and reported as `server_error`.
fn storage_grant_error(err: StorageError, what: &str) -> ProtocolError {
    if err.is_invalid_grant() {
        tracing::debug!(error = %err, "{} rejected", what);
        ProtocolError::invalid_grant(format!("{what} is invalid or expired"))
    } else {
        tracing::error!(error = %err, "unable to load {}", what);
        ProtocolError::server_error()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_owned())
}

/// Resolves the redirect URI for a request. An omitted URI is allowed when
/// exactly one is registered. A supplied URI must share scheme, host and port
/// with a registered one and extend its path on a segment boundary.
pub fn validate_redirect_uri(registered: &[String], requested: &str) -> Result<String, ProtocolError> {
    if requested.is_empty() {
        return match registered {
            [only] => Ok(only.clone()),
            [] => Err(ProtocolError::invalid_request("client has no redirect URIs registered")),
            _ => Err(ProtocolError::invalid_request("redirect_uri is required")),
        };
    }

    let mismatch = || ProtocolError::invalid_request("redirect_uri does not match a registered redirect URI");
    let raw_path = requested
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    if raw_path.split('/').any(|segment| segment == ".." || segment.eq_ignore_ascii_case("%2e%2e")) {
        return Err(mismatch());
    }
    let candidate = url::Url::parse(requested).map_err(|_| mismatch())?;
    if candidate.fragment().is_some() {
        return Err(mismatch());
    }

    let matches = registered
        .iter()
        .filter_map(|base| url::Url::parse(base).ok())
        .any(|base| redirect_matches(&base, &candidate));
    if matches { Ok(requested.to_owned()) } else { Err(mismatch()) }
}

fn redirect_matches(base: &url::Url, candidate: &url::Url) -> bool {
    if base.scheme() != candidate.scheme()
        || base.host_str() != candidate.host_str()
        || base.port_or_known_default() != candidate.port_or_known_default()
    {
        return false;
    }
    let base_path = base.path().trim_end_matches('/');
    let path = candidate.path();
    path == base.path() || path == base_path || path.starts_with(&format!("{base_path}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered() -> Vec<String> {
        vec!["https://client.example.com/cb".into()]
    }

    #[test]
    fn omitted_redirect_uses_the_only_registration() {
        assert_eq!(
            validate_redirect_uri(&registered(), "").unwrap(),
            "https://client.example.com/cb"
        );
        let two = vec!["https://a.example.com/".into(), "https://b.example.com/".into()];
        assert!(validate_redirect_uri(&two, "").is_err());
    }

    #[test]
    fn redirect_must_extend_registered_path() {
        let ok = [
            "https://client.example.com/cb",
            "https://client.example.com/cb/sub",
            "https://client.example.com/cb?x=1",
            "https://client.example.com:443/cb",
        ];
        for uri in ok {
            assert!(validate_redirect_uri(&registered(), uri).is_ok(), "{uri}");
        }
        let bad = [
            "https://client.example.com/cbx",
            "https://client.example.com/cb/../admin",
            "http://client.example.com/cb",
            "https://evil.example.com/cb",
            "https://client.example.com:8443/cb",
            "https://client.example.com/cb#frag",
        ];
        for uri in bad {
            assert!(validate_redirect_uri(&registered(), uri).is_err(), "{uri}");
        }
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
