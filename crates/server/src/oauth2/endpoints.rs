//! OAuth2 HTTP endpoints.
//!
//! Thin axum adapters around [`OAuthServer`]:
//! - Authorization endpoint (GET and POST)
//! - Token endpoint
//! - Info endpoint

use std::sync::Arc;

use axum::{
    Form,
    extract::{OriginalUri, Query, State, rejection::FormRejection},
    http::{HeaderMap, Method},
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::OAUTH2_TAG;
use super::server::{AuthorizeParams, InfoParams, OAuthServer, TokenParams};
use crate::context::RequestContext;
use crate::error::ProtocolError;
use crate::response::{ErrorResponse, InfoResponse, TokenResponse, json_error};

pub const AUTHORIZE_PATH: &str = "/authorize";
pub const TOKEN_PATH: &str = "/token";
pub const INFO_PATH: &str = "/info";

/// Creates the OAuth2 router. Paths are relative to the API prefix.
pub fn router(server: Arc<OAuthServer>) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize, authorize_form))
        .routes(routes!(token))
        .routes(routes!(info))
        .with_state(server)
}

/// OAuth2 Authorization endpoint.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start an authorization code or implicit flow",
    description = "Authenticates the user, checks that the client was granted the requested scopes, \
                   and redirects back to the client with a `code` (query) or `access_token` (fragment).\n\n\
                   Unauthenticated browsers are sent to a login page or a provider selection page; \
                   clients flagged to respond with challenges get a `401` with `WWW-Authenticate`.\n\n\
                   **PKCE:** `code_challenge` with `code_challenge_method` `plain` (default) or `S256`.",
    params(AuthorizeParams),
    responses(
        (status = 302, description = "Redirect to the client, a login page or the consent page"),
        (status = 400, description = "Unknown client or invalid redirect URI", body = ErrorResponse),
        (status = 401, description = "Authentication challenge for non-browser clients"),
    )
)]
pub async fn authorize(
    State(server): State<Arc<OAuthServer>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let ctx = RequestContext::new(method, uri, headers, jar);
    server.handle_authorize(params, ctx).await
}

/// OAuth2 Authorization endpoint, form-encoded variant.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    post,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize (form)",
    summary = "Start an authorization flow with form-encoded parameters",
    request_body(
        content = AuthorizeParams,
        content_type = "application/x-www-form-urlencoded",
    ),
    responses(
        (status = 302, description = "Redirect to the client, a login page or the consent page"),
        (status = 400, description = "Unknown client or invalid redirect URI", body = ErrorResponse),
    )
)]
pub async fn authorize_form(
    State(server): State<Arc<OAuthServer>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
    Form(params): Form<AuthorizeParams>,
) -> Response {
    let ctx = RequestContext::new(method, uri, headers, jar);
    server.handle_authorize(params, ctx).await
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange an authorization code for an access token",
    description = "**Supported grant types:**\n\
                   - `authorization_code`: redeem a code exactly once\n\
                   - `password`, `assertion`, `client_credentials`: denied unless an authenticator is wired\n\
                   - `refresh_token`: always rejected, refresh tokens are never issued\n\n\
                   **Client authentication:** HTTP Basic or `client_id`/`client_secret` in the body.\n\n\
                   **PKCE:** codes issued with a `code_challenge` require the matching `code_verifier`.",
    request_body(
        content = TokenParams,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Access token issued", body = TokenResponse),
        (status = 400, description = "Invalid, expired or already redeemed grant", body = ErrorResponse),
        (status = 401, description = "Unknown client or wrong secret", body = ErrorResponse),
    )
)]
pub async fn token(
    State(server): State<Arc<OAuthServer>>,
    headers: HeaderMap,
    params: Result<Form<TokenParams>, FormRejection>,
) -> Response {
    match params {
        Ok(Form(params)) => server.handle_token(&headers, params).await,
        Err(rejection) => json_error(&ProtocolError::invalid_request(rejection.body_text())),
    }
}

/// Describes an access token or authorization code.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "/info",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Info",
    summary = "Describe an access token or authorization code",
    description = "Pass the access token as `Authorization: Bearer <token>`, or an authorization \
                   code in the `code` query parameter. Using a token extends its inactivity timeout.",
    params(InfoParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Token details", body = InfoResponse),
        (status = 400, description = "Unknown, expired or timed out token", body = ErrorResponse),
    )
)]
pub async fn info(
    State(server): State<Arc<OAuthServer>>,
    headers: HeaderMap,
    Query(params): Query<InfoParams>,
) -> Response {
    server.handle_info(&headers, params).await
}
