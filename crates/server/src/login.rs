//! Username and password login form.
//!
//! A successful login records the user in the session cookie and sends the
//! browser back to `then`, normally the authorize request that needed a
//! user. Failures redirect back to the form with a `reason` code.

use std::sync::Arc;

use axum::{
    Form, Router,
    extract::{OriginalUri, State},
    http::{HeaderMap, Method, StatusCode},
    response::Response,
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::authn::PasswordAuthenticator;
use crate::context::RequestContext;
use crate::render::{ErrorPage, LoginForm, Renderer};
use crate::response::{found, is_server_relative};
use crate::session::{CookieCsrf, SessionAuthenticator};

const REASON_PARAM: &str = "reason";
const THEN_PARAM: &str = "then";

const REASON_USER_REQUIRED: &str = "user_required";
const REASON_TOKEN_EXPIRED: &str = "token_expired";
const REASON_ACCESS_DENIED: &str = "access_denied";
const REASON_AUTHENTICATION_ERROR: &str = "authentication_error";

fn reason_message(reason: &str) -> Option<&'static str> {
    match reason {
        "" => None,
        REASON_USER_REQUIRED => Some("Login is required. Please try again."),
        REASON_TOKEN_EXPIRED => Some("Could not check CSRF token. Please try again."),
        REASON_ACCESS_DENIED => Some("Invalid login or password. Please try again."),
        _ => Some("An authentication error occurred. Please try again."),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginSubmission {
    #[serde(default)]
    pub then: String,
    #[serde(default)]
    pub csrf: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Login form for one password provider.
pub struct Login {
    provider_name: String,
    csrf: CookieCsrf,
    auth: Arc<dyn PasswordAuthenticator>,
    session: Arc<SessionAuthenticator>,
    renderer: Arc<dyn Renderer>,
}

impl Login {
    pub fn new(
        provider_name: impl Into<String>,
        csrf: CookieCsrf,
        auth: Arc<dyn PasswordAuthenticator>,
        session: Arc<SessionAuthenticator>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            csrf,
            auth,
            session,
            renderer,
        }
    }

    pub fn router(self: Arc<Self>, path: &str) -> Router {
        Router::new()
            .route(path, get(login_page).post(login_submit))
            .with_state(self)
    }

    fn no_destination(&self) -> Response {
        self.renderer.error(ErrorPage::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Could not determine where to return to after login",
        ))
    }

    #[tracing::instrument(skip_all, fields(provider = %self.provider_name))]
    async fn handle_form(&self, mut ctx: RequestContext) -> Response {
        let then = ctx.query_param(THEN_PARAM).unwrap_or_default();
        if !is_server_relative(&then) {
            return self.no_destination();
        }
        let csrf = match self.csrf.generate(&mut ctx) {
            Ok(csrf) => csrf,
            Err(err) => {
                tracing::error!(error = %err, "unable to generate CSRF token");
                return self.renderer.error(ErrorPage::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "The server encountered an unexpected error",
                ));
            }
        };
        let reason = ctx.query_param(REASON_PARAM).unwrap_or_default();
        let form = LoginForm {
            provider_name: self.provider_name.clone(),
            action: ctx.uri.path().to_owned(),
            error: reason_message(&reason).map(str::to_owned),
            then,
            csrf,
            username: String::new(),
        };
        let response = self.renderer.login(form);
        ctx.finish(response)
    }

    #[tracing::instrument(skip_all, fields(provider = %self.provider_name, user = %form.username))]
    async fn handle_login(&self, mut ctx: RequestContext, form: LoginSubmission) -> Response {
        if !is_server_relative(&form.then) {
            return self.no_destination();
        }
        if !self.csrf.check(&ctx, &form.csrf) {
            tracing::warn!("login submitted with an invalid CSRF token");
            return self.retry(&ctx, REASON_TOKEN_EXPIRED, &form.then);
        }
        let username = form.username.trim();
        if username.is_empty() {
            return self.retry(&ctx, REASON_USER_REQUIRED, &form.then);
        }

        let user = match self.auth.authenticate_password(username, &form.password).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::info!("invalid login");
                return self.retry(&ctx, REASON_ACCESS_DENIED, &form.then);
            }
            Err(err) => {
                tracing::error!(error = %err, "password authentication failed");
                return self.retry(&ctx, REASON_AUTHENTICATION_ERROR, &form.then);
            }
        };

        if let Err(err) = self.session.authentication_succeeded(&user, &mut ctx) {
            tracing::error!(error = %err, "unable to record session");
            return self.retry(&ctx, REASON_AUTHENTICATION_ERROR, &form.then);
        }
        tracing::info!(user = %user.name, "login succeeded");
        let response = found(&form.then);
        ctx.finish(response)
    }

    /// Back to the form, keeping `then` and explaining what went wrong.
    fn retry(&self, ctx: &RequestContext, reason: &str, then: &str) -> Response {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(REASON_PARAM, reason)
            .append_pair(THEN_PARAM, then)
            .finish();
        found(&format!("{}?{}", ctx.uri.path(), query))
    }
}

async fn login_page(
    State(login): State<Arc<Login>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    login
        .handle_form(RequestContext::new(method, uri, headers, jar))
        .await
}

async fn login_submit(
    State(login): State<Arc<Login>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<LoginSubmission>,
) -> Response {
    login
        .handle_login(RequestContext::new(method, uri, headers, jar), form)
        .await
}
