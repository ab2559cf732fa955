//! HTML pages for the browser flows.

use askama::Template;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

#[derive(Debug, Clone, Default, Template)]
#[template(path = "login.html")]
pub struct LoginForm {
    pub provider_name: String,
    pub action: String,
    pub error: Option<String>,
    pub then: String,
    pub csrf: String,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct ScopeData {
    pub name: String,
    pub description: String,
    pub warning: Option<String>,
    pub escalating: bool,
    pub granted: bool,
}

#[derive(Debug, Clone, Default, Template)]
#[template(path = "grant.html")]
pub struct GrantForm {
    pub action: String,
    pub then: String,
    pub csrf: String,
    pub client_id: String,
    pub user_name: String,
    pub redirect_uri: String,
    pub scopes: Vec<ScopeData>,
    pub granted_scopes: Vec<ScopeData>,
}

#[derive(Debug, Clone)]
pub struct ProviderLink {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Template)]
#[template(path = "select_provider.html")]
pub struct ProviderSelection {
    pub providers: Vec<ProviderLink>,
}

#[derive(Debug, Clone, Template)]
#[template(path = "error.html")]
pub struct ErrorPage {
    pub status: u16,
    pub error_code: String,
    pub message: String,
}

impl ErrorPage {
    pub fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}

/// Produces the HTML responses for login, consent, provider selection and
/// error pages.
pub trait Renderer: Send + Sync {
    fn login(&self, form: LoginForm) -> Response;
    fn grant(&self, form: GrantForm) -> Response;
    fn select_provider(&self, selection: ProviderSelection) -> Response;
    fn error(&self, page: ErrorPage) -> Response;
}

/// Renders the built-in askama templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRenderer;

fn html<T: Template>(status: StatusCode, template: &T, name: &str) -> Response {
    match template.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!(template = name, "Failed to render template: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

impl Renderer for DefaultRenderer {
    fn login(&self, form: LoginForm) -> Response {
        html(StatusCode::OK, &form, "login")
    }

    fn grant(&self, form: GrantForm) -> Response {
        html(StatusCode::OK, &form, "grant")
    }

    fn select_provider(&self, selection: ProviderSelection) -> Response {
        html(StatusCode::OK, &selection, "select_provider")
    }

    fn error(&self, page: ErrorPage) -> Response {
        let status = StatusCode::from_u16(page.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        html(status, &page, "error")
    }
}
