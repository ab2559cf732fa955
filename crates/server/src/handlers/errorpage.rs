use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;

use super::AuthenticationErrorHandler;
use crate::context::RequestContext;
use crate::error::{AuthError, ProviderError};
use crate::render::{ErrorPage, Renderer};

const GENERIC_MESSAGE: &str = "An authentication error occurred.";

/// Renders authentication failures as an HTML page. Details go to the log,
/// never to the browser.
pub struct ErrorPageHandler {
    renderer: Arc<dyn Renderer>,
}

impl ErrorPageHandler {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self { renderer }
    }
}

fn describe(err: &AuthError) -> (StatusCode, &'static str, &'static str) {
    match err {
        AuthError::Mapping(_) => (
            StatusCode::FORBIDDEN,
            "mapping_error",
            "Could not create user.",
        ),
        AuthError::InvalidState => (
            StatusCode::BAD_REQUEST,
            "invalid_state",
            "The login request could not be verified. Please try again.",
        ),
        AuthError::Provider(ProviderError::Denied { .. }) => (
            StatusCode::FORBIDDEN,
            "access_denied",
            "The identity provider did not allow the login.",
        ),
        AuthError::Provider(_) => (
            StatusCode::BAD_GATEWAY,
            "identity_provider_error",
            GENERIC_MESSAGE,
        ),
        AuthError::Store(_) | AuthError::Session(_) | AuthError::Backend(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            GENERIC_MESSAGE,
        ),
    }
}

impl AuthenticationErrorHandler for ErrorPageHandler {
    fn authentication_error(&self, err: &AuthError, _: &mut RequestContext) -> Option<Response> {
        let (status, code, message) = describe(err);
        tracing::warn!(error = %err, code, "authentication failed");
        Some(self.renderer.error(ErrorPage::new(status, code, message)))
    }
}
