use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{PasswordAuthenticator, RequestAuthenticator};
use crate::context::RequestContext;
use crate::error::AuthError;
use crate::user::UserInfo;

/// Decodes `Authorization: Basic` credentials. Missing or malformed headers
/// yield `None`.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let creds = String::from_utf8(decoded).ok()?;
    let (user, password) = creds.split_once(':')?;
    Some((user.to_owned(), password.to_owned()))
}

/// Authenticates requests carrying basic auth against a password backend.
pub struct BasicAuthRequestAuthenticator {
    password: Arc<dyn PasswordAuthenticator>,
}

impl BasicAuthRequestAuthenticator {
    pub fn new(password: Arc<dyn PasswordAuthenticator>) -> Self {
        Self { password }
    }
}

#[async_trait]
impl RequestAuthenticator for BasicAuthRequestAuthenticator {
    async fn authenticate_request(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<UserInfo>, AuthError> {
        let Some((username, password)) = basic_credentials(&ctx.headers) else {
            return Ok(None);
        };
        self.password.authenticate_password(&username, &password).await
    }
}
