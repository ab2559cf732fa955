use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::context::RequestContext;
use crate::error::AuthError;
use crate::response::is_server_relative;
use crate::session::CookieCsrf;

const CSRF_KEY: &str = "csrf";
const THEN_KEY: &str = "then";

/// Round-trips the return URL through the identity provider's `state`
/// parameter, bound to the browser's CSRF cookie.
#[derive(Debug, Clone)]
pub struct CsrfRedirectingState {
    csrf: CookieCsrf,
}

impl CsrfRedirectingState {
    pub fn new(csrf: CookieCsrf) -> Self {
        Self { csrf }
    }

    pub fn generate(&self, ctx: &mut RequestContext, then: &str) -> Result<String, AuthError> {
        let csrf = self
            .csrf
            .generate(ctx)
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(CSRF_KEY, &csrf)
            .append_pair(THEN_KEY, then)
            .finish();
        Ok(URL_SAFE_NO_PAD.encode(encoded))
    }

    /// Verifies the CSRF component and returns the URL to go back to.
    pub fn check(&self, ctx: &RequestContext, state: &str) -> Result<String, AuthError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(state)
            .map_err(|_| AuthError::InvalidState)?;
        let mut csrf = String::new();
        let mut then = String::new();
        for (key, value) in url::form_urlencoded::parse(&decoded) {
            match key.as_ref() {
                CSRF_KEY => csrf = value.into_owned(),
                THEN_KEY => then = value.into_owned(),
                _ => {}
            }
        }
        if !self.csrf.check(ctx, &csrf) {
            tracing::warn!("external login state carried a stale or forged CSRF token");
            return Err(AuthError::InvalidState);
        }
        if !is_server_relative(&then) {
            tracing::warn!("external login state carried an off-site return URL");
            return Err(AuthError::InvalidState);
        }
        Ok(then)
    }
}
