//! Cookie-bound CSRF tokens for the HTML forms.

use axum_extra::extract::cookie::{Cookie, SameSite};
use subtle::ConstantTimeEq;

use crate::context::RequestContext;
use crate::token::{TokenError, random_token};

#[derive(Debug, Clone)]
pub struct CookieCsrf {
    name: String,
    secure: bool,
}

impl CookieCsrf {
    pub fn new(name: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            secure,
        }
    }

    /// Returns the token bound to this browser, setting the cookie on first use.
    pub fn generate(&self, ctx: &mut RequestContext) -> Result<String, TokenError> {
        if let Some(existing) = ctx.jar.get(&self.name)
            && !existing.value().is_empty()
        {
            return Ok(existing.value().to_owned());
        }
        let token = random_token()?;
        let cookie = Cookie::build((self.name.clone(), token.clone()))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build();
        ctx.add_cookie(cookie);
        Ok(token)
    }

    /// True when `value` equals the token in the CSRF cookie. Empty values
    /// never match.
    pub fn check(&self, ctx: &RequestContext, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        match ctx.jar.get(&self.name) {
            Some(cookie) if !cookie.value().is_empty() => {
                cookie.value().as_bytes().ct_eq(value.as_bytes()).into()
            }
            _ => false,
        }
    }
}
