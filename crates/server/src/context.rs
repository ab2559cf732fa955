//! Per-request state threaded through the authorize handler chain.

use axum::http::{HeaderMap, Method, Uri, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};

pub struct RequestContext {
    pub method: Method,
    /// Request URI as the client sent it, including any router prefix.
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Incoming cookies plus any cookies set while handling the request.
    pub jar: CookieJar,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, jar: CookieJar) -> Self {
        Self {
            method,
            uri,
            headers,
            jar,
        }
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Path and query of the current request, e.g. `/oauth/authorize?client_id=x`.
    pub fn server_relative_url(&self) -> String {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| "/".to_owned())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// True for browsers, which get HTML error pages instead of JSON.
    pub fn wants_html(&self) -> bool {
        self.header(header::ACCEPT.as_str())
            .is_some_and(|accept| accept.contains("text/html"))
    }

    pub fn add_cookie(&mut self, cookie: Cookie<'static>) {
        self.jar = self.jar.clone().add(cookie);
    }

    pub fn remove_cookie(&mut self, cookie: Cookie<'static>) {
        self.jar = self.jar.clone().remove(cookie);
    }

    /// Attaches cookies accumulated on the context to `response`.
    pub fn finish(self, response: Response) -> Response {
        (self.jar, response).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(uri: &str) -> RequestContext {
        RequestContext::new(
            Method::GET,
            uri.parse().unwrap(),
            HeaderMap::new(),
            CookieJar::new(),
        )
    }

    #[test]
    fn query_params_are_decoded() {
        let ctx = context("/oauth/authorize?client_id=web&scope=user%3Ainfo+user%3Afull");
        assert_eq!(ctx.query_param("client_id").as_deref(), Some("web"));
        assert_eq!(
            ctx.query_param("scope").as_deref(),
            Some("user:info user:full")
        );
        assert_eq!(ctx.query_param("missing"), None);
        assert_eq!(
            ctx.server_relative_url(),
            "/oauth/authorize?client_id=web&scope=user%3Ainfo+user%3Afull"
        );
    }

    #[test]
    fn html_detection() {
        let mut ctx = context("/");
        assert!(!ctx.wants_html());
        ctx.headers
            .insert(header::ACCEPT, "text/html,application/xhtml+xml".parse().unwrap());
        assert!(ctx.wants_html());
    }
}
