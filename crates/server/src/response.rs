//! Wire types and response helpers shared by the HTTP endpoints.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl From<&ProtocolError> for ErrorResponse {
    fn from(err: &ProtocolError) -> Self {
        Self {
            error: err.code.as_str().to_owned(),
            error_description: err.description.clone(),
            state: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
}

/// Result of introspecting a code or access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InfoResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub redirect_uri: String,
    pub user_name: String,
    pub user_uid: String,
}

/// `302 Found` pointing at `location`.
pub fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => {
            tracing::warn!(location, "refusing to redirect to invalid location");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// True for a path on this server, e.g. `/oauth/authorize?x=y`. Rejects
/// absolute and scheme-relative URLs so `then` parameters cannot redirect
/// off-site. Browsers drop tabs and newlines before resolving a location,
/// so `/\t/host` would turn into `//host`; any control character or
/// whitespace is refused outright.
pub fn is_server_relative(url: &str) -> bool {
    if url.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return false;
    }
    url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\")
}

/// Replaces (or adds) `key` in the query of a server-relative URL.
pub fn set_query_param(relative: &str, key: &str, value: &str) -> Option<String> {
    let mut parsed = url::Url::parse("http://placeholder").ok()?.join(relative).ok()?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(key, value);
    Some(match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_owned(),
    })
}

/// JSON body for a protocol error, with caching disabled.
pub fn json_error(err: &ProtocolError) -> Response {
    (
        err.code.status(),
        [(header::CACHE_CONTROL, "no-store"), (header::PRAGMA, "no-cache")],
        Json(ErrorResponse::from(err)),
    )
        .into_response()
}

/// Redirects to `redirect_uri` with `params` appended to the query, or to
/// the fragment for implicit-flow responses.
pub fn redirect_with(
    redirect_uri: &str,
    params: &[(&str, &str)],
    fragment: bool,
) -> Result<Response, url::ParseError> {
    let mut target = url::Url::parse(redirect_uri)?;
    let pairs = params.iter().filter(|(_, v)| !v.is_empty());
    if fragment {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        target.set_fragment(Some(&encoded));
    } else {
        target.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(found(target.as_str()))
}

/// Sends a protocol error back to the client's redirect URI.
pub fn error_redirect(
    redirect_uri: &str,
    state: &str,
    err: &ProtocolError,
    fragment: bool,
) -> Response {
    let description = err.description.as_deref().unwrap_or_default();
    let params = [
        ("error", err.code.as_str()),
        ("error_description", description),
        ("state", state),
    ];
    match redirect_with(redirect_uri, &params, fragment) {
        Ok(response) => response,
        Err(_) => json_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn location(response: &Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned()
    }

    #[test]
    fn query_redirect_appends_params() {
        let response = redirect_with(
            "https://client.example.com/cb?keep=1",
            &[("code", "abc"), ("state", "")],
            false,
        )
        .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            location(&response),
            "https://client.example.com/cb?keep=1&code=abc"
        );
    }

    #[test]
    fn server_relative_urls() {
        assert!(is_server_relative("/oauth/authorize?client_id=a"));
        assert!(!is_server_relative("//evil.example.com/"));
        assert!(!is_server_relative("https://evil.example.com/"));
        assert!(!is_server_relative(""));
    }

    #[test]
    fn urls_that_browsers_collapse_to_another_host_are_not_server_relative() {
        for then in [
            "/\t/evil.example.com/",
            "/\r\n/evil.example.com/",
            "/\n/evil.example.com/",
            "/\\evil.example.com/",
            "/ /evil.example.com/",
            "/oauth/authorize?then=\u{7f}",
        ] {
            assert!(!is_server_relative(then), "{then:?}");
        }
        assert!(is_server_relative("/oauth/authorize?scope=user%3Ainfo%20user%3Afull"));
    }

    #[test]
    fn set_query_param_replaces_existing() {
        assert_eq!(
            set_query_param("/oauth/authorize?client_id=a&scope=user%3Afull", "scope", "user:info")
                .unwrap(),
            "/oauth/authorize?client_id=a&scope=user%3Ainfo"
        );
    }

    #[test]
    fn fragment_redirect() {
        let response = redirect_with(
            "https://client.example.com/cb",
            &[("access_token", "t"), ("token_type", "Bearer")],
            true,
        )
        .unwrap();
        assert_eq!(
            location(&response),
            "https://client.example.com/cb#access_token=t&token_type=Bearer"
        );
    }

    #[test]
    fn error_redirect_carries_state() {
        let err = ProtocolError::new(ErrorCode::AccessDenied, "scope denied: user:full");
        let response = error_redirect("https://client.example.com/cb", "xyz", &err, false);
        let loc = location(&response);
        assert!(loc.contains("error=access_denied"));
        assert!(loc.contains("state=xyz"));
        assert!(loc.contains("error_description=scope+denied%3A+user%3Afull"));
    }
}
