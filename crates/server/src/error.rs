use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Errors surfaced by an [`ObjectStore`](crate::storage::ObjectStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error(
        "Operation cannot be fulfilled on {kind} \"{name}\": the object has been modified; please apply your changes to the latest version and try again"
    )]
    Conflict { kind: &'static str, name: String },
    #[error("{kind} \"{name}\" is invalid: {reason}")]
    Invalid {
        kind: &'static str,
        name: String,
        reason: String,
    },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("Corrupt object payload: {err}"))
    }
}

/// RFC 6749 error codes the protocol engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRequest,
    UnauthorizedClient,
    AccessDenied,
    UnsupportedResponseType,
    InvalidScope,
    ServerError,
    TemporarilyUnavailable,
    UnsupportedGrantType,
    InvalidGrant,
    InvalidClient,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::UnauthorizedClient => "unauthorized_client",
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::UnsupportedResponseType => "unsupported_response_type",
            ErrorCode::InvalidScope => "invalid_scope",
            ErrorCode::ServerError => "server_error",
            ErrorCode::TemporarilyUnavailable => "temporarily_unavailable",
            ErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            ErrorCode::InvalidGrant => "invalid_grant",
            ErrorCode::InvalidClient => "invalid_client",
        }
    }

    /// Status used when the error is rendered directly instead of redirected.
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::TemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InvalidClient => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An OAuth2 protocol error: a code plus an optional human readable description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}{}", .description.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub description: Option<String>,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }

    pub fn bare(code: ErrorCode) -> Self {
        Self {
            code,
            description: None,
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidGrant, description)
    }

    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::AccessDenied, description)
    }

    pub fn server_error() -> Self {
        Self::bare(ErrorCode::ServerError)
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Timeout after {0:?} while contacting identity provider")]
    Timeout(std::time::Duration),
    #[error("HTTP {status} from identity provider: {context}")]
    Http { status: u16, context: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid provider claims: {0}")]
    Claims(String),
    #[error("Identity provider returned {error}")]
    Denied {
        error: String,
        description: Option<String>,
    },
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ProviderError::Http {
                status: status.as_u16(),
                context: err.to_string(),
            },
            None if err.is_decode() => ProviderError::Claims(err.to_string()),
            None => ProviderError::Network(err.to_string()),
        }
    }
}

/// Failures while establishing who is making a request.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Invalid state parameter")]
    InvalidState,
    #[error("Could not map identity: {0}")]
    Mapping(String),
    #[error("Session error: {0}")]
    Session(String),
    #[error("Authentication backend error: {0}")]
    Backend(String),
}

/// One offending entry in a scope list. Indices refer to the position in the
/// submitted list so callers can point at the bad value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("scopes: Required value: may not be empty")]
    Required,
    #[error("scopes[{index}]: Invalid value: {value:?}: {reason}")]
    Invalid {
        index: usize,
        value: String,
        reason: String,
    },
}

/// Aggregate of every scope validation failure found in one list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ScopeErrors(pub Vec<ScopeError>);

impl fmt::Display for ScopeErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        match rendered.len() {
            1 => f.write_str(&rendered[0]),
            _ => write!(f, "[{}]", rendered.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display_includes_description() {
        let err = ProtocolError::invalid_grant("code expired");
        assert_eq!(err.to_string(), "invalid_grant: code expired");
        assert_eq!(ProtocolError::server_error().to_string(), "server_error");
    }

    #[test]
    fn error_code_status_mapping() {
        assert_eq!(ErrorCode::InvalidClient.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ErrorCode::ServerError.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ErrorCode::InvalidScope.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_error_predicates() {
        let conflict = StoreError::Conflict {
            kind: "OAuthClient",
            name: "web".into(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());
    }

    #[test]
    fn scope_errors_render_index() {
        let errs = ScopeErrors(vec![ScopeError::Invalid {
            index: 2,
            value: "bad scope".into(),
            reason: "' ' not allowed".into(),
        }]);
        assert!(errs.to_string().starts_with("scopes[2]: Invalid value"));
    }
}
