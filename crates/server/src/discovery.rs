//! OAuth 2.0 Authorization Server Metadata (RFC 8414).

use std::path::Path;
use std::sync::Arc;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api::MISC_TAG;
use crate::oauth2::endpoints::{AUTHORIZE_PATH, TOKEN_PATH};
use crate::oauth2::pkce::CodeChallengeMethod;
use crate::scope;

pub const DISCOVERY_PATH: &str = "/.well-known/oauth-authorization-server";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read discovery document: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse discovery document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} must be an absolute URL, got {value:?}")]
    NotAbsolute { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OAuthServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub scopes_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

impl OAuthServerMetadata {
    /// Metadata for a server whose public URL is `issuer` and whose OAuth
    /// endpoints live below `api_prefix`.
    pub fn new(issuer: &str, api_prefix: &str) -> Self {
        let issuer = issuer.trim_end_matches('/');
        Self {
            issuer: issuer.to_owned(),
            authorization_endpoint: format!("{issuer}{api_prefix}{AUTHORIZE_PATH}"),
            token_endpoint: format!("{issuer}{api_prefix}{TOKEN_PATH}"),
            scopes_supported: vec![
                scope::USER_FULL.into(),
                scope::USER_INFO.into(),
                scope::USER_CHECK_ACCESS.into(),
                scope::USER_LIST_SCOPED_PROJECTS.into(),
                scope::USER_LIST_ALL_PROJECTS.into(),
            ],
            response_types_supported: vec!["code".into(), "token".into()],
            grant_types_supported: vec!["authorization_code".into(), "implicit".into()],
            code_challenge_methods_supported: vec![
                CodeChallengeMethod::Plain.as_str().into(),
                CodeChallengeMethod::S256.as_str().into(),
            ],
        }
    }

    /// Reads an operator supplied document instead of deriving one.
    pub fn load(path: &Path) -> Result<Self, DiscoveryError> {
        let contents = std::fs::read_to_string(path)?;
        let metadata: Self = serde_json::from_str(&contents)?;
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn validate(&self) -> Result<(), DiscoveryError> {
        for (field, value) in [
            ("issuer", &self.issuer),
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
        ] {
            let absolute = url::Url::parse(value)
                .is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.has_host());
            if !absolute {
                return Err(DiscoveryError::NotAbsolute {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

pub fn router(metadata: Arc<OAuthServerMetadata>) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(discovery))
        .with_state(metadata)
}

/// Authorization server metadata document.
#[utoipa::path(
    get,
    path = "/.well-known/oauth-authorization-server",
    tag = MISC_TAG,
    operation_id = "OAuth Discovery",
    summary = "OAuth 2.0 Authorization Server Metadata",
    description = "Describes the authorize and token endpoints, the supported scopes, \
                   response types, grant types and PKCE methods (RFC 8414).",
    responses(
        (status = 200, description = "Metadata document", body = OAuthServerMetadata)
    )
)]
pub async fn discovery(State(metadata): State<Arc<OAuthServerMetadata>>) -> Json<OAuthServerMetadata> {
    Json(metadata.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_metadata_points_at_prefix() {
        let metadata = OAuthServerMetadata::new("https://auth.example.com/", "/oauth");
        assert_eq!(metadata.issuer, "https://auth.example.com");
        assert_eq!(
            metadata.authorization_endpoint,
            "https://auth.example.com/oauth/authorize"
        );
        assert_eq!(metadata.token_endpoint, "https://auth.example.com/oauth/token");
        assert!(metadata.validate().is_ok());
        assert_eq!(metadata.code_challenge_methods_supported, vec!["plain", "S256"]);
    }

    #[test]
    fn relative_endpoints_are_rejected() {
        let mut metadata = OAuthServerMetadata::new("https://auth.example.com", "/oauth");
        metadata.token_endpoint = "/oauth/token".into();
        assert!(matches!(
            metadata.validate(),
            Err(DiscoveryError::NotAbsolute {
                field: "token_endpoint",
                ..
            })
        ));
    }
}
