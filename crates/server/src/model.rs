//! Persisted OAuth objects.
//!
//! Every object carries an [`ObjectMeta`] with a stable name, a UID that is
//! unique per incarnation and a resource version used for optimistic
//! concurrency.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

/// Minimum length of a stored authorize or access token name.
pub const MIN_TOKEN_LENGTH: usize = 32;

/// Lowest accepted per-client or per-token inactivity timeout, in seconds.
pub const MIN_INACTIVITY_TIMEOUT_SECONDS: i64 = 300;

/// Upper bound for any token lifetime or inactivity timeout, in seconds
/// (100 years).
pub const MAX_TOKEN_LIFETIME_SECONDS: i64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_timestamp: OffsetDateTime,
}

impl ObjectMeta {
    /// Metadata for an object that has not been persisted yet.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: String::new(),
            resource_version: 0,
            creation_timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Implemented by everything an [`ObjectStore`](crate::storage::ObjectStore) can hold.
pub trait StoredObject:
    Clone + Serialize + serde::de::DeserializeOwned + Send + Sync + 'static
{
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Object-specific checks run before every write.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantMethod {
    Auto,
    #[default]
    Prompt,
    Deny,
}

impl FromStr for GrantMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(GrantMethod::Auto),
            "prompt" => Ok(GrantMethod::Prompt),
            "deny" => Ok(GrantMethod::Deny),
            other => Err(format!("unknown grant method {other:?}")),
        }
    }
}

impl fmt::Display for GrantMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GrantMethod::Auto => "auto",
            GrantMethod::Prompt => "prompt",
            GrantMethod::Deny => "deny",
        })
    }
}

/// Limits which scopes a client may ever request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeRestriction {
    ExactValues(Vec<String>),
    ClusterRole {
        role_names: Vec<String>,
        namespaces: Vec<String>,
        #[serde(default)]
        allow_escalation: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClient {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub additional_secrets: Vec<String>,
    #[serde(default)]
    pub respond_with_challenges: bool,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_method: Option<GrantMethod>,
    #[serde(default)]
    pub scope_restrictions: Vec<ScopeRestriction>,
    /// `Some(0)` means tokens for this client never expire.
    #[serde(default)]
    pub access_token_max_age_seconds: Option<i64>,
    /// `Some(0)` disables the inactivity timeout for this client.
    #[serde(default)]
    pub access_token_inactivity_timeout_seconds: Option<i64>,
}

impl OAuthClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: ObjectMeta::named(name),
            secret: String::new(),
            additional_secrets: Vec::new(),
            respond_with_challenges: false,
            redirect_uris: Vec::new(),
            grant_method: None,
            scope_restrictions: Vec::new(),
            access_token_max_age_seconds: None,
            access_token_inactivity_timeout_seconds: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Compares `candidate` against the primary and every additional secret
    /// without short-circuiting on the first mismatching byte. A client with
    /// an empty primary secret is public and matches an empty candidate.
    pub fn secret_matches(&self, candidate: &str) -> bool {
        let mut matched = self.secret.as_bytes().ct_eq(candidate.as_bytes());
        for secret in &self.additional_secrets {
            if secret.is_empty() {
                continue;
            }
            matched |= secret.as_bytes().ct_eq(candidate.as_bytes());
        }
        matched.into()
    }
}

impl StoredObject for OAuthClient {
    const KIND: &'static str = "OAuthClient";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), String> {
        if self.meta.name.is_empty() {
            return Err("name is required".into());
        }
        for uri in &self.redirect_uris {
            url::Url::parse(uri).map_err(|e| format!("redirectURIs: {uri:?}: {e}"))?;
        }
        for restriction in &self.scope_restrictions {
            match restriction {
                ScopeRestriction::ExactValues(values) if values.is_empty() => {
                    return Err("scopeRestrictions: literals may not be empty".into());
                }
                ScopeRestriction::ClusterRole {
                    role_names,
                    namespaces,
                    ..
                } if role_names.is_empty() || namespaces.is_empty() => {
                    return Err(
                        "scopeRestrictions: clusterRole needs role names and namespaces".into(),
                    );
                }
                _ => {}
            }
        }
        if self
            .access_token_max_age_seconds
            .is_some_and(|v| !(0..=MAX_TOKEN_LIFETIME_SECONDS).contains(&v))
        {
            return Err(format!(
                "accessTokenMaxAgeSeconds must be between 0 and {MAX_TOKEN_LIFETIME_SECONDS}"
            ));
        }
        if let Some(timeout) = self.access_token_inactivity_timeout_seconds
            && timeout != 0
            && !(MIN_INACTIVITY_TIMEOUT_SECONDS..=MAX_TOKEN_LIFETIME_SECONDS).contains(&timeout)
        {
            return Err(format!(
                "accessTokenInactivityTimeoutSeconds must be 0 or between {MIN_INACTIVITY_TIMEOUT_SECONDS} and {MAX_TOKEN_LIFETIME_SECONDS}"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthAuthorizeToken {
    pub meta: ObjectMeta,
    pub client_name: String,
    pub expires_in: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    #[serde(default)]
    pub state: String,
    pub user_name: String,
    pub user_uid: String,
    #[serde(default)]
    pub code_challenge: String,
    #[serde(default)]
    pub code_challenge_method: String,
}

impl StoredObject for OAuthAuthorizeToken {
    const KIND: &'static str = "OAuthAuthorizeToken";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), String> {
        validate_token_name(&self.meta.name)?;
        if self.client_name.is_empty() {
            return Err("clientName is required".into());
        }
        if self.user_name.is_empty() || self.user_uid.is_empty() {
            return Err("userName and userUID are required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthAccessToken {
    pub meta: ObjectMeta,
    pub client_name: String,
    pub expires_in: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub redirect_uri: String,
    pub user_name: String,
    pub user_uid: String,
    #[serde(default)]
    pub authorize_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub inactivity_timeout_seconds: Option<i64>,
}

impl StoredObject for OAuthAccessToken {
    const KIND: &'static str = "OAuthAccessToken";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), String> {
        validate_token_name(&self.meta.name)?;
        if !self.authorize_token.is_empty() && self.authorize_token.len() < MIN_TOKEN_LENGTH {
            return Err(format!(
                "authorizeToken must be at least {MIN_TOKEN_LENGTH} characters"
            ));
        }
        if self.user_name.is_empty() || self.user_uid.is_empty() {
            return Err("userName and userUID are required".into());
        }
        Ok(())
    }
}

/// Record of the scopes a user has approved for a client. The name is always
/// `"{user_name}:{client_name}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClientAuthorization {
    pub meta: ObjectMeta,
    pub client_name: String,
    pub user_name: String,
    pub user_uid: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl OAuthClientAuthorization {
    pub fn new(user_name: &str, user_uid: &str, client_name: &str, scopes: Vec<String>) -> Self {
        Self {
            meta: ObjectMeta::named(client_authorization_name(user_name, client_name)),
            client_name: client_name.to_owned(),
            user_name: user_name.to_owned(),
            user_uid: user_uid.to_owned(),
            scopes,
        }
    }
}

impl StoredObject for OAuthClientAuthorization {
    const KIND: &'static str = "OAuthClientAuthorization";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), String> {
        if self.meta.name != client_authorization_name(&self.user_name, &self.client_name) {
            return Err("name must be userName:clientName".into());
        }
        if self.user_uid.is_empty() {
            return Err("userUID is required".into());
        }
        Ok(())
    }
}

pub fn client_authorization_name(user_name: &str, client_name: &str) -> String {
    format!("{user_name}:{client_name}")
}

fn validate_token_name(name: &str) -> Result<(), String> {
    if name.len() < MIN_TOKEN_LENGTH {
        return Err(format!("name must be at least {MIN_TOKEN_LENGTH} characters"));
    }
    Ok(())
}
