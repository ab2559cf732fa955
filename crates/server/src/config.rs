use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::external::OpenIdConfig;
use crate::model::{
    GrantMethod, MAX_TOKEN_LIFETIME_SECONDS, OAuthClient, ScopeRestriction, StoredObject,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// sea-orm connection string, or `memory` for the in-process store.
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub oauth: OAuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Public URL of this server; also the issuer in the discovery document.
    pub master_public_url: String,
    #[serde(default)]
    pub grant_method: GrantMethod,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub identity_providers: Vec<IdentityProviderConfig>,
    #[serde(default)]
    pub always_show_provider_selection: bool,
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_seconds: u64,
    #[serde(default)]
    pub discovery_file: Option<PathBuf>,
    #[serde(default)]
    pub clients: Vec<ClientSeed>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub authorize_token_max_age_seconds: i64,
    pub access_token_max_age_seconds: i64,
    pub access_token_inactivity_timeout_seconds: Option<i64>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            authorize_token_max_age_seconds: 300,
            access_token_max_age_seconds: 86400,
            access_token_inactivity_timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub name: String,
    pub max_age_seconds: i64,
    pub bootstrap_max_age_seconds: i64,
    /// File with one base64 secret per line; generated at start-up when unset.
    pub secrets_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "ssn".into(),
            max_age_seconds: 300,
            bootstrap_max_age_seconds: 3600,
            secrets_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BootstrapConfig {
    pub password_hash_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityProviderConfig {
    pub name: String,
    /// Offer this provider to browsers that need to log in.
    #[serde(default = "default_true")]
    pub login: bool,
    /// Answer non-browser clients with this provider's challenge.
    #[serde(default = "default_true")]
    pub challenge: bool,
    pub provider: ProviderKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderKind {
    AllowAll,
    DenyAll,
    Htpasswd {
        file: PathBuf,
    },
    RequestHeader {
        headers: Vec<String>,
        #[serde(default)]
        name_headers: Vec<String>,
        #[serde(default)]
        email_headers: Vec<String>,
        #[serde(default)]
        preferred_username_headers: Vec<String>,
        #[serde(default)]
        login_url: Option<String>,
        #[serde(default)]
        challenge_url: Option<String>,
    },
    Openid(OpenIdConfig),
}

impl ProviderKind {
    /// Password providers get a login form and basic-auth challenges.
    pub fn uses_password(&self) -> bool {
        matches!(
            self,
            ProviderKind::AllowAll | ProviderKind::DenyAll | ProviderKind::Htpasswd { .. }
        )
    }
}

/// An OAuth client registered at start-up.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSeed {
    pub name: String,
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
    #[serde(default)]
    pub access_token_max_age_seconds: Option<i64>,
    #[serde(default)]
    pub access_token_inactivity_timeout_seconds: Option<i64>,
}

impl ClientSeed {
    pub fn to_client(&self) -> OAuthClient {
        let mut client = OAuthClient::new(&self.name);
        client.secret = self.secret.clone();
        client.additional_secrets = self.additional_secrets.clone();
        client.respond_with_challenges = self.respond_with_challenges;
        client.redirect_uris = self.redirect_uris.clone();
        client.grant_method = self.grant_method;
        client.scope_restrictions = self.scope_restrictions.clone();
        client.access_token_max_age_seconds = self.access_token_max_age_seconds;
        client.access_token_inactivity_timeout_seconds =
            self.access_token_inactivity_timeout_seconds;
        client
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".into()
}

fn default_api_prefix() -> String {
    "/oauth".into()
}

fn default_provider_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl OAuthConfig {
    /// Session and CSRF cookies are `Secure` when the server is reached over
    /// https.
    pub fn secure_cookies(&self) -> bool {
        self.master_public_url.starts_with("https://")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let issuer = url::Url::parse(&self.master_public_url).map_err(|e| {
            ConfigError::Validation(format!("oauth.master_public_url: {e}"))
        })?;
        if !matches!(issuer.scheme(), "http" | "https") || !issuer.has_host() {
            return Err(ConfigError::Validation(
                "oauth.master_public_url must be an absolute http(s) URL".into(),
            ));
        }
        if !self.api_prefix.starts_with('/') || self.api_prefix.ends_with('/') {
            return Err(ConfigError::Validation(
                "oauth.api_prefix must start with '/' and not end with '/'".into(),
            ));
        }
        let lifetimes = [
            (
                "oauth.token.authorize_token_max_age_seconds",
                Some(self.token.authorize_token_max_age_seconds),
            ),
            (
                "oauth.token.access_token_max_age_seconds",
                Some(self.token.access_token_max_age_seconds),
            ),
            (
                "oauth.token.access_token_inactivity_timeout_seconds",
                self.token.access_token_inactivity_timeout_seconds,
            ),
            ("oauth.session.max_age_seconds", Some(self.session.max_age_seconds)),
            (
                "oauth.session.bootstrap_max_age_seconds",
                Some(self.session.bootstrap_max_age_seconds),
            ),
        ];
        for (key, value) in lifetimes {
            if value.is_some_and(|v| !(1..=MAX_TOKEN_LIFETIME_SECONDS).contains(&v)) {
                return Err(ConfigError::Validation(format!(
                    "{key} must be between 1 and {MAX_TOKEN_LIFETIME_SECONDS}"
                )));
            }
        }
        if self.provider_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "oauth.provider_timeout_seconds must be > 0".into(),
            ));
        }

        let mut names = HashSet::new();
        for provider in &self.identity_providers {
            if provider.name.is_empty() {
                return Err(ConfigError::Validation(
                    "identity provider names may not be empty".into(),
                ));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate identity provider name {:?}",
                    provider.name
                )));
            }
        }

        let mut seeds = HashSet::new();
        for seed in &self.clients {
            if !seeds.insert(seed.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate client {:?}",
                    seed.name
                )));
            }
            seed.to_client()
                .validate()
                .map_err(|e| ConfigError::Validation(format!("client {:?}: {e}", seed.name)))?;
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` (or the file named by
/// `CONFIG_FILE`) plus environment overrides.
///
/// Any environment variable matching the key path separated by double
/// underscores (e.g. `OAUTH__API_PREFIX`) overrides the file value. A `.env`
/// file is read first when present.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};

    let _ = dotenvy::dotenv();
    let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yaml".into());
    let cfg = Config::builder()
        .add_source(File::with_name(&path))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.oauth.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
