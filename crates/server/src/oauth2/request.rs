//! Protocol-level request and grant data.

use std::str::FromStr;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use super::pkce::CodeChallengeMethod;
use crate::model::OAuthClient;
use crate::user::UserInfo;

/// A registered client as seen by the protocol engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Client(Arc<OAuthClient>);

impl Client {
    pub fn new(record: OAuthClient) -> Self {
        Self(Arc::new(record))
    }

    pub fn id(&self) -> &str {
        self.0.name()
    }

    pub fn record(&self) -> &OAuthClient {
        &self.0
    }

    pub fn redirect_uris(&self) -> &[String] {
        &self.0.redirect_uris
    }

    pub fn secret_matches(&self, candidate: &str) -> bool {
        self.0.secret_matches(candidate)
    }

    /// Access token lifetime for this client. Zero means no expiry.
    pub fn access_token_max_age(&self, default: i64) -> i64 {
        self.0.access_token_max_age_seconds.unwrap_or(default)
    }

    /// Inactivity timeout for this client's tokens. A client override of zero
    /// disables the timeout.
    pub fn access_token_inactivity_timeout(&self, default: Option<i64>) -> Option<i64> {
        match self.0.access_token_inactivity_timeout_seconds {
            Some(0) => None,
            Some(timeout) => Some(timeout),
            None => default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Code,
    Token,
}

impl ResponseType {
    /// Implicit-flow responses travel in the URI fragment.
    pub fn uses_fragment(&self) -> bool {
        matches!(self, ResponseType::Token)
    }
}

impl FromStr for ResponseType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(ResponseType::Code),
            "token" => Ok(ResponseType::Token),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub response_type: ResponseType,
    pub client: Client,
    pub scope: String,
    pub redirect_uri: String,
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    /// Lifetime in seconds of the code or token that will be issued.
    pub expiration: i64,
    pub authorized: bool,
    pub user: Option<UserInfo>,
}

/// A stored authorization code.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizeData {
    pub code: String,
    pub client: Client,
    pub expires_in: i64,
    pub scope: String,
    pub redirect_uri: String,
    pub state: String,
    pub created_at: OffsetDateTime,
    pub user: UserInfo,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// `created + seconds`, or `None` past the last representable instant.
fn deadline(created: OffsetDateTime, seconds: i64) -> Option<OffsetDateTime> {
    created.checked_add(Duration::seconds(seconds))
}

impl AuthorizeData {
    /// `None` when the lifetime runs past the end of the calendar.
    pub fn expire_at(&self) -> Option<OffsetDateTime> {
        deadline(self.created_at, self.expires_in)
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expire_at().is_some_and(|at| at < now)
    }

    pub fn remaining_seconds(&self, now: OffsetDateTime) -> i64 {
        match self.expire_at() {
            Some(at) => (at - now).whole_seconds().max(0),
            None => self.expires_in,
        }
    }
}

/// A stored access token.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessData {
    pub client: Client,
    pub authorize_code: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Zero means the token never expires.
    pub expires_in: i64,
    pub scope: String,
    pub redirect_uri: String,
    pub created_at: OffsetDateTime,
    pub user: UserInfo,
    /// Seconds after `created_at` at which the token lapses unless used.
    pub inactivity_timeout_seconds: Option<i64>,
}

impl AccessData {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_in > 0
            && deadline(self.created_at, self.expires_in).is_some_and(|at| at < now)
    }

    pub fn is_inactive_at(&self, now: OffsetDateTime) -> bool {
        self.inactivity_timeout_seconds
            .is_some_and(|t| t > 0 && deadline(self.created_at, t).is_some_and(|at| at < now))
    }

    /// Seconds until expiry, or zero for tokens that never expire.
    pub fn remaining_seconds(&self, now: OffsetDateTime) -> i64 {
        if self.expires_in == 0 {
            return 0;
        }
        match deadline(self.created_at, self.expires_in) {
            Some(at) => (at - now).whole_seconds().max(0),
            None => self.expires_in,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    Password,
    Assertion,
    ClientCredentials,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::Password => "password",
            GrantType::Assertion => "assertion",
            GrantType::ClientCredentials => "client_credentials",
        }
    }
}

impl FromStr for GrantType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "password" => Ok(GrantType::Password),
            "assertion" => Ok(GrantType::Assertion),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub grant_type: GrantType,
    pub client: Client,
    pub authorize_data: Option<AuthorizeData>,
    pub redirect_uri: String,
    pub scope: String,
    pub username: String,
    pub password: String,
    pub assertion_type: String,
    pub assertion: String,
    pub authorized: bool,
    pub generate_refresh: bool,
    pub expiration: i64,
    pub user: Option<UserInfo>,
}

impl AccessRequest {
    pub fn new(grant_type: GrantType, client: Client, expiration: i64) -> Self {
        Self {
            grant_type,
            client,
            authorize_data: None,
            redirect_uri: String::new(),
            scope: String::new(),
            username: String::new(),
            password: String::new(),
            assertion_type: String::new(),
            assertion: String::new(),
            authorized: false,
            generate_refresh: false,
            expiration,
            user: None,
        }
    }
}
