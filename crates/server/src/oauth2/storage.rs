//! Adapter between the protocol engine and the object stores.
//!
//! Loading a code or token re-reads its client and re-checks the stored
//! scopes against the client's *current* restrictions, so tightening a
//! client invalidates outstanding grants immediately.

use std::sync::Arc;

use thiserror::Error;

use super::request::{AccessData, AuthorizeData, Client};
use crate::error::StoreError;
use crate::model::{ObjectMeta, OAuthAccessToken, OAuthAuthorizeToken};
use crate::retry::{Backoff, retry_on_conflict};
use crate::scope::{self, RestrictionError, validate_scope_restrictions};
use crate::storage::Stores;
use crate::user::{ConversionError, UserConversion};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Scope restrictions no longer allow this grant: {0}")]
    Restriction(#[from] RestrictionError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("{0} is not supported")]
    NotImplemented(&'static str),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Store(err) if err.is_not_found())
    }

    /// Failures that mean "this grant is not usable" rather than "the
    /// backend is broken".
    pub fn is_invalid_grant(&self) -> bool {
        match self {
            StorageError::Store(err) => err.is_not_found(),
            StorageError::Restriction(_)
            | StorageError::Conversion(_)
            | StorageError::NotImplemented(_) => true,
        }
    }
}

pub struct RegistryStorage {
    stores: Stores,
    users: Arc<dyn UserConversion>,
}

impl RegistryStorage {
    pub fn new(stores: Stores, users: Arc<dyn UserConversion>) -> Self {
        Self { stores, users }
    }

    pub async fn get_client(&self, id: &str) -> Result<Client, StorageError> {
        Ok(Client::new(self.stores.clients.get(id).await?))
    }

    pub async fn save_authorize(&self, data: &AuthorizeData) -> Result<(), StorageError> {
        let token = self.convert_to_authorize_token(data)?;
        self.stores.authorize_tokens.create(token).await?;
        Ok(())
    }

    pub async fn load_authorize(&self, code: &str) -> Result<AuthorizeData, StorageError> {
        let token = self.stores.authorize_tokens.get(code).await?;
        let client = self.get_client(&token.client_name).await?;
        validate_scope_restrictions(client.record(), &token.scopes)?;
        self.convert_from_authorize_token(token, client)
    }

    pub async fn remove_authorize(&self, code: &str) -> Result<(), StorageError> {
        self.stores.authorize_tokens.delete(code, None).await?;
        Ok(())
    }

    pub async fn save_access(&self, data: &AccessData) -> Result<(), StorageError> {
        let token = self.convert_to_access_token(data)?;
        self.stores.access_tokens.create(token).await?;
        Ok(())
    }

    pub async fn load_access(&self, token: &str) -> Result<AccessData, StorageError> {
        let stored = self.stores.access_tokens.get(token).await?;
        let client = self.get_client(&stored.client_name).await?;
        validate_scope_restrictions(client.record(), &stored.scopes)?;
        self.convert_from_access_token(stored, client)
    }

    pub async fn remove_access(&self, token: &str) -> Result<(), StorageError> {
        self.stores.access_tokens.delete(token, None).await?;
        Ok(())
    }

    pub async fn load_refresh(&self, _token: &str) -> Result<AccessData, StorageError> {
        Err(StorageError::NotImplemented("refresh tokens"))
    }

    pub async fn remove_refresh(&self, _token: &str) -> Result<(), StorageError> {
        Err(StorageError::NotImplemented("refresh tokens"))
    }

    /// Pushes a token's inactivity deadline out to `timeout_seconds` after creation.
    pub async fn extend_inactivity_timeout(
        &self,
        token: &str,
        timeout_seconds: i64,
    ) -> Result<(), StorageError> {
        retry_on_conflict(Backoff::CONFLICT, || async move {
            let mut stored = self.stores.access_tokens.get(token).await?;
            if stored
                .inactivity_timeout_seconds
                .is_some_and(|current| current >= timeout_seconds)
            {
                return Ok(());
            }
            stored.inactivity_timeout_seconds = Some(timeout_seconds);
            self.stores.access_tokens.update(stored).await.map(|_| ())
        })
        .await?;
        Ok(())
    }

    pub fn convert_to_authorize_token(
        &self,
        data: &AuthorizeData,
    ) -> Result<OAuthAuthorizeToken, StorageError> {
        let mut meta = ObjectMeta::named(&data.code);
        meta.creation_timestamp = data.created_at;
        let mut token = OAuthAuthorizeToken {
            meta,
            client_name: data.client.id().to_owned(),
            expires_in: data.expires_in,
            scopes: scope::split(&data.scope),
            redirect_uri: data.redirect_uri.clone(),
            state: data.state.clone(),
            user_name: String::new(),
            user_uid: String::new(),
            code_challenge: data.code_challenge.clone(),
            code_challenge_method: data.code_challenge_method.clone(),
        };
        self.users.convert_to_authorize_token(&data.user, &mut token)?;
        Ok(token)
    }

    pub fn convert_from_authorize_token(
        &self,
        token: OAuthAuthorizeToken,
        client: Client,
    ) -> Result<AuthorizeData, StorageError> {
        let user = self.users.convert_from_authorize_token(&token)?;
        Ok(AuthorizeData {
            code: token.meta.name,
            client,
            expires_in: token.expires_in,
            scope: scope::join(&token.scopes),
            redirect_uri: token.redirect_uri,
            state: token.state,
            created_at: token.meta.creation_timestamp,
            user,
            code_challenge: token.code_challenge,
            code_challenge_method: token.code_challenge_method,
        })
    }

    pub fn convert_to_access_token(
        &self,
        data: &AccessData,
    ) -> Result<OAuthAccessToken, StorageError> {
        let mut meta = ObjectMeta::named(&data.access_token);
        meta.creation_timestamp = data.created_at;
        let mut token = OAuthAccessToken {
            meta,
            client_name: data.client.id().to_owned(),
            expires_in: data.expires_in,
            scopes: scope::split(&data.scope),
            redirect_uri: data.redirect_uri.clone(),
            user_name: String::new(),
            user_uid: String::new(),
            authorize_token: data.authorize_code.clone().unwrap_or_default(),
            refresh_token: data.refresh_token.clone().unwrap_or_default(),
            inactivity_timeout_seconds: data.inactivity_timeout_seconds,
        };
        self.users.convert_to_access_token(&data.user, &mut token)?;
        Ok(token)
    }

    pub fn convert_from_access_token(
        &self,
        token: OAuthAccessToken,
        client: Client,
    ) -> Result<AccessData, StorageError> {
        let user = self.users.convert_from_access_token(&token)?;
        Ok(AccessData {
            client,
            authorize_code: Some(token.authorize_token).filter(|c| !c.is_empty()),
            access_token: token.meta.name,
            refresh_token: Some(token.refresh_token).filter(|r| !r.is_empty()),
            expires_in: token.expires_in,
            scope: scope::join(&token.scopes),
            redirect_uri: token.redirect_uri,
            created_at: token.meta.creation_timestamp,
            user,
            inactivity_timeout_seconds: token.inactivity_timeout_seconds,
        })
    }
}
