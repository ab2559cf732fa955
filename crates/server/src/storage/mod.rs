//! Keyed object storage with optimistic concurrency.
//!
//! Writes go through [`ObjectStore::update`], which only succeeds when the
//! caller's `resource_version` still matches the stored one. A stale write is
//! reported as [`StoreError::Conflict`] and is expected to be retried by the
//! caller (see [`crate::retry`]).

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::DatabaseConnection;

use crate::error::StoreError;
use crate::model::{
    OAuthAccessToken, OAuthAuthorizeToken, OAuthClient, OAuthClientAuthorization, StoredObject,
};

pub mod database;
pub mod memory;

pub use database::DatabaseStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait ObjectStore<T: StoredObject>: Send + Sync {
    async fn get(&self, name: &str) -> Result<T, StoreError>;

    /// Persists a new object, assigning a fresh UID and resource version.
    async fn create(&self, object: T) -> Result<T, StoreError>;

    /// Replaces an existing object. Fails with `Conflict` when the stored
    /// resource version differs from `object.meta().resource_version`.
    async fn update(&self, object: T) -> Result<T, StoreError>;

    /// Removes an object. With `precondition_uid` set, only removes the
    /// incarnation with that UID and reports `Conflict` otherwise.
    async fn delete(&self, name: &str, precondition_uid: Option<&str>) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<T>, StoreError>;
}

/// The four stores the server works with.
#[derive(Clone)]
pub struct Stores {
    pub clients: Arc<dyn ObjectStore<OAuthClient>>,
    pub authorize_tokens: Arc<dyn ObjectStore<OAuthAuthorizeToken>>,
    pub access_tokens: Arc<dyn ObjectStore<OAuthAccessToken>>,
    pub client_authorizations: Arc<dyn ObjectStore<OAuthClientAuthorization>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            clients: Arc::new(MemoryStore::new()),
            authorize_tokens: Arc::new(MemoryStore::new()),
            access_tokens: Arc::new(MemoryStore::new()),
            client_authorizations: Arc::new(MemoryStore::new()),
        }
    }

    pub fn database(db: Arc<DatabaseConnection>) -> Self {
        Self {
            clients: Arc::new(DatabaseStore::new(db.clone())),
            authorize_tokens: Arc::new(DatabaseStore::new(db.clone())),
            access_tokens: Arc::new(DatabaseStore::new(db.clone())),
            client_authorizations: Arc::new(DatabaseStore::new(db)),
        }
    }
}

pub(crate) fn invalid<T: StoredObject>(object: &T, reason: String) -> StoreError {
    StoreError::Invalid {
        kind: T::KIND,
        name: object.meta().name.clone(),
        reason,
    }
}

pub(crate) fn not_found<T: StoredObject>(name: &str) -> StoreError {
    StoreError::NotFound {
        kind: T::KIND,
        name: name.to_owned(),
    }
}

pub(crate) fn conflict<T: StoredObject>(name: &str) -> StoreError {
    StoreError::Conflict {
        kind: T::KIND,
        name: name.to_owned(),
    }
}
