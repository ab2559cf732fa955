//! Client authorization grants: checking for prior approval and the consent
//! web flow that records new approvals.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::StoreError;
use crate::oauth2::request::Client;
use crate::user::UserInfo;

pub mod checker;
pub mod consent;

pub use checker::ClientAuthorizationGrantChecker;

/// What a client is asking a user to approve.
#[derive(Debug, Clone)]
pub struct Grant {
    pub client: Client,
    pub scope: String,
    pub expiration: i64,
    pub redirect_uri: String,
}

#[derive(Debug, Error)]
pub enum GrantCheckError {
    #[error("user UID is empty, grant flows are not supported for this principal")]
    EmptyUid,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait GrantChecker: Send + Sync {
    /// True when `user` has already approved every scope in `grant`.
    async fn has_authorized_client(
        &self,
        user: &UserInfo,
        grant: &Grant,
    ) -> Result<bool, GrantCheckError>;
}
