//! External identities and how they map onto users.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::AuthError;
use crate::user::UserInfo;

/// Normalized identity as reported by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderIdentity {
    pub provider_name: String,
    /// Stable subject at the provider.
    pub provider_user_name: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
    pub groups: Vec<String>,
}

impl ProviderIdentity {
    pub fn new(provider_name: impl Into<String>, provider_user_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            provider_user_name: provider_user_name.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.provider_name, self.provider_user_name)
    }
}

#[async_trait]
pub trait IdentityMapper: Send + Sync {
    async fn user_for(&self, identity: &ProviderIdentity) -> Result<UserInfo, AuthError>;
}

/// Maps identities to users by name. The preferred username (or, failing
/// that, the provider subject) becomes the user name, and an existing user of
/// that name claims the identity. UIDs are assigned on first sight.
#[derive(Default)]
pub struct ClaimIdentityMapper {
    users: DashMap<String, UserInfo>,
    identities: DashMap<String, String>,
}

impl ClaimIdentityMapper {
    pub fn new() -> Self {
        Self::default()
    }
}

fn validate_user_name(name: &str) -> Result<(), AuthError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(AuthError::Mapping(format!("invalid user name {name:?}")));
    }
    if let Some(bad) = name.chars().find(|c| matches!(c, '/' | '%' | ':')) {
        return Err(AuthError::Mapping(format!(
            "user name {name:?} may not contain {bad:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl IdentityMapper for ClaimIdentityMapper {
    async fn user_for(&self, identity: &ProviderIdentity) -> Result<UserInfo, AuthError> {
        if identity.provider_user_name.is_empty() {
            return Err(AuthError::Mapping("identity has no subject".into()));
        }
        let name = match self.identities.get(&identity.key()) {
            Some(linked) => linked.value().clone(),
            None => {
                let name = identity
                    .preferred_username
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| identity.provider_user_name.clone());
                validate_user_name(&name)?;
                self.identities
                    .entry(identity.key())
                    .or_insert(name)
                    .value()
                    .clone()
            }
        };

        let mut user = self
            .users
            .entry(name.clone())
            .or_insert_with(|| UserInfo::new(name, uuid::Uuid::new_v4().to_string()));
        if identity.display_name.is_some() {
            user.display_name = identity.display_name.clone();
        }
        if identity.email.is_some() {
            user.email = identity.email.clone();
        }
        user.preferred_username = identity.preferred_username.clone();
        user.groups = identity.groups.clone();
        tracing::debug!(user = %user.name, identity = %identity.key(), "mapped identity");
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_identity_maps_to_same_user() {
        let mapper = ClaimIdentityMapper::new();
        let identity = ProviderIdentity::new("github", "12345");
        let first = mapper.user_for(&identity).await.unwrap();
        let second = mapper.user_for(&identity).await.unwrap();
        assert_eq!(first.name, "12345");
        assert_eq!(first.uid, second.uid);
    }

    #[tokio::test]
    async fn preferred_username_claims_existing_user() {
        let mapper = ClaimIdentityMapper::new();
        let mut a = ProviderIdentity::new("github", "1");
        a.preferred_username = Some("alice".into());
        let mut b = ProviderIdentity::new("google", "abc");
        b.preferred_username = Some("alice".into());
        b.email = Some("alice@example.com".into());

        let from_a = mapper.user_for(&a).await.unwrap();
        let from_b = mapper.user_for(&b).await.unwrap();
        assert_eq!(from_a.uid, from_b.uid);
        assert_eq!(from_b.email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn invalid_names_fail_mapping() {
        let mapper = ClaimIdentityMapper::new();
        let mut identity = ProviderIdentity::new("github", "1");
        identity.preferred_username = Some("a/b".into());
        assert!(matches!(
            mapper.user_for(&identity).await,
            Err(AuthError::Mapping(_))
        ));
    }
}
