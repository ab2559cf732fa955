//! The built-in `kube:admin` user.
//!
//! Its password hash lives in a file. The user's UID is derived from that
//! hash, so changing the password invalidates every existing session.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::authn::PasswordAuthenticator;
use crate::authn::password::verify_password_blocking;
use crate::error::AuthError;
use crate::user::UserInfo;

pub const BOOTSTRAP_USER: &str = "kube:admin";
const BOOTSTRAP_GROUP: &str = "system:cluster-admins";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapUserData {
    pub password_hash: String,
    pub uid: String,
}

pub struct BootstrapUserDataGetter {
    password_hash_file: PathBuf,
}

impl BootstrapUserDataGetter {
    pub fn new(password_hash_file: impl Into<PathBuf>) -> Self {
        Self {
            password_hash_file: password_hash_file.into(),
        }
    }

    /// `None` when the bootstrap user has been removed (file absent or empty).
    pub async fn get(&self) -> Result<Option<BootstrapUserData>, AuthError> {
        let contents = match tokio::fs::read_to_string(&self.password_hash_file).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Backend(err.to_string())),
        };
        let password_hash = contents.trim().to_owned();
        if password_hash.is_empty() {
            return Ok(None);
        }
        let uid = URL_SAFE_NO_PAD.encode(Sha256::digest(password_hash.as_bytes()));
        Ok(Some(BootstrapUserData { password_hash, uid }))
    }
}

pub struct BootstrapPasswordAuthenticator {
    getter: Arc<BootstrapUserDataGetter>,
}

impl BootstrapPasswordAuthenticator {
    pub fn new(getter: Arc<BootstrapUserDataGetter>) -> Self {
        Self { getter }
    }
}

#[async_trait]
impl PasswordAuthenticator for BootstrapPasswordAuthenticator {
    async fn authenticate_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserInfo>, AuthError> {
        if username != BOOTSTRAP_USER {
            return Ok(None);
        }
        let Some(data) = self.getter.get().await? else {
            return Ok(None);
        };
        if !verify_password_blocking(password, &data.password_hash).await? {
            return Ok(None);
        }
        let mut user = UserInfo::new(BOOTSTRAP_USER, data.uid);
        user.groups = vec![BOOTSTRAP_GROUP.to_owned()];
        Ok(Some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::password::hash_password;

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{name}-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn missing_file_means_no_bootstrap_user() {
        let getter = BootstrapUserDataGetter::new(temp_file("absent"));
        assert!(getter.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn authenticates_and_uid_tracks_hash() {
        let path = temp_file("kubeadmin");
        tokio::fs::write(&path, hash_password("hunter2").unwrap())
            .await
            .unwrap();
        let getter = Arc::new(BootstrapUserDataGetter::new(&path));
        let auth = BootstrapPasswordAuthenticator::new(getter.clone());

        let user = auth
            .authenticate_password(BOOTSTRAP_USER, "hunter2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.uid, getter.get().await.unwrap().unwrap().uid);
        assert!(auth.authenticate_password("alice", "hunter2").await.unwrap().is_none());
        assert!(auth.authenticate_password(BOOTSTRAP_USER, "wrong").await.unwrap().is_none());

        tokio::fs::write(&path, hash_password("changed").unwrap())
            .await
            .unwrap();
        assert_ne!(getter.get().await.unwrap().unwrap().uid, user.uid);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
