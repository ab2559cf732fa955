//! Authenticated principals and their conversion to and from stored tokens.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{OAuthAccessToken, OAuthAuthorizeToken};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
}

impl UserInfo {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot convert user: {0}")]
pub struct ConversionError(pub String);

/// Maps a principal onto the user fields of stored tokens and back.
pub trait UserConversion: Send + Sync {
    fn convert_to_authorize_token(
        &self,
        user: &UserInfo,
        token: &mut OAuthAuthorizeToken,
    ) -> Result<(), ConversionError>;

    fn convert_to_access_token(
        &self,
        user: &UserInfo,
        token: &mut OAuthAccessToken,
    ) -> Result<(), ConversionError>;

    fn convert_from_authorize_token(
        &self,
        token: &OAuthAuthorizeToken,
    ) -> Result<UserInfo, ConversionError>;

    fn convert_from_access_token(
        &self,
        token: &OAuthAccessToken,
    ) -> Result<UserInfo, ConversionError>;
}

/// Stores name and UID only; both are required in either direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUserConversion;

fn require(name: &str, uid: &str) -> Result<UserInfo, ConversionError> {
    if name.is_empty() {
        return Err(ConversionError("user name is empty".into()));
    }
    if uid.is_empty() {
        return Err(ConversionError(format!("user {name:?} has no UID")));
    }
    Ok(UserInfo::new(name, uid))
}

impl UserConversion for DefaultUserConversion {
    fn convert_to_authorize_token(
        &self,
        user: &UserInfo,
        token: &mut OAuthAuthorizeToken,
    ) -> Result<(), ConversionError> {
        let checked = require(&user.name, &user.uid)?;
        token.user_name = checked.name;
        token.user_uid = checked.uid;
        Ok(())
    }

    fn convert_to_access_token(
        &self,
        user: &UserInfo,
        token: &mut OAuthAccessToken,
    ) -> Result<(), ConversionError> {
        let checked = require(&user.name, &user.uid)?;
        token.user_name = checked.name;
        token.user_uid = checked.uid;
        Ok(())
    }

    fn convert_from_authorize_token(
        &self,
        token: &OAuthAuthorizeToken,
    ) -> Result<UserInfo, ConversionError> {
        require(&token.user_name, &token.user_uid)
    }

    fn convert_from_access_token(
        &self,
        token: &OAuthAccessToken,
    ) -> Result<UserInfo, ConversionError> {
        require(&token.user_name, &token.user_uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectMeta;

    #[test]
    fn conversion_requires_name_and_uid() {
        let mut token = OAuthAuthorizeToken {
            meta: ObjectMeta::named("x".repeat(32)),
            client_name: "console".into(),
            expires_in: 300,
            scopes: vec![],
            redirect_uri: String::new(),
            state: String::new(),
            user_name: String::new(),
            user_uid: String::new(),
            code_challenge: String::new(),
            code_challenge_method: String::new(),
        };
        let conversion = DefaultUserConversion;
        assert!(
            conversion
                .convert_to_authorize_token(&UserInfo::new("", "uid"), &mut token)
                .is_err()
        );
        assert!(conversion.convert_from_authorize_token(&token).is_err());

        conversion
            .convert_to_authorize_token(&UserInfo::new("alice", "uid-1"), &mut token)
            .unwrap();
        let back = conversion.convert_from_authorize_token(&token).unwrap();
        assert_eq!(back, UserInfo::new("alice", "uid-1"));
    }
}
