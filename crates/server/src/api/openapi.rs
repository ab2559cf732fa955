//! OpenAPI/Utoipa configuration.

use crate::api::health::MISC_TAG;
use crate::oauth2::OAUTH2_TAG;
use crate::scope;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{
        AuthorizationCode, Flow, HttpAuthScheme, HttpBuilder, OAuth2, Scopes, SecurityScheme,
    },
};

/// Security schemes for the OpenAPI document. The authorize and token URLs
/// depend on the configured prefix, so they are filled in at start-up.
pub struct SecurityAddon {
    pub authorize_url: String,
    pub token_url: String,
}

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);

        let bearer = HttpBuilder::new()
            .scheme(HttpAuthScheme::Bearer)
            .description(Some(
                "An access token issued by the `/token` endpoint or the implicit flow.",
            ))
            .build();
        components.add_security_scheme("bearer_auth", SecurityScheme::Http(bearer));

        let oauth2 = OAuth2::new([Flow::AuthorizationCode(AuthorizationCode::new(
            self.authorize_url.clone(),
            self.token_url.clone(),
            Scopes::from_iter([
                (scope::USER_FULL, "Full read/write access with all of the user's permissions"),
                (scope::USER_INFO, "Read-only access to the user's name and groups"),
                (scope::USER_CHECK_ACCESS, "Check whether the user is allowed to perform an action"),
                (scope::USER_LIST_SCOPED_PROJECTS, "List projects visible with the granted scopes"),
                (scope::USER_LIST_ALL_PROJECTS, "List every project the user can see"),
            ]),
        ))]);
        components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "OAuth Server API",
        version = "1.0.0",
        description = "OAuth2 authorization server with consent, session and federated login handling."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 protocol endpoints")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// The document with security schemes pointing at this deployment.
    pub fn with_security(authorize_url: String, token_url: String) -> utoipa::openapi::OpenApi {
        let mut openapi = Self::openapi();
        SecurityAddon {
            authorize_url,
            token_url,
        }
        .modify(&mut openapi);
        openapi
    }
}
