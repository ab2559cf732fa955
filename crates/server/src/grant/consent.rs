//! The consent page a user sees when a client asks for scopes not yet
//! granted.
//!
//! `GET` renders the form for the scopes in the query; `POST` records the
//! approved scopes as an [`OAuthClientAuthorization`] and sends the browser
//! back to the authorize request it came from.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{OriginalUri, State},
    http::{HeaderMap, Method, StatusCode},
    response::Response,
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;

use crate::authn::RequestAuthenticator;
use crate::context::RequestContext;
use crate::error::StoreError;
use crate::model::{OAuthClient, OAuthClientAuthorization, client_authorization_name};
use crate::render::{ErrorPage, GrantForm, Renderer, ScopeData};
use crate::response::{found, is_server_relative, set_query_param};
use crate::retry::{Backoff, retry_on_conflict};
use crate::scope::{self, ScopeRegistry, validate_scope_restrictions};
use crate::session::CookieCsrf;
use crate::storage::ObjectStore;
use crate::user::UserInfo;

/// Path of the consent page below the authorize endpoint.
pub const APPROVE_SUBPATH: &str = "/approve";

const THEN_PARAM: &str = "then";
const CSRF_PARAM: &str = "csrf";
const CLIENT_ID_PARAM: &str = "client_id";
const USER_NAME_PARAM: &str = "user_name";
const SCOPE_PARAM: &str = "scope";
const REDIRECT_URI_PARAM: &str = "redirect_uri";
const APPROVE_PARAM: &str = "approve";

pub struct GrantServer {
    csrf: CookieCsrf,
    auth: Arc<dyn RequestAuthenticator>,
    renderer: Arc<dyn Renderer>,
    registry: Arc<ScopeRegistry>,
    clients: Arc<dyn ObjectStore<OAuthClient>>,
    authorizations: Arc<dyn ObjectStore<OAuthClientAuthorization>>,
}

impl GrantServer {
    pub fn new(
        csrf: CookieCsrf,
        auth: Arc<dyn RequestAuthenticator>,
        renderer: Arc<dyn Renderer>,
        registry: Arc<ScopeRegistry>,
        clients: Arc<dyn ObjectStore<OAuthClient>>,
        authorizations: Arc<dyn ObjectStore<OAuthClientAuthorization>>,
    ) -> Self {
        Self {
            csrf,
            auth,
            renderer,
            registry,
            clients,
            authorizations,
        }
    }

    /// Routes for the consent page, mounted at `path`.
    pub fn router(self: Arc<Self>, path: &str) -> Router {
        Router::new()
            .route(path, get(consent_page).post(consent_submit))
            .with_state(self)
    }

    fn failed(&self, reason: &str) -> Response {
        tracing::info!(reason, "consent failed");
        self.renderer.error(ErrorPage::new(
            StatusCode::BAD_REQUEST,
            "grant_error",
            reason,
        ))
    }

    async fn authenticate(&self, ctx: &RequestContext) -> Option<UserInfo> {
        match self.auth.authenticate_request(ctx).await {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!(error = %err, "unable to authenticate consent request");
                None
            }
        }
    }

    async fn client(&self, client_id: &str) -> Result<OAuthClient, Response> {
        match self.clients.get(client_id).await {
            Ok(client) => Ok(client),
            Err(err) => {
                if !err.is_not_found() {
                    tracing::error!(error = %err, client_id, "unable to load client");
                }
                Err(self.failed("Could not find client for client_id"))
            }
        }
    }

    fn scope_data(&self, name: &str, granted: &[String]) -> ScopeData {
        let description = self.registry.describe(name);
        ScopeData {
            name: name.to_owned(),
            description: description.description,
            warning: description.warning,
            escalating: description.escalating,
            granted: granted.iter().any(|g| g == name),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn handle_form(&self, mut ctx: RequestContext) -> Response {
        let Some(user) = self.authenticate(&ctx).await else {
            return self.failed("You must reauthenticate before continuing");
        };
        let then = ctx.query_param(THEN_PARAM).unwrap_or_default();
        if !is_server_relative(&then) {
            return self.failed("Could not determine where to return to after approval");
        }
        let client_id = ctx.query_param(CLIENT_ID_PARAM).unwrap_or_default();
        let requested = scope::split(&ctx.query_param(SCOPE_PARAM).unwrap_or_default());
        let redirect_uri = ctx.query_param(REDIRECT_URI_PARAM).unwrap_or_default();

        let client = match self.client(&client_id).await {
            Ok(client) => client,
            Err(response) => return response,
        };
        if let Err(err) = validate_scope_restrictions(&client, &requested) {
            return self.failed(&format!(
                "{} requested illegal scopes ({}): {}",
                client.name(),
                scope::join(&requested),
                err
            ));
        }

        let csrf = match self.csrf.generate(&mut ctx) {
            Ok(csrf) => csrf,
            Err(err) => {
                tracing::error!(error = %err, "unable to generate CSRF token");
                return self.failed("Could not generate a CSRF token");
            }
        };

        let name = client_authorization_name(&user.name, client.name());
        let granted = match self.authorizations.get(&name).await {
            Ok(existing) if existing.user_uid == user.uid => existing.scopes,
            _ => Vec::new(),
        };

        let form = GrantForm {
            action: ctx.uri.path().to_owned(),
            then,
            csrf,
            client_id: client.name().to_owned(),
            user_name: user.name,
            redirect_uri,
            scopes: requested
                .iter()
                .map(|s| self.scope_data(s, &granted))
                .collect(),
            granted_scopes: granted.iter().map(|s| self.scope_data(s, &granted)).collect(),
        };
        let response = self.renderer.grant(form);
        ctx.finish(response)
    }

    #[tracing::instrument(skip_all)]
    async fn handle_grant(&self, ctx: RequestContext, body: &[u8]) -> Response {
        let Some(user) = self.authenticate(&ctx).await else {
            return self.failed("You must reauthenticate before continuing");
        };
        let form = SubmittedGrant::parse(body);

        if !self.csrf.check(&ctx, &form.csrf) {
            tracing::warn!(user = %user.name, "consent submitted with an invalid CSRF token");
            return self.failed("Invalid CSRF token");
        }
        if form.user_name != user.name {
            tracing::warn!(submitted = %form.user_name, user = %user.name, "consent user mismatch");
            return self.failed("User did not match");
        }
        if !is_server_relative(&form.then) {
            return self.failed("Could not determine where to return to after approval");
        }

        if !form.approve || form.scopes.is_empty() {
            tracing::info!(user = %user.name, client_id = %form.client_id, "user denied grant");
            return match set_query_param(&form.then, "error", "access_denied") {
                Some(target) => found(&target),
                None => self.failed("Access denied, but no redirect URL was specified"),
            };
        }

        let client = match self.client(&form.client_id).await {
            Ok(client) => client,
            Err(response) => return response,
        };
        if let Err(err) = validate_scope_restrictions(&client, &form.scopes) {
            return self.failed(&format!(
                "{} requested illegal scopes ({}): {}",
                client.name(),
                scope::join(&form.scopes),
                err
            ));
        }

        if let Err(err) = self.record_grant(&user, &client, &form.scopes).await {
            tracing::error!(error = %err, user = %user.name, client_id = %client.name(), "unable to record client authorization");
            return self.failed("Could not save client authorization");
        }
        tracing::info!(user = %user.name, client_id = %client.name(), scopes = %scope::join(&form.scopes), "user approved grant");

        match set_query_param(&form.then, SCOPE_PARAM, &scope::join(&form.scopes)) {
            Some(target) => found(&target),
            None => self.failed("Access granted, but no redirect URL was specified"),
        }
    }

    /// Adds `scopes` to the user's authorization for `client`, creating it
    /// when missing. An authorization left by a previous user with the same
    /// name is taken over.
    async fn record_grant(
        &self,
        user: &UserInfo,
        client: &OAuthClient,
        scopes: &[String],
    ) -> Result<(), StoreError> {
        let name = &client_authorization_name(&user.name, client.name());
        retry_on_conflict(Backoff::CONFLICT, || async move {
            match self.authorizations.get(name).await {
                Ok(mut existing) => {
                    if existing.user_uid == user.uid {
                        existing.scopes = scope::add(&existing.scopes, scopes);
                    } else {
                        existing.user_uid = user.uid.clone();
                        existing.scopes = scopes.to_vec();
                    }
                    self.authorizations.update(existing).await.map(|_| ())
                }
                Err(err) if err.is_not_found() => {
                    let authorization = OAuthClientAuthorization::new(
                        &user.name,
                        &user.uid,
                        client.name(),
                        scopes.to_vec(),
                    );
                    match self.authorizations.create(authorization).await {
                        Ok(_) => Ok(()),
                        // Someone else created it first; retry as an update.
                        Err(err) if err.is_already_exists() => Err(StoreError::Conflict {
                            kind: "OAuthClientAuthorization",
                            name: name.clone(),
                        }),
                        Err(err) => Err(err),
                    }
                }
                Err(err) => Err(err),
            }
        })
        .await
    }
}

/// The consent form as submitted. Scopes may arrive as repeated `scope` or
/// `scope[]` fields.
#[derive(Debug, Default)]
struct SubmittedGrant {
    then: String,
    csrf: String,
    client_id: String,
    user_name: String,
    scopes: Vec<String>,
    approve: bool,
}

impl SubmittedGrant {
    fn parse(body: &[u8]) -> Self {
        let mut form = SubmittedGrant::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                THEN_PARAM => form.then = value.into_owned(),
                CSRF_PARAM => form.csrf = value.into_owned(),
                CLIENT_ID_PARAM => form.client_id = value.into_owned(),
                USER_NAME_PARAM => form.user_name = value.into_owned(),
                APPROVE_PARAM => form.approve = !value.is_empty(),
                "scope" | "scope[]" => form.scopes.extend(scope::split(&value)),
                _ => {}
            }
        }
        form
    }
}

async fn consent_page(
    State(server): State<Arc<GrantServer>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    server
        .handle_form(RequestContext::new(method, uri, headers, jar))
        .await
}

async fn consent_submit(
    State(server): State<Arc<GrantServer>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    server
        .handle_grant(RequestContext::new(method, uri, headers, jar), &body)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_scopes() {
        let form = SubmittedGrant::parse(
            b"then=%2Foauth%2Fauthorize%3Fclient_id%3Dweb&csrf=abc&client_id=web&user_name=alice\
              &scope=user%3Ainfo&scope%5B%5D=user%3Acheck-access&approve=Allow",
        );
        assert_eq!(form.then, "/oauth/authorize?client_id=web");
        assert_eq!(form.scopes, vec!["user:info", "user:check-access"]);
        assert!(form.approve);
        assert_eq!(form.user_name, "alice");
    }

    #[test]
    fn missing_approve_means_deny() {
        let form = SubmittedGrant::parse(b"scope=user%3Ainfo&deny=Deny");
        assert!(!form.approve);
    }
}
