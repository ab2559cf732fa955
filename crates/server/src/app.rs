//! Assembles the authorization server from configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

use crate::api::{health, openapi::ApiDoc};
use crate::authn::{
    AllowAllPasswordAuthenticator, BasicAuthRequestAuthenticator, ClaimIdentityMapper,
    DenyAllPasswordAuthenticator, HtpasswdAuthenticator, IdentityMapper, PasswordAuthenticator,
    RequestAuthenticator, RequestHeaderAuthenticator, UnionPasswordAuthenticator,
    UnionRequestAuthenticator,
};
use crate::config::{ClientSeed, ConfigError, OAuthConfig, ProviderKind};
use crate::discovery::{self, DiscoveryError, OAuthServerMetadata};
use crate::error::{ProviderError, StoreError};
use crate::external::{
    self, CsrfRedirectingState, ExternalOAuthHandler, OpenIdProvider, CALLBACK_PATH,
};
use crate::grant::ClientAuthorizationGrantChecker;
use crate::grant::consent::{APPROVE_SUBPATH, GrantServer};
use crate::handlers::{
    AccessAuthenticator, AuthenticationErrorHandler, AuthorizeAuthenticator, AuthorizeHandler,
    BasicAuthChallenger, Challenger, DenyAssertion, DenyClientCredentials, ErrorPageHandler,
    GrantCheck, LoginRedirector, PerClientGrant, PlaceholderChallenger, RedirectGrant, Redirector,
    SessionFinalizer, UnionAuthenticationHandler,
};
use crate::login::Login;
use crate::oauth2::endpoints::{AUTHORIZE_PATH, TOKEN_PATH};
use crate::oauth2::{self, OAuthServer, RegistryStorage, ServerConfig};
use crate::render::Renderer;
use crate::retry::{Backoff, retry_on_conflict};
use crate::scope::ScopeRegistry;
use crate::selectprovider::SelectProvider;
use crate::session::{
    BOOTSTRAP_USER, BootstrapPasswordAuthenticator, BootstrapUserDataGetter, CookieCsrf,
    CookieSessionStore, SessionAuthenticator, SessionError, SessionSecrets,
};
use crate::storage::Stores;
use crate::token::RandomTokenGenerator;
use crate::user::DefaultUserConversion;

const CSRF_COOKIE: &str = "csrf";
const BASIC_AUTH_REALM: &str = "oauth-server";
const LOGIN_PATH: &str = "/login";

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Http(#[from] ProviderError),
    #[error("identity provider {name:?}: {reason}")]
    Provider { name: String, reason: String },
}

/// Session signing secrets from the configured file, or fresh random ones.
pub fn session_secrets(config: &OAuthConfig) -> Result<SessionSecrets, SessionError> {
    match &config.session.secrets_file {
        Some(path) => SessionSecrets::load(path),
        None => {
            tracing::warn!("no session secrets configured, sessions will not survive a restart");
            SessionSecrets::generate()
        }
    }
}

struct PasswordProvider {
    name: String,
    authenticator: Arc<dyn PasswordAuthenticator>,
    login: bool,
    challenge: bool,
}

/// Everything that decides who the user is.
struct Authentication {
    request: Arc<dyn RequestAuthenticator>,
    challengers: Vec<Arc<dyn Challenger>>,
    redirectors: Vec<(String, Arc<dyn Redirector>)>,
    logins: Vec<(String, Arc<Login>)>,
    callbacks: HashMap<String, Arc<ExternalOAuthHandler>>,
}

fn password_providers(
    config: &OAuthConfig,
    mapper: &Arc<dyn IdentityMapper>,
) -> Result<Vec<PasswordProvider>, AppError> {
    let mut providers = Vec::new();
    if let Some(path) = &config.bootstrap.password_hash_file {
        let getter = Arc::new(BootstrapUserDataGetter::new(path));
        providers.push(PasswordProvider {
            name: BOOTSTRAP_USER.to_owned(),
            authenticator: Arc::new(BootstrapPasswordAuthenticator::new(getter)),
            login: true,
            challenge: true,
        });
    }
    for idp in &config.identity_providers {
        let authenticator: Arc<dyn PasswordAuthenticator> = match &idp.provider {
            ProviderKind::AllowAll => {
                Arc::new(AllowAllPasswordAuthenticator::new(&idp.name, mapper.clone()))
            }
            ProviderKind::DenyAll => Arc::new(DenyAllPasswordAuthenticator),
            ProviderKind::Htpasswd { file } => Arc::new(
                HtpasswdAuthenticator::load(&idp.name, file, mapper.clone()).map_err(|e| {
                    AppError::Provider {
                        name: idp.name.clone(),
                        reason: format!("unable to read {}: {e}", file.display()),
                    }
                })?,
            ),
            ProviderKind::RequestHeader { .. } | ProviderKind::Openid(_) => continue,
        };
        providers.push(PasswordProvider {
            name: idp.name.clone(),
            authenticator,
            login: idp.login,
            challenge: idp.challenge,
        });
    }
    Ok(providers)
}

#[allow(clippy::too_many_arguments)]
fn authentication(
    config: &OAuthConfig,
    session: &Arc<SessionAuthenticator>,
    csrf: &CookieCsrf,
    mapper: &Arc<dyn IdentityMapper>,
    renderer: &Arc<dyn Renderer>,
    errors: &Arc<dyn AuthenticationErrorHandler>,
) -> Result<Authentication, AppError> {
    let prefix = config.api_prefix.as_str();
    let public_url = config.master_public_url.trim_end_matches('/');

    let mut request: Vec<Arc<dyn RequestAuthenticator>> = vec![session.clone()];
    let mut challengers: Vec<Arc<dyn Challenger>> = Vec::new();
    let mut redirectors: Vec<(String, Arc<dyn Redirector>)> = Vec::new();
    let mut logins = Vec::new();
    let mut callbacks = HashMap::new();

    let passwords = password_providers(config, mapper)?;
    let login_count = passwords.iter().filter(|p| p.login).count();
    let basic: Vec<_> = passwords
        .iter()
        .filter(|p| p.challenge)
        .map(|p| p.authenticator.clone())
        .collect();
    if !basic.is_empty() {
        request.push(Arc::new(BasicAuthRequestAuthenticator::new(Arc::new(
            UnionPasswordAuthenticator::new(basic),
        ))));
        challengers.push(Arc::new(BasicAuthChallenger::new(BASIC_AUTH_REALM)));
    }
    for provider in passwords {
        if provider.login {
            let path = if login_count > 1 {
                format!("{prefix}{LOGIN_PATH}/{}", urlencoding::encode(&provider.name))
            } else {
                format!("{prefix}{LOGIN_PATH}")
            };
            let login = Arc::new(Login::new(
                &provider.name,
                csrf.clone(),
                provider.authenticator,
                session.clone(),
                renderer.clone(),
            ));
            redirectors.push((
                provider.name.clone(),
                Arc::new(LoginRedirector::new(format!(
                    "{path}?then=${{server-relative-url}}"
                ))),
            ));
            logins.push((path, login));
        }
    }

    let timeout = Duration::from_secs(config.provider_timeout_seconds);
    let http = external::http_client(timeout)?;
    for idp in &config.identity_providers {
        match &idp.provider {
            ProviderKind::RequestHeader {
                headers,
                name_headers,
                email_headers,
                preferred_username_headers,
                login_url,
                challenge_url,
            } => {
                request.push(Arc::new(
                    RequestHeaderAuthenticator::new(&idp.name, headers.clone(), mapper.clone())
                        .with_claim_headers(
                            name_headers.clone(),
                            preferred_username_headers.clone(),
                            email_headers.clone(),
                        ),
                ));
                if idp.login
                    && let Some(url) = login_url
                {
                    redirectors.push((
                        idp.name.clone(),
                        Arc::new(LoginRedirector::new(url).with_base_url(public_url)),
                    ));
                }
                if idp.challenge
                    && let Some(url) = challenge_url
                {
                    challengers.push(Arc::new(
                        LoginRedirector::new(url).with_base_url(public_url),
                    ));
                }
            }
            ProviderKind::Openid(openid) => {
                let provider = Arc::new(OpenIdProvider::new(
                    &idp.name,
                    openid.clone(),
                    http.clone(),
                    timeout,
                ));
                let callback_url = format!(
                    "{public_url}{prefix}{CALLBACK_PATH}/{}",
                    urlencoding::encode(&idp.name)
                );
                let handler = Arc::new(ExternalOAuthHandler::new(
                    &idp.name,
                    provider,
                    CsrfRedirectingState::new(csrf.clone()),
                    callback_url,
                    mapper.clone(),
                    session.clone(),
                    errors.clone(),
                    http.clone(),
                    timeout,
                ));
                if idp.login {
                    let redirector: Arc<dyn Redirector> = handler.clone();
                    redirectors.push((idp.name.clone(), redirector));
                }
                callbacks.insert(idp.name.clone(), handler);
            }
            _ => {}
        }
    }

    if challengers.is_empty() && !redirectors.is_empty() {
        challengers.push(Arc::new(PlaceholderChallenger::new(format!(
            "{public_url}{prefix}{AUTHORIZE_PATH}"
        ))));
    }

    Ok(Authentication {
        request: Arc::new(UnionRequestAuthenticator::new(request)),
        challengers,
        redirectors,
        logins,
        callbacks,
    })
}

/// Builds the complete HTTP application.
#[tracing::instrument(skip_all, fields(prefix = %config.api_prefix))]
pub fn build_router(
    config: &OAuthConfig,
    stores: Stores,
    secrets: SessionSecrets,
    renderer: Arc<dyn Renderer>,
) -> Result<Router, AppError> {
    config.validate()?;
    let prefix = config.api_prefix.as_str();
    let public_url = config.master_public_url.trim_end_matches('/');
    let secure = config.secure_cookies();

    let mut session = SessionAuthenticator::new(
        CookieSessionStore::new(&config.session.name, secrets, secure),
        config.session.max_age_seconds,
    );
    if let Some(path) = &config.bootstrap.password_hash_file {
        session = session.with_bootstrap(
            Arc::new(BootstrapUserDataGetter::new(path)),
            config.session.bootstrap_max_age_seconds,
        );
    }
    let session = Arc::new(session);
    let csrf = CookieCsrf::new(CSRF_COOKIE, secure);
    let mapper: Arc<dyn IdentityMapper> = Arc::new(ClaimIdentityMapper::new());
    let errors: Arc<dyn AuthenticationErrorHandler> =
        Arc::new(ErrorPageHandler::new(renderer.clone()));
    let registry = Arc::new(ScopeRegistry::default());

    let auth = authentication(config, &session, &csrf, &mapper, &renderer, &errors)?;
    tracing::info!(
        redirectors = auth.redirectors.len(),
        challengers = auth.challengers.len(),
        "configured identity providers"
    );

    let approve_path = format!("{prefix}{AUTHORIZE_PATH}{APPROVE_SUBPATH}");
    let unauthenticated = Arc::new(UnionAuthenticationHandler::new(
        auth.challengers,
        auth.redirectors,
        errors.clone(),
        SelectProvider::new(renderer.clone(), config.always_show_provider_selection),
    ));
    let handlers: Vec<Arc<dyn AuthorizeHandler>> = vec![
        Arc::new(AuthorizeAuthenticator::new(
            auth.request.clone(),
            unauthenticated,
            errors,
        )),
        Arc::new(GrantCheck::new(
            Arc::new(ClientAuthorizationGrantChecker::new(
                stores.client_authorizations.clone(),
            )),
            Arc::new(PerClientGrant::new(
                Arc::new(RedirectGrant::new(&approve_path)),
                config.grant_method,
            )),
            registry.clone(),
        )),
    ];

    let server = Arc::new(OAuthServer::new(
        ServerConfig {
            authorize_expiration: config.token.authorize_token_max_age_seconds,
            access_expiration: config.token.access_token_max_age_seconds,
            access_inactivity_timeout: config.token.access_token_inactivity_timeout_seconds,
        },
        Arc::new(RegistryStorage::new(
            stores.clone(),
            Arc::new(DefaultUserConversion),
        )),
        Arc::new(RandomTokenGenerator),
        handlers,
        SessionFinalizer::new(Some(session)),
        Arc::new(AccessAuthenticator::new(
            Arc::new(DenyAllPasswordAuthenticator),
            Arc::new(DenyAssertion),
            Arc::new(DenyClientCredentials),
        )),
        renderer.clone(),
    ));

    let consent = Arc::new(GrantServer::new(
        csrf,
        auth.request,
        renderer,
        registry,
        stores.clients.clone(),
        stores.client_authorizations.clone(),
    ));

    let metadata = match &config.discovery_file {
        Some(path) => OAuthServerMetadata::load(path)?,
        None => OAuthServerMetadata::new(public_url, prefix),
    };

    let openapi = ApiDoc::with_security(
        format!("{public_url}{prefix}{AUTHORIZE_PATH}"),
        format!("{public_url}{prefix}{TOKEN_PATH}"),
    );
    let (router, api) = OpenApiRouter::with_openapi(openapi)
        .nest(prefix, oauth2::router(server))
        .merge(discovery::router(Arc::new(metadata)))
        .routes(routes!(health::health))
        .merge(
            OpenApiRouter::new()
                .routes(routes!(health::ready))
                .with_state(stores),
        )
        .split_for_parts();

    let mut router = router
        .merge(consent.router(&approve_path))
        .merge(external::callback_router(auth.callbacks, prefix));
    for (path, login) in auth.logins {
        router = router.merge(login.router(&path));
    }

    Ok(router
        .merge(Redoc::with_url("/api-docs", api))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}

/// Registers the configured clients. An existing client keeps its secret
/// and gains any new redirect URIs; other settings follow the configuration.
#[tracing::instrument(skip_all)]
pub async fn ensure_clients(stores: &Stores, seeds: &[ClientSeed]) -> Result<(), StoreError> {
    for seed in seeds {
        match stores.clients.create(seed.to_client()).await {
            Ok(_) => {
                tracing::info!(client_id = %seed.name, "registered OAuth client");
                continue;
            }
            Err(err) if err.is_already_exists() => {}
            Err(err) => return Err(err),
        }

        retry_on_conflict(Backoff::CONFLICT, || async move {
            let mut existing = stores.clients.get(&seed.name).await?;
            let desired = seed.to_client();
            if existing.secret.is_empty() {
                existing.secret = desired.secret;
            }
            for uri in desired.redirect_uris {
                if !existing.redirect_uris.contains(&uri) {
                    existing.redirect_uris.push(uri);
                }
            }
            for secret in desired.additional_secrets {
                if !existing.additional_secrets.contains(&secret) {
                    existing.additional_secrets.push(secret);
                }
            }
            existing.respond_with_challenges = desired.respond_with_challenges;
            existing.grant_method = desired.grant_method;
            existing.scope_restrictions = desired.scope_restrictions;
            existing.access_token_max_age_seconds = desired.access_token_max_age_seconds;
            existing.access_token_inactivity_timeout_seconds =
                desired.access_token_inactivity_timeout_seconds;
            stores.clients.update(existing).await
        })
        .await?;
        tracing::info!(client_id = %seed.name, "updated OAuth client");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(name: &str, secret: &str, redirect: &str) -> ClientSeed {
        ClientSeed {
            name: name.into(),
            secret: secret.into(),
            additional_secrets: vec![],
            respond_with_challenges: false,
            redirect_uris: vec![redirect.into()],
            grant_method: None,
            scope_restrictions: vec![],
            access_token_max_age_seconds: None,
            access_token_inactivity_timeout_seconds: None,
        }
    }

    #[tokio::test]
    async fn ensure_clients_creates_then_merges() {
        let stores = Stores::in_memory();
        ensure_clients(&stores, &[seed("web", "first", "https://a.example.com/cb")])
            .await
            .unwrap();
        ensure_clients(&stores, &[seed("web", "second", "https://b.example.com/cb")])
            .await
            .unwrap();

        let client = stores.clients.get("web").await.unwrap();
        assert_eq!(client.secret, "first");
        assert_eq!(
            client.redirect_uris,
            vec!["https://a.example.com/cb", "https://b.example.com/cb"]
        );
    }
}
