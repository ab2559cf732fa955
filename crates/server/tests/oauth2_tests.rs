//! End-to-end tests for the authorize, consent, token and info endpoints.

use std::sync::Arc;

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::{TestResponse, TestServer};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use config::{Config, File, FileFormat};
use rust_oauth_server::app::{build_router, ensure_clients};
use rust_oauth_server::config::OAuthConfig;
use rust_oauth_server::model::{ScopeRestriction, client_authorization_name};
use rust_oauth_server::render::DefaultRenderer;
use rust_oauth_server::session::SessionSecrets;
use rust_oauth_server::storage::Stores;
use sha2::{Digest, Sha256};

const CONFIG: &str = r#"
master_public_url: http://localhost:8080
identity_providers:
  - name: anyone
    provider:
      type: allow_all
clients:
  - name: web
    secret: web-secret
    redirect_uris: [https://client.example.com/cb]
  - name: trusted
    secret: trusted-secret
    grant_method: auto
    redirect_uris: [https://trusted.example.com/cb]
  - name: cli
    respond_with_challenges: true
    redirect_uris: [https://client.example.com/cli]
"#;

const APPROVE_PATH: &str = "/oauth/authorize/approve";

fn oauth_config() -> OAuthConfig {
    Config::builder()
        .add_source(File::from_str(CONFIG, FileFormat::Yaml))
        .build()
        .expect("build config")
        .try_deserialize()
        .expect("deserialize config")
}

async fn setup() -> (TestServer, Stores) {
    let config = oauth_config();
    let stores = Stores::in_memory();
    ensure_clients(&stores, &config.clients)
        .await
        .expect("seed clients");
    let router = build_router(
        &config,
        stores.clone(),
        SessionSecrets::generate().expect("secrets"),
        Arc::new(DefaultRenderer),
    )
    .expect("build router");
    (TestServer::new(router).expect("create test server"), stores)
}

fn basic(user: &str, password: &str) -> HeaderValue {
    let encoded = STANDARD.encode(format!("{user}:{password}"));
    HeaderValue::from_str(&format!("Basic {encoded}")).unwrap()
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

fn location(response: &TestResponse) -> String {
    response
        .header(header::LOCATION)
        .to_str()
        .expect("ascii location")
        .to_owned()
}

fn query_param(location: &str, name: &str) -> Option<String> {
    let url = url::Url::parse("http://localhost:8080")
        .unwrap()
        .join(location)
        .expect("parse location");
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

async fn authorize(server: &TestServer, client_id: &str, scope: &str) -> TestResponse {
    server
        .get("/oauth/authorize")
        .add_query_param("client_id", client_id)
        .add_query_param("response_type", "code")
        .add_query_param("scope", scope)
        .add_query_param("state", "xyz")
        .add_header(header::AUTHORIZATION, basic("alice", "pw"))
        .await
}

/// Follows a consent redirect: loads the page, then submits the form.
async fn consent(server: &TestServer, consent_url: &str, approve: bool) -> TestResponse {
    let page = server
        .get(consent_url)
        .add_header(header::AUTHORIZATION, basic("alice", "pw"))
        .await;
    page.assert_status_ok();
    let csrf = page.cookie("csrf");

    let then = query_param(consent_url, "then").expect("then");
    let scope = query_param(consent_url, "scope").expect("scope");
    let mut form = vec![
        ("then", then.as_str()),
        ("csrf", csrf.value()),
        ("client_id", "web"),
        ("user_name", "alice"),
        ("scope", scope.as_str()),
    ];
    if approve {
        form.push(("approve", "true"));
    }
    server
        .post(APPROVE_PATH)
        .add_header(header::AUTHORIZATION, basic("alice", "pw"))
        .add_cookie(csrf.clone())
        .form(&form)
        .await
}

/// Runs authorize, approves the consent prompt and returns the client
/// redirect carrying the code.
async fn approved_code(server: &TestServer, scope: &str) -> String {
    let response = authorize(server, "web", scope).await;
    response.assert_status(StatusCode::FOUND);
    let consent_url = location(&response);
    assert!(consent_url.starts_with(APPROVE_PATH), "{consent_url}");

    let approved = consent(server, &consent_url, true).await;
    approved.assert_status(StatusCode::FOUND);
    let back = location(&approved);
    assert!(back.starts_with("/oauth/authorize?"), "{back}");

    let response = server
        .get(&back)
        .add_header(header::AUTHORIZATION, basic("alice", "pw"))
        .await;
    response.assert_status(StatusCode::FOUND);
    let redirect = location(&response);
    assert!(redirect.starts_with("https://client.example.com/cb?"), "{redirect}");
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("xyz"));
    query_param(&redirect, "code").expect("code")
}

async fn redeem(server: &TestServer, code: &str) -> TestResponse {
    server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", "web"),
            ("client_secret", "web-secret"),
        ])
        .await
}

#[tokio::test]
async fn consent_then_code_then_token_then_info() {
    let (server, _) = setup().await;
    let code = approved_code(&server, "user:info").await;

    let code_info = server.get("/oauth/info").add_query_param("code", &code).await;
    code_info.assert_status_ok();
    let body: serde_json::Value = code_info.json();
    assert_eq!(body["client_id"], "web");
    assert_eq!(body["user_name"], "alice");

    let response = redeem(&server, &code).await;
    response.assert_status_ok();
    assert_eq!(response.header(header::CACHE_CONTROL), "no-store");
    let token: serde_json::Value = response.json();
    assert_eq!(token["token_type"], "Bearer");
    assert_eq!(token["scope"], "user:info");
    assert!(token.get("refresh_token").is_none_or(|v| v.is_null()));

    let access_token = token["access_token"].as_str().unwrap();
    let info = server
        .get("/oauth/info")
        .add_header(header::AUTHORIZATION, bearer(access_token))
        .await;
    info.assert_status_ok();
    let body: serde_json::Value = info.json();
    assert_eq!(body["user_name"], "alice");
    assert_eq!(body["scope"], "user:info");
    assert_eq!(body["redirect_uri"], "https://client.example.com/cb");
}

#[tokio::test]
async fn approved_scopes_are_not_prompted_again() {
    let (server, _) = setup().await;
    approved_code(&server, "user:info user:check-access").await;

    let narrower = authorize(&server, "web", "user:info").await;
    narrower.assert_status(StatusCode::FOUND);
    assert!(location(&narrower).starts_with("https://client.example.com/cb?code="));

    let broader = authorize(&server, "web", "user:full").await;
    broader.assert_status(StatusCode::FOUND);
    assert!(location(&broader).starts_with(APPROVE_PATH));
}

#[tokio::test]
async fn declined_consent_denies_the_client() {
    let (server, _) = setup().await;
    let response = authorize(&server, "web", "user:info").await;
    let consent_url = location(&response);

    let declined = consent(&server, &consent_url, false).await;
    declined.assert_status(StatusCode::FOUND);
    let back = location(&declined);
    assert_eq!(query_param(&back, "error").as_deref(), Some("access_denied"));

    let response = server
        .get(&back)
        .add_header(header::AUTHORIZATION, basic("alice", "pw"))
        .await;
    response.assert_status(StatusCode::FOUND);
    let redirect = location(&response);
    assert!(redirect.starts_with("https://client.example.com/cb?"), "{redirect}");
    assert_eq!(query_param(&redirect, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some("xyz"));
}

#[tokio::test]
async fn consent_with_wrong_csrf_is_rejected() {
    let (server, stores) = setup().await;
    let response = authorize(&server, "web", "user:info").await;
    let consent_url = location(&response);
    let then = query_param(&consent_url, "then").unwrap();

    let response = server
        .post(APPROVE_PATH)
        .add_header(header::AUTHORIZATION, basic("alice", "pw"))
        .form(&[
            ("then", then.as_str()),
            ("csrf", "forged"),
            ("client_id", "web"),
            ("user_name", "alice"),
            ("scope", "user:info"),
            ("approve", "true"),
        ])
        .await;
    response.assert_status_bad_request();
    assert!(response.text().contains("Invalid CSRF token"));

    let name = client_authorization_name("alice", "web");
    assert!(
        stores
            .client_authorizations
            .get(&name)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn stale_authorization_is_replaced_by_a_new_prompt() {
    let (server, stores) = setup().await;
    approved_code(&server, "user:info").await;

    let name = client_authorization_name("alice", "web");
    let mut authorization = stores.client_authorizations.get(&name).await.unwrap();
    authorization.user_uid = "uid-of-a-deleted-alice".into();
    stores
        .client_authorizations
        .update(authorization)
        .await
        .unwrap();

    let response = authorize(&server, "web", "user:info").await;
    response.assert_status(StatusCode::FOUND);
    assert!(location(&response).starts_with(APPROVE_PATH));
    assert!(
        stores
            .client_authorizations
            .get(&name)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn tightened_restrictions_override_earlier_consent() {
    let (server, stores) = setup().await;
    approved_code(&server, "user:full").await;

    let mut client = stores.clients.get("web").await.unwrap();
    client.scope_restrictions = vec![ScopeRestriction::ExactValues(vec!["user:info".into()])];
    stores.clients.update(client).await.unwrap();

    let response = authorize(&server, "web", "user:full").await;
    response.assert_status(StatusCode::FOUND);
    let redirect = location(&response);
    assert!(redirect.starts_with("https://client.example.com/cb?"), "{redirect}");
    assert_eq!(query_param(&redirect, "error").as_deref(), Some("access_denied"));
}

#[tokio::test]
async fn info_leaves_tokens_without_inactivity_timeout_alone() {
    let (server, stores) = setup().await;
    let code = approved_code(&server, "user:info").await;
    let token: serde_json::Value = redeem(&server, &code).await.json();
    let access_token = token["access_token"].as_str().unwrap();

    let mut client = stores.clients.get("web").await.unwrap();
    client.access_token_inactivity_timeout_seconds = Some(600);
    stores.clients.update(client).await.unwrap();

    server
        .get("/oauth/info")
        .add_header(header::AUTHORIZATION, bearer(access_token))
        .await
        .assert_status_ok();
    let stored = stores.access_tokens.get(access_token).await.unwrap();
    assert_eq!(stored.inactivity_timeout_seconds, None);
}

#[tokio::test]
async fn expired_access_tokens_are_removed_on_info() {
    let (server, stores) = setup().await;
    let code = approved_code(&server, "user:info").await;
    let token: serde_json::Value = redeem(&server, &code).await.json();
    let access_token = token["access_token"].as_str().unwrap();

    let mut stored = stores.access_tokens.get(access_token).await.unwrap();
    stores.access_tokens.delete(access_token, None).await.unwrap();
    stored.expires_in = 60;
    stored.meta.creation_timestamp -= time::Duration::hours(1);
    stores.access_tokens.create(stored).await.unwrap();

    let info = server
        .get("/oauth/info")
        .add_header(header::AUTHORIZATION, bearer(access_token))
        .await;
    info.assert_status_bad_request();
    let body: serde_json::Value = info.json();
    assert_eq!(body["error"], "invalid_grant");
    assert!(
        stores
            .access_tokens
            .get(access_token)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn code_can_only_be_redeemed_once() {
    let (server, _) = setup().await;
    let code = approved_code(&server, "user:info").await;

    let (first, second) = tokio::join!(redeem(&server, &code), redeem(&server, &code));
    let mut statuses = vec![first.status_code(), second.status_code()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::BAD_REQUEST]);

    let again = redeem(&server, &code).await;
    again.assert_status_bad_request();
    let body: serde_json::Value = again.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn auto_grant_clients_skip_consent() {
    let (server, _) = setup().await;
    let response = authorize(&server, "trusted", "user:full").await;
    response.assert_status(StatusCode::FOUND);
    assert!(location(&response).starts_with("https://trusted.example.com/cb?code="));
}

#[tokio::test]
async fn pkce_verifier_is_enforced() {
    let (server, _) = setup().await;
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));

    let response = server
        .get("/oauth/authorize")
        .add_query_param("client_id", "trusted")
        .add_query_param("response_type", "code")
        .add_query_param("code_challenge", &challenge)
        .add_query_param("code_challenge_method", "S256")
        .add_header(header::AUTHORIZATION, basic("alice", "pw"))
        .await;
    let code = query_param(&location(&response), "code").expect("code");

    let token = |verifier: &'static str| {
        server.post("/oauth/token").form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", "trusted"),
            ("client_secret", "trusted-secret"),
            ("code_verifier", verifier),
        ])
    };

    let wrong = token("wrong-verifier-wrong-verifier-wrong-verifier-00").await;
    wrong.assert_status_bad_request();
    let body: serde_json::Value = wrong.json();
    assert_eq!(body["error"], "invalid_grant");

    token(verifier).await.assert_status_ok();
}

#[tokio::test]
async fn implicit_flow_returns_token_in_fragment() {
    let (server, _) = setup().await;
    let response = server
        .get("/oauth/authorize")
        .add_query_param("client_id", "trusted")
        .add_query_param("response_type", "token")
        .add_query_param("state", "s1")
        .add_header(header::AUTHORIZATION, basic("alice", "pw"))
        .await;
    response.assert_status(StatusCode::FOUND);
    let redirect = location(&response);
    let (_, fragment) = redirect.split_once('#').expect("fragment");
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(fragment.as_bytes())
        .into_owned()
        .collect();
    assert!(pairs.iter().any(|(k, _)| k == "access_token"));
    assert!(pairs.contains(&("token_type".into(), "Bearer".into())));
    assert!(pairs.contains(&("state".into(), "s1".into())));
}

#[tokio::test]
async fn direct_grants_and_refresh_are_refused() {
    let (server, _) = setup().await;

    let password = server
        .post("/oauth/token")
        .add_header(header::AUTHORIZATION, basic("web", "web-secret"))
        .form(&[
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", "pw"),
        ])
        .await;
    password.assert_status_bad_request();
    let body: serde_json::Value = password.json();
    assert_eq!(body["error"], "access_denied");

    let refresh = server
        .post("/oauth/token")
        .add_header(header::AUTHORIZATION, basic("web", "web-secret"))
        .form(&[("grant_type", "refresh_token"), ("refresh_token", "anything")])
        .await;
    refresh.assert_status_bad_request();
    let body: serde_json::Value = refresh.json();
    assert_eq!(body["error"], "invalid_grant");

    let bad_secret = server
        .post("/oauth/token")
        .add_header(header::AUTHORIZATION, basic("web", "nope"))
        .form(&[("grant_type", "authorization_code"), ("code", "x")])
        .await;
    bad_secret.assert_status_unauthorized();
    let body: serde_json::Value = bad_secret.json();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn unknown_client_and_bad_redirect_are_answered_directly() {
    let (server, _) = setup().await;

    let unknown = authorize(&server, "nobody", "user:info").await;
    unknown.assert_status_bad_request();
    let body: serde_json::Value = unknown.json();
    assert_eq!(body["error"], "unauthorized_client");

    let bad_redirect = server
        .get("/oauth/authorize")
        .add_query_param("client_id", "web")
        .add_query_param("response_type", "code")
        .add_query_param("redirect_uri", "https://evil.example.com/cb")
        .await;
    bad_redirect.assert_status_bad_request();
    let body: serde_json::Value = bad_redirect.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn unauthenticated_browsers_and_cli_clients_are_sent_to_log_in() {
    let (server, _) = setup().await;

    let browser = server
        .get("/oauth/authorize")
        .add_query_param("client_id", "web")
        .add_query_param("response_type", "code")
        .await;
    browser.assert_status(StatusCode::FOUND);
    let login = location(&browser);
    assert!(login.starts_with("/oauth/login?then=%2Foauth%2Fauthorize"), "{login}");

    let cli = server
        .get("/oauth/authorize")
        .add_query_param("client_id", "cli")
        .add_query_param("response_type", "code")
        .await;
    cli.assert_status_unauthorized();
    assert_eq!(
        cli.header(header::WWW_AUTHENTICATE),
        "Basic realm=\"oauth-server\""
    );
}

#[tokio::test]
async fn login_form_establishes_a_session() {
    let (server, _) = setup().await;
    let then = "/oauth/authorize?client_id=trusted&response_type=code";

    let page = server.get("/oauth/login").add_query_param("then", then).await;
    page.assert_status_ok();
    let csrf = page.cookie("csrf");

    let login = server
        .post("/oauth/login")
        .add_cookie(csrf.clone())
        .form(&[
            ("then", then),
            ("csrf", csrf.value()),
            ("username", "bob"),
            ("password", "secret"),
        ])
        .await;
    login.assert_status(StatusCode::FOUND);
    assert_eq!(location(&login), then);
    let session = login.cookie("ssn");

    let response = server.get(then).add_cookie(session).await;
    response.assert_status(StatusCode::FOUND);
    let redirect = location(&response);
    assert!(redirect.starts_with("https://trusted.example.com/cb?code="), "{redirect}");

    let code = query_param(&redirect, "code").unwrap();
    let info = server.get("/oauth/info").add_query_param("code", &code).await;
    let body: serde_json::Value = info.json();
    assert_eq!(body["user_name"], "bob");
}

#[tokio::test]
async fn login_refuses_return_urls_that_leave_the_server() {
    let (server, _) = setup().await;
    let page = server
        .get("/oauth/login")
        .add_query_param("then", "/oauth/authorize")
        .await;
    let csrf = page.cookie("csrf");

    for then in [
        "/\t/evil.example.com/",
        "/\r\n/evil.example.com/",
        "/\n/evil.example.com/",
    ] {
        server
            .get("/oauth/login")
            .add_query_param("then", then)
            .await
            .assert_status_bad_request();

        let login = server
            .post("/oauth/login")
            .add_cookie(csrf.clone())
            .form(&[
                ("then", then),
                ("csrf", csrf.value()),
                ("username", "bob"),
                ("password", "secret"),
            ])
            .await;
        login.assert_status_bad_request();
        assert!(login.headers().get(header::LOCATION).is_none(), "{then:?}");
        assert!(login.maybe_cookie("ssn").is_none(), "{then:?}");
    }
}

#[tokio::test]
async fn discovery_and_health_endpoints() {
    let (server, _) = setup().await;

    let response = server.get("/.well-known/oauth-authorization-server").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["issuer"], "http://localhost:8080");
    assert_eq!(
        body["authorization_endpoint"],
        "http://localhost:8080/oauth/authorize"
    );
    assert_eq!(body["token_endpoint"], "http://localhost:8080/oauth/token");

    server.get("/healthz").await.assert_text("ok");
    server.get("/readyz").await.assert_status_ok();
}
