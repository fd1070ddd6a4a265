use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use starberry_auth::auth_core::crypto::pkce_code_challenge;
use starberry_auth::{
    AuthError, AuthState, AuthenticationProvider, ChannelUserAgent, Credentials, HttpClientError, HttpOptions,
    HttpRequest, HttpResponse, InMemoryHttpClient, OAuthHttpClient, OAuth2AuthenticationProvider, OAuth2Credentials, OAuth2Options, PubSecKeyOptions,
    QueryParams, TokenCheck, TokenCredentials, User, UsernamePasswordCredentials,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

const SECRET: &str = "integration-test-signing-secret";
const TOKEN_URL: &str = "https://idp.example.com/token";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter("starberry_auth=debug").try_init();
}

fn sign(claims: Value) -> String {
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn options() -> OAuth2Options {
    OAuth2Options::new()
        .with_client_id("app")
        .with_client_secret("secret")
        .with_site("https://idp.example.com")
        .with_authorization_path("/authorize")
        .with_token_path("/token")
        .with_introspection_path("/introspect")
        .with_revocation_path("/revoke")
        .with_user_info_path("/userinfo")
        .with_scopes(["openid", "email"])
        .add_pub_sec_key(PubSecKeyOptions::new("HS256", SECRET))
}

fn provider(
    client: &InMemoryHttpClient,
    options: OAuth2Options,
) -> (OAuth2AuthenticationProvider<InMemoryHttpClient>, UnboundedReceiver<String>) {
    let (agent, urls) = ChannelUserAgent::new();
    let provider = OAuth2AuthenticationProvider::new(client.clone(), Arc::new(agent), options)
        .unwrap()
        .with_http_options(HttpOptions::new().with_port(0).with_callback_timeout(Duration::from_secs(5)));
    (provider, urls)
}

fn query_of(url: &str) -> QueryParams {
    QueryParams::parse(url.split_once('?').map(|(_, q)| q).unwrap_or_default())
}

fn body_of(client: &InMemoryHttpClient, url: &str) -> QueryParams {
    let request = client.last_request_to(url).unwrap();
    QueryParams::parse(&String::from_utf8(request.body.unwrap_or_default()).unwrap())
}

/// Plays the browser: follows the redirect URI with the given query.
async fn redirect(redirect_uri: &str, query: &str) -> String {
    let port: u16 = redirect_uri
        .rsplit(':')
        .next()
        .and_then(|rest| rest.split('/').next())
        .and_then(|port| port.parse().ok())
        .unwrap();
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!("GET /auth?{} HTTP/1.1\r\nHost: localhost\r\n\r\n", query);
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn user_with(auth: Value) -> User {
    User::new("someone").with_attribute("auth", auth)
}

#[tokio::test]
async fn authorization_code_flow_end_to_end() {
    init_tracing();
    let client = InMemoryHttpClient::new();
    let (provider, mut urls) = provider(&client, options());
    let mut states = provider.subscribe();

    let attempt = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.authenticate(&OAuth2Credentials::new().into()).await })
    };

    let url = urls.recv().await.unwrap();
    assert!(url.starts_with("https://idp.example.com/authorize?response_type=code&client_id=app"));
    assert_eq!(provider.state(), AuthState::AwaitingRedirect);
    let sent = query_of(&url);
    let state = sent.get("state").unwrap().to_string();
    let nonce = sent.get("nonce").unwrap().to_string();
    let redirect_uri = sent.get("redirect_uri").unwrap().to_string();
    assert!(redirect_uri.starts_with("http://localhost:"));
    assert_eq!(sent.get("scope"), Some("openid email"));
    assert_eq!(sent.get("code_challenge_method"), Some("S256"));

    let id_token = sign(json!({
        "sub": "alice-sub",
        "name": "Alice",
        "email": "alice@example.com",
        "azp": "app",
        "nonce": nonce,
        "exp": Utc::now().timestamp() + 600,
    }));
    client.insert_response(
        TOKEN_URL,
        HttpResponse::json(&json!({
            "access_token": "opaque-access-token",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "id_token": id_token,
        })),
    );

    let page = redirect(&redirect_uri, &format!("code=the-code&state={}", state)).await;
    assert!(page.contains("Authentication Successful"));

    let user = attempt.await.unwrap().unwrap();
    assert_eq!(user.name(), "Alice");
    assert_eq!(user.email().as_deref(), Some("alice@example.com"));
    assert!(!user.expired());
    let auth = user.auth().unwrap();
    assert_eq!(auth["refresh_token"], "refresh-1");
    assert_eq!(auth["idToken"]["payload"]["sub"], "alice-sub");
    // Opaque access tokens are kept but not decoded.
    assert!(auth.get("accessToken").is_none());

    let exchanged = body_of(&client, TOKEN_URL);
    assert_eq!(exchanged.get("grant_type"), Some("authorization_code"));
    assert_eq!(exchanged.get("code"), Some("the-code"));
    assert_eq!(exchanged.get("redirect_uri"), Some(redirect_uri.as_str()));
    let verifier = exchanged.get("code_verifier").unwrap();
    assert_eq!(sent.get("code_challenge"), Some(pkce_code_challenge(verifier).as_str()));
    let request = client.last_request_to(TOKEN_URL).unwrap();
    assert_eq!(request.header_value("Authorization"), Some("Basic YXBwOnNlY3JldA=="));

    assert_eq!(*states.borrow_and_update(), AuthState::Authenticated);
}

#[tokio::test]
async fn forged_state_is_rejected() {
    let client = InMemoryHttpClient::new();
    let (provider, mut urls) = provider(&client, options());
    let attempt = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.authenticate(&OAuth2Credentials::new().into()).await })
    };

    let url = urls.recv().await.unwrap();
    let redirect_uri = query_of(&url).get("redirect_uri").unwrap().to_string();
    redirect(&redirect_uri, "code=the-code&state=forged").await;

    let err = attempt.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "State mismatch");
    assert_eq!(provider.state(), AuthState::Error("State mismatch".into()));
    assert!(client.last_request_to(TOKEN_URL).is_none());
}

#[tokio::test]
async fn denied_consent_surfaces_the_provider_error() {
    let client = InMemoryHttpClient::new();
    let (provider, mut urls) = provider(&client, options());
    let attempt = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.authenticate(&OAuth2Credentials::new().into()).await })
    };

    let url = urls.recv().await.unwrap();
    let redirect_uri = query_of(&url).get("redirect_uri").unwrap().to_string();
    redirect(&redirect_uri, "error=access_denied&error_description=denied%20by%20user").await;

    let err = attempt.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "access_denied: denied by user");
}

#[tokio::test]
async fn wrong_nonce_fails_token_validation() {
    let client = InMemoryHttpClient::new();
    let (provider, mut urls) = provider(&client, options());
    let attempt = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.authenticate(&OAuth2Credentials::new().into()).await })
    };

    let url = urls.recv().await.unwrap();
    let sent = query_of(&url);
    client.insert_response(
        TOKEN_URL,
        HttpResponse::json(&json!({
            "access_token": "opaque",
            "id_token": sign(json!({ "sub": "alice", "nonce": "replayed" })),
        })),
    );
    let query = format!("code=c&state={}", sent.get("state").unwrap());
    redirect(sent.get("redirect_uri").unwrap(), &query).await;

    let err = attempt.await.unwrap().unwrap_err();
    assert_eq!(err.token_check(), Some(TokenCheck::Nonce));
}

#[tokio::test]
async fn cancel_closes_the_listener() {
    let client = InMemoryHttpClient::new();
    let (provider, mut urls) = provider(&client, options());
    let attempt = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.authenticate(&OAuth2Credentials::new().into()).await })
    };

    urls.recv().await.unwrap();
    assert!(provider.cancel());
    let err = attempt.await.unwrap().unwrap_err();
    assert!(matches!(err, AuthError::Cancelled));
    assert!(err.is_recoverable());
    assert!(!provider.cancel());
}

#[tokio::test]
async fn username_and_password_use_the_password_grant() {
    let access_token = sign(json!({ "sub": "bob-sub", "name": "Bob" }));
    let client = InMemoryHttpClient::new();
    client.insert_response(TOKEN_URL, HttpResponse::json(&json!({ "access_token": access_token })));
    let (provider, _) = provider(&client, options());

    let credentials = Credentials::from(UsernamePasswordCredentials::new("bob", "pw"));
    let user = provider.authenticate(&credentials).await.unwrap();
    assert_eq!(user.name(), "Bob");
    assert_eq!(user.auth().unwrap()["claimToken"], "accessToken");

    let sent = body_of(&client, TOKEN_URL);
    assert_eq!(sent.get("grant_type"), Some("password"));
    assert_eq!(sent.get("username"), Some("bob"));
    assert_eq!(sent.get("scope"), Some("openid email"));
}

#[tokio::test]
async fn implicit_flow_is_not_supported() {
    let client = InMemoryHttpClient::new();
    let (provider, _) = provider(&client, options());
    let credentials = OAuth2Credentials::new().with_flow(starberry_auth::OAuth2Flow::Implicit);
    let err = provider.authenticate(&credentials.into()).await.unwrap_err();
    assert_eq!(err.to_string(), "Provided flow is not supported by provider");
}

#[tokio::test]
async fn opaque_tokens_are_introspected() {
    let client = InMemoryHttpClient::new();
    client.insert_response(
        "https://idp.example.com/introspect",
        HttpResponse::json(&json!({ "active": true, "username": "carol", "client_id": "other" })),
    );
    let (provider, _) = provider(&client, options());
    let user = provider.authenticate(&TokenCredentials::new("opaque").into()).await.unwrap();
    assert_eq!(user.name(), "carol");
    assert_eq!(user.auth().unwrap()["access_token"], "opaque");
    let sent = body_of(&client, "https://idp.example.com/introspect");
    assert_eq!(sent.get("token"), Some("opaque"));
    assert_eq!(sent.get("token_type_hint"), Some("access_token"));
}

#[tokio::test]
async fn inactive_tokens_are_rejected() {
    let client = InMemoryHttpClient::new();
    client.insert_response("https://idp.example.com/introspect", HttpResponse::json(&json!({ "active": false })));
    let (provider, _) = provider(&client, options());
    let err = provider.authenticate(&TokenCredentials::new("opaque").into()).await.unwrap_err();
    assert_eq!(err.to_string(), "Inactive Token");
}

#[tokio::test]
async fn tokens_need_introspection_when_not_verifiable() {
    let client = InMemoryHttpClient::new();
    let mut options = options();
    options.introspection_path = None;
    let (provider, _) = provider(&client, options);
    let err = provider.authenticate(&TokenCredentials::new("opaque").into()).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Can't authenticate `access_token`: Provider doesn't support token introspection"
    );
}

#[tokio::test]
async fn signed_bearer_tokens_are_accepted_locally() {
    let client = InMemoryHttpClient::new();
    let (provider, _) = provider(&client, options());
    let token = sign(json!({ "sub": "dave-sub", "email": "dave@example.com" }));
    let user = provider.authenticate(&TokenCredentials::new(token).into()).await.unwrap();
    assert_eq!(user.name(), "dave@example.com");
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn refresh_keeps_the_refresh_token_when_not_rotated() {
    let client = InMemoryHttpClient::new();
    client.insert_response(TOKEN_URL, HttpResponse::json(&json!({ "access_token": "fresh", "expires_in": "60" })));
    let (provider, _) = provider(&client, options());

    let user = user_with(json!({ "access_token": "stale", "refresh_token": "refresh-1" }));
    let refreshed = provider.refresh(&user).await.unwrap();
    let auth = refreshed.auth().unwrap();
    assert_eq!(auth["access_token"], "fresh");
    assert_eq!(auth["refresh_token"], "refresh-1");
    assert!(auth["expires_at"].as_i64().unwrap() > Utc::now().timestamp());

    let sent = body_of(&client, TOKEN_URL);
    assert_eq!(sent.get("grant_type"), Some("refresh_token"));
    assert_eq!(sent.get("refresh_token"), Some("refresh-1"));

    let err = provider.refresh(&user_with(json!({}))).await.unwrap_err();
    assert_eq!(err.to_string(), "refresh_token is null or missing");
}

#[tokio::test]
async fn revoke_and_introspect_read_tokens_from_the_user() {
    let client = InMemoryHttpClient::with_default(HttpResponse::json(&json!({ "active": true })));
    let (provider, _) = provider(&client, options());
    let user = user_with(json!({ "access_token": "at", "refresh_token": "rt" }));

    provider.revoke(&user, "refresh_token").await.unwrap();
    let sent = body_of(&client, "https://idp.example.com/revoke");
    assert_eq!(sent.get("token"), Some("rt"));
    assert_eq!(sent.get("token_type_hint"), Some("refresh_token"));

    let info = provider.introspect(&user, "access_token").await.unwrap();
    assert_eq!(info["active"], true);

    let err = provider.revoke(&user_with(json!({})), "access_token").await.unwrap_err();
    assert_eq!(err.to_string(), "access_token is null or missing");
}

#[tokio::test]
async fn user_info_subject_must_match_the_access_token() {
    let client = InMemoryHttpClient::new();
    client.insert_response("https://idp.example.com/userinfo", HttpResponse::json(&json!({ "sub": "mallory" })));
    let (provider, _) = provider(&client, options());

    let user = user_with(json!({
        "access_token": "at",
        "accessToken": { "payload": { "sub": "alice" } },
    }));
    let err = provider.user_info(&user).await.unwrap_err();
    assert_eq!(err.to_string(), "User subject does not match UserInfo subject");

    let request = client.last_request_to("https://idp.example.com/userinfo").unwrap();
    assert_eq!(request.header_value("Authorization"), Some("Bearer at"));

    let anonymous = user_with(json!({ "access_token": "at" }));
    assert_eq!(provider.user_info(&anonymous).await.unwrap()["sub"], "mallory");
}

#[tokio::test]
async fn results_are_delivered_through_the_executor() {
    let access_token = sign(json!({ "name": "Erin" }));
    let client = InMemoryHttpClient::new();
    client.insert_response(TOKEN_URL, HttpResponse::json(&json!({ "access_token": access_token })));
    let (provider, _) = provider(&client, options());

    let (tx, rx) = tokio::sync::oneshot::channel();
    let credentials = Credentials::from(UsernamePasswordCredentials::new("erin", "pw"));
    provider
        .authenticate_and_deliver(credentials, move |result| {
            let _ = tx.send(result.map(|user| user.name().to_string()));
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap().unwrap(), "Erin");
}

/// A backend that accepts requests and never answers.
#[derive(Clone)]
struct StalledHttpClient;

impl OAuthHttpClient for StalledHttpClient {
    fn execute(
        &self,
        _request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpClientError>> + Send + 'static>> {
        Box::pin(std::future::pending())
    }
}

#[tokio::test]
async fn unresponsive_token_endpoint_times_out() {
    let (agent, _) = ChannelUserAgent::new();
    let options = options().with_http_timeout(Duration::from_millis(100));
    let provider = OAuth2AuthenticationProvider::new(StalledHttpClient, Arc::new(agent), options).unwrap();
    let user = user_with(json!({ "access_token": "at", "refresh_token": "rt" }));

    let err = tokio::time::timeout(Duration::from_secs(2), provider.refresh(&user))
        .await
        .expect("the backend deadline applies")
        .unwrap_err();
    assert!(matches!(err, AuthError::Timeout(limit) if limit == Duration::from_millis(100)));
    assert!(err.is_recoverable());
}
