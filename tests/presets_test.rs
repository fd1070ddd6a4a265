use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use starberry_auth::{
    ChannelUserAgent, GoogleAuthenticationProvider, HttpMethod, HttpResponse, InMemoryHttpClient, IntrospectionMode,
    KeycloakAuthenticationProvider, MicrosoftAuthenticationProvider, OAuth2Flow, User,
};

#[tokio::test]
async fn google_endpoints_without_discovery() {
    let (agent, _) = ChannelUserAgent::new();
    let provider =
        GoogleAuthenticationProvider::create(InMemoryHttpClient::new(), Arc::new(agent), "client", "secret").unwrap();
    let options = provider.options().await;

    assert_eq!(options.flow, OAuth2Flow::AuthCode);
    assert_eq!(options.client_id.as_deref(), Some("client"));
    assert_eq!(options.client_secret.as_deref(), Some("secret"));
    assert_eq!(options.site.as_deref(), Some("https://accounts.google.com"));
    assert_eq!(options.token_url().unwrap(), "https://oauth2.googleapis.com/token");
    assert_eq!(options.authorization_url().unwrap(), "https://accounts.google.com/o/oauth2/v2/auth");
    assert_eq!(
        options.user_info_url().unwrap().as_deref(),
        Some("https://www.googleapis.com/oauth2/v1/userinfo")
    );
    assert_eq!(options.jwk_url().unwrap().as_deref(), Some("https://www.googleapis.com/oauth2/v3/certs"));
    assert_eq!(
        options.introspection_url().unwrap().as_deref(),
        Some("https://oauth2.googleapis.com/tokeninfo")
    );
    assert_eq!(options.revocation_url().unwrap(), "https://oauth2.googleapis.com/revoke");
    assert_eq!(options.user_info_params.get("alt").map(String::as_str), Some("json"));
    assert_eq!(options.scopes, vec!["openid", "email", "profile"]);
}

#[tokio::test]
async fn google_introspection_sends_the_token_in_the_query() {
    let client = InMemoryHttpClient::with_default(HttpResponse::json(&json!({ "aud": "client" })));
    let (agent, _) = ChannelUserAgent::new();
    let provider = GoogleAuthenticationProvider::create(client.clone(), Arc::new(agent), "client", "secret").unwrap();
    assert_eq!(provider.options().await.introspection_mode, IntrospectionMode::Query);

    let user = User::new("u").with_attribute("auth", json!({ "access_token": "ya29.token" }));
    provider.introspect(&user, "access_token").await.unwrap();

    let request = client.last_request_to("https://oauth2.googleapis.com/tokeninfo").unwrap();
    assert_eq!(request.method, HttpMethod::POST);
    assert_eq!(request.url, "https://oauth2.googleapis.com/tokeninfo?access_token=ya29.token");
}

#[tokio::test]
async fn microsoft_tenant_is_substituted() {
    let (agent, _) = ChannelUserAgent::new();
    let provider = MicrosoftAuthenticationProvider::create(
        InMemoryHttpClient::new(),
        Arc::new(agent),
        "client",
        "secret",
        MicrosoftAuthenticationProvider::ORGANIZATIONS_TENANT,
    )
    .unwrap();
    let options = provider.options().await;
    assert_eq!(
        options.authorization_url().unwrap(),
        "https://login.microsoftonline.com/organizations/oauth2/v2.0/authorize"
    );
    assert_eq!(
        options.logout_url().unwrap().as_deref(),
        Some("https://login.microsoftonline.com/organizations/oauth2/v2.0/logout")
    );
    assert!(!options.validate_issuer);
}

#[tokio::test]
async fn keycloak_provider_from_adapter_json() {
    let config = json!({
        "realm": "demo",
        "auth-server-url": "http://localhost:8180",
        "resource": "cli",
        "public-client": true
    });
    let (agent, _) = ChannelUserAgent::new();
    let provider =
        KeycloakAuthenticationProvider::create(InMemoryHttpClient::new(), Arc::new(agent), None, &config).unwrap();
    let options = provider.options().await;
    assert_eq!(options.client_secret, None);
    assert_eq!(
        options.authorization_url().unwrap(),
        "http://localhost:8180/realms/demo/protocol/openid-connect/auth"
    );
    assert_eq!(
        options.jwk_url().unwrap().as_deref(),
        Some("http://localhost:8180/realms/demo/protocol/openid-connect/certs")
    );
}

#[tokio::test]
async fn keycloak_code_flow_needs_a_client_id() {
    let (agent, _) = ChannelUserAgent::new();
    let config = json!({ "realm": "demo", "auth-server-url": "http://localhost:8180" });
    let err = KeycloakAuthenticationProvider::create(InMemoryHttpClient::new(), Arc::new(agent), None, &config)
        .err()
        .unwrap();
    assert_eq!(err.to_string(), "Missing configuration: [clientId]");
}
