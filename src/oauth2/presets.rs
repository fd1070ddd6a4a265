//! Ready-made configurations for well known identity providers.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::flow::OAuth2Flow;
use super::options::{IntrospectionMode, JWTOptions, OAuth2Options, PubSecKeyOptions};
use super::provider::OAuth2AuthenticationProvider;
use crate::auth_core::capability::UserAgentLauncher;
use crate::auth_core::error::{AuthError, AuthResult};
use crate::auth_core::http_client::OAuthHttpClient;

/// Google accounts. Token introspection goes through the `tokeninfo` endpoint,
/// which takes the token as a query parameter.
pub struct GoogleAuthenticationProvider;

impl GoogleAuthenticationProvider {
    pub const DEFAULT_SCOPES: [&'static str; 3] = ["openid", "email", "profile"];
    pub const SITE: &'static str = "https://accounts.google.com";

    pub fn options(client_id: impl Into<String>, client_secret: impl Into<String>) -> OAuth2Options {
        OAuth2Options::new()
            .with_flow(OAuth2Flow::AuthCode)
            .with_client_id(client_id)
            .with_client_secret(client_secret)
            .with_scopes(Self::DEFAULT_SCOPES)
            .with_site(Self::SITE)
            .with_token_path("https://oauth2.googleapis.com/token")
            .with_authorization_path("/o/oauth2/v2/auth")
            .with_user_info_path("https://www.googleapis.com/oauth2/v1/userinfo")
            .with_jwk_path("https://www.googleapis.com/oauth2/v3/certs")
            .with_introspection_path("https://oauth2.googleapis.com/tokeninfo")
            .with_introspection_mode(IntrospectionMode::Query)
            .with_revocation_path("https://oauth2.googleapis.com/revoke")
            .with_user_info_param("alt", "json")
    }

    /// A provider with Google's fixed endpoints; no discovery round trip.
    pub fn create<C: OAuthHttpClient>(
        client: C,
        launcher: Arc<dyn UserAgentLauncher>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> AuthResult<OAuth2AuthenticationProvider<C>> {
        OAuth2AuthenticationProvider::new(client, launcher, Self::options(client_id, client_secret))
    }

    /// Completes `options` from Google's discovery document.
    pub async fn discover<C: OAuthHttpClient>(
        client: C,
        launcher: Arc<dyn UserAgentLauncher>,
        options: OAuth2Options,
    ) -> AuthResult<OAuth2AuthenticationProvider<C>> {
        let mut options = options
            .with_introspection_mode(IntrospectionMode::Query)
            .with_user_info_param("alt", "json");
        if options.site.is_none() {
            options.site = Some(Self::SITE.to_string());
        }
        OAuth2AuthenticationProvider::discover(client, launcher, options).await
    }
}

/// Microsoft identity platform (Entra ID). Tokens carry a tenant specific
/// issuer that differs from the `common` site, so issuer validation is off.
pub struct MicrosoftAuthenticationProvider;

impl MicrosoftAuthenticationProvider {
    pub const COMMON_TENANT: &'static str = "common";
    pub const CONSUMERS_TENANT: &'static str = "consumers";
    pub const ORGANIZATIONS_TENANT: &'static str = "organizations";
    pub const DEFAULT_SCOPES: [&'static str; 4] = ["openid", "profile", "email", "offline_access"];
    pub const SITE: &'static str = "https://login.microsoftonline.com/{tenant}/v2.0";
    const NONCE_ALGORITHM: &'static str = "SHA-256";

    pub fn options(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        tenant: impl Into<String>,
    ) -> OAuth2Options {
        OAuth2Options::new()
            .with_flow(OAuth2Flow::AuthCode)
            .with_client_id(client_id)
            .with_client_secret(client_secret)
            .with_tenant(tenant)
            .with_scopes(Self::DEFAULT_SCOPES)
            .with_site(Self::SITE)
            .with_token_path("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token")
            .with_authorization_path("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/authorize")
            .with_user_info_path("https://graph.microsoft.com/oidc/userinfo")
            .with_jwk_path("https://login.microsoftonline.com/{tenant}/discovery/v2.0/keys")
            .with_logout_path("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/logout")
            .with_validate_issuer(false)
            .with_jwt_options(JWTOptions::new().with_nonce_algorithm(Self::NONCE_ALGORITHM))
    }

    pub fn create<C: OAuthHttpClient>(
        client: C,
        launcher: Arc<dyn UserAgentLauncher>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        tenant: impl Into<String>,
    ) -> AuthResult<OAuth2AuthenticationProvider<C>> {
        OAuth2AuthenticationProvider::new(client, launcher, Self::options(client_id, client_secret, tenant))
    }

    /// Discovery with the Microsoft defaults: issuer validation off and
    /// SHA-256 nonces unless another algorithm is configured.
    pub async fn discover<C: OAuthHttpClient>(
        client: C,
        launcher: Arc<dyn UserAgentLauncher>,
        options: OAuth2Options,
    ) -> AuthResult<OAuth2AuthenticationProvider<C>> {
        let mut options = options.with_validate_issuer(false);
        if options.site.is_none() {
            options.site = Some(Self::SITE.to_string());
        }
        if options.jwt_options.nonce_algorithm.is_none() {
            options.jwt_options.nonce_algorithm = Some(Self::NONCE_ALGORITHM.to_string());
        }
        OAuth2AuthenticationProvider::discover(client, launcher, options).await
    }
}

/// Keycloak realms, configured by hand or from the adapter JSON exported by
/// the admin console.
pub struct KeycloakAuthenticationProvider;

impl KeycloakAuthenticationProvider {
    const AUTHORIZATION_PATH: &'static str = "/protocol/openid-connect/auth";
    const TOKEN_PATH: &'static str = "/protocol/openid-connect/token";
    const REVOCATION_PATH: &'static str = "/protocol/openid-connect/revoke";
    const USER_INFO_PATH: &'static str = "/protocol/openid-connect/userinfo";
    const LOGOUT_PATH: &'static str = "/protocol/openid-connect/logout";
    const INTROSPECTION_PATH: &'static str = "/protocol/openid-connect/token/introspect";
    const JWK_PATH: &'static str = "/protocol/openid-connect/certs";

    /// Maps an adapter configuration (`resource`, `auth-server-url`,
    /// `credentials.secret`, `realm`, `realm-public-key`) to options.
    ///
    /// The realm becomes the tenant and the site points at `/realms/{realm}`
    /// below the auth server, so the relative protocol paths resolve there.
    pub fn from_json(flow: Option<OAuth2Flow>, config: &Value) -> AuthResult<OAuth2Options> {
        let config = config
            .as_object()
            .ok_or_else(|| AuthError::InvalidArgument("Keycloak configuration must be a JSON object".into()))?;
        let text = |key: &str| config.get(key).and_then(Value::as_str);

        let mut options = OAuth2Options::new().with_flow(flow.unwrap_or_default());
        if let Some(resource) = text("resource") {
            options = options.with_client_id(resource);
        }
        if let Some(secret) = config.get("credentials").and_then(|c| c.get("secret")).and_then(Value::as_str) {
            options = options.with_client_secret(secret);
        }
        let server = text("auth-server-url").map(|url| url.trim_end_matches('/').to_string());
        match text("realm") {
            Some(realm) => {
                options = options
                    .with_tenant(realm)
                    .with_authorization_path(Self::AUTHORIZATION_PATH)
                    .with_token_path(Self::TOKEN_PATH)
                    .with_revocation_path(Self::REVOCATION_PATH)
                    .with_user_info_path(Self::USER_INFO_PATH)
                    .with_logout_path(Self::LOGOUT_PATH)
                    .with_introspection_path(Self::INTROSPECTION_PATH)
                    .with_jwk_path(Self::JWK_PATH);
                if let Some(server) = server {
                    let site = if server.contains("/realms/") { server } else { format!("{}/realms/{{realm}}", server) };
                    options = options.with_site(site);
                }
            }
            None => {
                if let Some(server) = server {
                    options = options.with_site(server);
                }
            }
        }
        if let Some(key) = text("realm-public-key") {
            let pem = format!("-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n", key);
            options = options.add_pub_sec_key(PubSecKeyOptions::new("RS256", pem));
        }
        debug!(realm = ?options.tenant, site = ?options.site, "Keycloak configuration imported");
        Ok(options)
    }

    pub fn create<C: OAuthHttpClient>(
        client: C,
        launcher: Arc<dyn UserAgentLauncher>,
        flow: Option<OAuth2Flow>,
        config: &Value,
    ) -> AuthResult<OAuth2AuthenticationProvider<C>> {
        OAuth2AuthenticationProvider::new(client, launcher, Self::from_json(flow, config)?)
    }

    pub async fn discover<C: OAuthHttpClient>(
        client: C,
        launcher: Arc<dyn UserAgentLauncher>,
        options: OAuth2Options,
    ) -> AuthResult<OAuth2AuthenticationProvider<C>> {
        OAuth2AuthenticationProvider::discover(client, launcher, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn microsoft_paths_substitute_the_tenant() {
        let options = MicrosoftAuthenticationProvider::options("app", "secret", MicrosoftAuthenticationProvider::COMMON_TENANT);
        assert_eq!(
            options.token_url().unwrap(),
            "https://login.microsoftonline.com/common/oauth2/v2.0/token"
        );
        assert_eq!(
            options.jwk_url().unwrap().as_deref(),
            Some("https://login.microsoftonline.com/common/discovery/v2.0/keys")
        );
        assert!(!options.validate_issuer);
        assert_eq!(options.jwt_options.nonce_algorithm.as_deref(), Some("SHA-256"));
        assert_eq!(options.scopes, vec!["openid", "profile", "email", "offline_access"]);
    }

    #[test]
    fn keycloak_adapter_json() {
        let config = json!({
            "realm": "demo",
            "auth-server-url": "https://kc.example.com/",
            "resource": "web-app",
            "credentials": { "secret": "s3cret" },
            "realm-public-key": "MIIBIjAN"
        });
        let options = KeycloakAuthenticationProvider::from_json(None, &config).unwrap();
        assert_eq!(options.flow, OAuth2Flow::AuthCode);
        assert_eq!(options.client_id.as_deref(), Some("web-app"));
        assert_eq!(options.client_secret.as_deref(), Some("s3cret"));
        assert_eq!(options.tenant.as_deref(), Some("demo"));
        assert_eq!(
            options.token_url().unwrap(),
            "https://kc.example.com/realms/demo/protocol/openid-connect/token"
        );
        assert_eq!(
            options.introspection_url().unwrap().as_deref(),
            Some("https://kc.example.com/realms/demo/protocol/openid-connect/token/introspect")
        );
        assert_eq!(options.pub_sec_keys.len(), 1);
        assert_eq!(options.pub_sec_keys[0].algorithm, "RS256");
        assert_eq!(
            options.pub_sec_keys[0].buffer,
            "-----BEGIN PUBLIC KEY-----\nMIIBIjAN\n-----END PUBLIC KEY-----\n"
        );
    }

    #[test]
    fn keycloak_rejects_non_objects() {
        assert!(matches!(
            KeycloakAuthenticationProvider::from_json(Some(OAuth2Flow::Password), &json!("nope")),
            Err(AuthError::InvalidArgument(_))
        ));
    }
}
