use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::auth_core::error::{AuthError, AuthResult};
use crate::auth_core::http_client::{HttpMethod, HttpRequest, OAuthHttpClient};
use crate::oauth2::options::OAuth2Options;

pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Result of parsing /.well-known/openid-configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiscoveryDocument {
    pub issuer: Option<String>,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub revocation_endpoint: Option<String>,
    pub introspection_endpoint: Option<String>,
    pub end_session_endpoint: Option<String>,
    pub response_types_supported: Vec<String>,
    pub response_modes_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

impl DiscoveryDocument {
    /// Copies discovered endpoints into `options`. Values already configured win.
    ///
    /// Fails when the provider advertises grant types that exclude the configured flow.
    pub fn apply_to(&self, options: &mut OAuth2Options) -> AuthResult<()> {
        fill(&mut options.authorization_path, &self.authorization_endpoint);
        fill(&mut options.token_path, &self.token_endpoint);
        fill(&mut options.logout_path, &self.end_session_endpoint);
        fill(&mut options.revocation_path, &self.revocation_endpoint);
        fill(&mut options.user_info_path, &self.userinfo_endpoint);
        fill(&mut options.jwk_path, &self.jwks_uri);
        fill(&mut options.introspection_path, &self.introspection_endpoint);

        if let Some(issuer) = &self.issuer {
            match &options.jwt_options.issuer {
                Some(expected) if options.validate_issuer => {
                    let received = issuer.trim_end_matches('/');
                    if received != expected.trim_end_matches('/') {
                        return Err(AuthError::authentication(format!(
                            "Issuer validation failed: received [{}] but expected [{}]",
                            received, expected
                        )));
                    }
                }
                Some(_) => {}
                None => options.jwt_options.issuer = Some(issuer.clone()),
            }
        }

        fill_list(&mut options.supported_response_types, &self.response_types_supported);
        fill_list(&mut options.supported_response_modes, &self.response_modes_supported);
        fill_list(&mut options.supported_grant_types, &self.grant_types_supported);
        fill_list(&mut options.supported_subject_types, &self.subject_types_supported);
        fill_list(&mut options.supported_scopes, &self.scopes_supported);
        fill_list(&mut options.supported_id_token_signing_alg_values, &self.id_token_signing_alg_values_supported);
        fill_list(&mut options.supported_token_endpoint_auth_methods, &self.token_endpoint_auth_methods_supported);
        fill_list(&mut options.supported_claims, &self.claims_supported);
        fill_list(&mut options.supported_code_challenge_methods, &self.code_challenge_methods_supported);

        let grant_type = options.flow.grant_type();
        if !self.grant_types_supported.is_empty() && !self.grant_types_supported.iter().any(|g| g == grant_type) {
            return Err(AuthError::authentication(format!(
                "Unsupported flow: {}, allowed: {:?}",
                grant_type, self.grant_types_supported
            )));
        }
        Ok(())
    }
}

fn fill(slot: &mut Option<String>, discovered: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(discovered);
    }
}

fn fill_list(slot: &mut Vec<String>, discovered: &[String]) {
    if slot.is_empty() {
        slot.extend_from_slice(discovered);
    }
}

/// Fetches provider metadata from `{site}/.well-known/openid-configuration`.
#[derive(Clone)]
pub struct DiscoveryClient<C: OAuthHttpClient> {
    client: C,
}

impl<C: OAuthHttpClient> DiscoveryClient<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// The discovery URL for a configured site.
    pub fn discovery_url(options: &OAuth2Options) -> AuthResult<String> {
        let site = options
            .resolved_site()?
            .ok_or_else(|| AuthError::InvalidArgument("the site url cannot be null".into()))?;
        let issuer = site.strip_suffix(DISCOVERY_PATH).unwrap_or(&site);
        Ok(format!("{}{}", issuer, DISCOVERY_PATH))
    }

    #[instrument(skip(self, options), level = "debug")]
    pub async fn fetch(&self, options: &OAuth2Options) -> AuthResult<DiscoveryDocument> {
        let url = Self::discovery_url(options)?;
        let mut req = HttpRequest::new(HttpMethod::GET, url.clone())
            .header("Accept", "application/json")
            .timeout(options.http_timeout);
        for (name, value) in &options.headers {
            req = req.header(name.clone(), value.clone());
        }
        let resp = tokio::time::timeout(options.http_timeout, self.client.execute(req))
            .await
            .map_err(|_| AuthError::Timeout(options.http_timeout))?
            .map_err(|e| AuthError::http(None, format!("Discovery request to {} failed: {}", url, e)))?;
        if resp.status != 200 {
            return Err(AuthError::http(
                Some(resp.status),
                format!("Bad Response [{}] {}", resp.status, String::from_utf8_lossy(&resp.body)),
            ));
        }
        if let Some(content_type) = resp.header("Content-Type") {
            if !content_type.contains("application/json") {
                return Err(AuthError::http(
                    Some(resp.status),
                    format!("Cannot handle content type: {}", content_type),
                ));
            }
        }
        let json: Value = serde_json::from_slice(&resp.body)
            .map_err(|e| AuthError::http(Some(resp.status), format!("Invalid discovery document: {}", e)))?;
        if json.get("error").is_some() {
            return Err(AuthError::http(Some(resp.status), crate::oauth2::api::extract_error_description(&json)));
        }
        let document: DiscoveryDocument = serde_json::from_value(json)
            .map_err(|e| AuthError::http(Some(resp.status), format!("Invalid discovery document: {}", e)))?;
        debug!(issuer = ?document.issuer, "Discovery document loaded");
        Ok(document)
    }

    /// Returns a copy of `options` completed with the provider's metadata.
    pub async fn discover(&self, options: &OAuth2Options) -> AuthResult<OAuth2Options> {
        let document = self.fetch(options).await?;
        let mut discovered = options.clone();
        document.apply_to(&mut discovered)?;
        Ok(discovered)
    }
}
