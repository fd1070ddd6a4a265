use std::collections::BTreeMap;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::flow::OAuth2Flow;
use crate::auth_core::error::{AuthError, AuthResult};

pub const DEFAULT_AUTHORIZATION_PATH: &str = "/oauth/authorize";
pub const DEFAULT_TOKEN_PATH: &str = "/oauth/token";
pub const DEFAULT_REVOCATION_PATH: &str = "/oauth/revoke";
pub const DEFAULT_SCOPE_SEPARATOR: &str = " ";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

lazy_static! {
    static ref TENANT_PATTERN: Regex = Regex::new(r"\{(tenant|tenantid|realm)\}").unwrap();
}

/// Expectations applied to JSON Web Tokens issued by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JWTOptions {
    pub issuer: Option<String>,
    pub subject: Option<String>,
    /// Every listed audience must appear in the token's `aud` claim.
    pub audience: Vec<String>,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway: u64,
    pub ignore_expiration: bool,
    /// Fixed nonce for every authorization request. When unset a fresh one is
    /// generated per attempt.
    pub nonce: Option<String>,
    /// Digest applied to the nonce before it is sent, e.g. `SHA-256`.
    pub nonce_algorithm: Option<String>,
}

impl JWTOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn add_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience.push(audience.into());
        self
    }

    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway = seconds;
        self
    }

    pub fn with_ignore_expiration(mut self, ignore: bool) -> Self {
        self.ignore_expiration = ignore;
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn with_nonce_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.nonce_algorithm = Some(algorithm.into());
        self
    }
}

/// How token introspection requests carry the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntrospectionMode {
    /// RFC 7662 form body with `token` and `token_type_hint`.
    #[default]
    Form,
    /// `?{token_type}={token}` on the URL with an empty body, as Google's tokeninfo expects.
    Query,
}

/// A statically configured verification key: an HMAC secret or a PEM encoded public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSecKeyOptions {
    /// Key id matched against the token header `kid`.
    pub id: Option<String>,
    /// JWS algorithm name, e.g. `RS256` or `HS256`.
    pub algorithm: String,
    pub buffer: String,
}

impl PubSecKeyOptions {
    pub fn new(algorithm: impl Into<String>, buffer: impl Into<String>) -> Self {
        Self { id: None, algorithm: algorithm.into(), buffer: buffer.into() }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Configuration of an OAuth2 / OpenID Connect provider.
///
/// Endpoint paths beginning with `/` are resolved against `site`; any other
/// value is taken as an absolute URL. `{tenant}`, `{tenantid}` and `{realm}`
/// placeholders are replaced with `tenant` on resolution. Endpoints left unset
/// are filled in by discovery, and the authorization, token and revocation
/// endpoints fall back to the conventional `/oauth/...` paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2Options {
    pub flow: OAuth2Flow,
    /// Send a PKCE challenge with the authorization code flow.
    pub pkce: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_assertion_type: Option<String>,
    pub client_assertion: Option<String>,
    pub tenant: Option<String>,
    pub site: Option<String>,
    pub authorization_path: Option<String>,
    pub token_path: Option<String>,
    pub revocation_path: Option<String>,
    pub user_info_path: Option<String>,
    pub jwk_path: Option<String>,
    pub introspection_path: Option<String>,
    pub introspection_mode: IntrospectionMode,
    pub logout_path: Option<String>,
    pub redirect_uri: Option<String>,
    pub scopes: Vec<String>,
    pub scope_separator: String,
    /// Query parameters appended to every userinfo request.
    pub user_info_params: BTreeMap<String, String>,
    /// Parameters merged into every token request.
    pub extra_params: Map<String, Value>,
    /// Headers added to every backend request.
    pub headers: BTreeMap<String, String>,
    pub user_agent: Option<String>,
    /// Confidential clients authenticate with HTTP Basic instead of body parameters.
    pub use_basic_authorization: bool,
    pub verify_token: bool,
    pub validate_issuer: bool,
    /// Use `127.0.0.1` instead of `localhost` in normalized redirect URIs.
    pub use_loopback_ip_address: bool,
    /// How long fetched JWKS keys are trusted. `None` keeps them until a `kid` misses.
    pub jwk_max_age: Option<Duration>,
    pub http_timeout: Duration,
    pub jwt_options: JWTOptions,
    pub pub_sec_keys: Vec<PubSecKeyOptions>,
    pub supported_response_types: Vec<String>,
    pub supported_response_modes: Vec<String>,
    pub supported_grant_types: Vec<String>,
    pub supported_subject_types: Vec<String>,
    pub supported_scopes: Vec<String>,
    pub supported_id_token_signing_alg_values: Vec<String>,
    pub supported_token_endpoint_auth_methods: Vec<String>,
    pub supported_claims: Vec<String>,
    pub supported_code_challenge_methods: Vec<String>,
}

impl Default for OAuth2Options {
    fn default() -> Self {
        Self {
            flow: OAuth2Flow::AuthCode,
            pkce: true,
            client_id: None,
            client_secret: None,
            client_assertion_type: None,
            client_assertion: None,
            tenant: None,
            site: None,
            authorization_path: None,
            token_path: None,
            revocation_path: None,
            user_info_path: None,
            jwk_path: None,
            introspection_path: None,
            introspection_mode: IntrospectionMode::Form,
            logout_path: None,
            redirect_uri: None,
            scopes: Vec::new(),
            scope_separator: DEFAULT_SCOPE_SEPARATOR.to_string(),
            user_info_params: BTreeMap::new(),
            extra_params: Map::new(),
            headers: BTreeMap::new(),
            user_agent: None,
            use_basic_authorization: true,
            verify_token: true,
            validate_issuer: true,
            use_loopback_ip_address: false,
            jwk_max_age: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            jwt_options: JWTOptions::default(),
            pub_sec_keys: Vec::new(),
            supported_response_types: Vec::new(),
            supported_response_modes: Vec::new(),
            supported_grant_types: Vec::new(),
            supported_subject_types: Vec::new(),
            supported_scopes: Vec::new(),
            supported_id_token_signing_alg_values: Vec::new(),
            supported_token_endpoint_auth_methods: Vec::new(),
            supported_claims: Vec::new(),
            supported_code_challenge_methods: Vec::new(),
        }
    }
}

impl OAuth2Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(mut self, flow: OAuth2Flow) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_pkce(mut self, pkce: bool) -> Self {
        self.pkce = pkce;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn with_client_assertion(mut self, assertion_type: impl Into<String>, assertion: impl Into<String>) -> Self {
        self.client_assertion_type = Some(assertion_type.into());
        self.client_assertion = Some(assertion.into());
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn with_authorization_path(mut self, path: impl Into<String>) -> Self {
        self.authorization_path = Some(path.into());
        self
    }

    pub fn with_token_path(mut self, path: impl Into<String>) -> Self {
        self.token_path = Some(path.into());
        self
    }

    pub fn with_revocation_path(mut self, path: impl Into<String>) -> Self {
        self.revocation_path = Some(path.into());
        self
    }

    pub fn with_user_info_path(mut self, path: impl Into<String>) -> Self {
        self.user_info_path = Some(path.into());
        self
    }

    pub fn with_jwk_path(mut self, path: impl Into<String>) -> Self {
        self.jwk_path = Some(path.into());
        self
    }

    pub fn with_introspection_path(mut self, path: impl Into<String>) -> Self {
        self.introspection_path = Some(path.into());
        self
    }

    pub fn with_introspection_mode(mut self, mode: IntrospectionMode) -> Self {
        self.introspection_mode = mode;
        self
    }

    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = Some(path.into());
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Appends a scope unless it is already present. Order is preserved.
    pub fn add_scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.clear();
        for scope in scopes {
            self = self.add_scope(scope);
        }
        self
    }

    pub fn with_scope_separator(mut self, separator: impl Into<String>) -> Self {
        self.scope_separator = separator.into();
        self
    }

    pub fn with_user_info_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_info_params.insert(key.into(), value.into());
        self
    }

    pub fn with_extra_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_params.insert(key.into(), value);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_basic_authorization(mut self, enabled: bool) -> Self {
        self.use_basic_authorization = enabled;
        self
    }

    pub fn with_verify_token(mut self, verify: bool) -> Self {
        self.verify_token = verify;
        self
    }

    pub fn with_validate_issuer(mut self, validate: bool) -> Self {
        self.validate_issuer = validate;
        self
    }

    pub fn with_loopback_ip_address(mut self, enabled: bool) -> Self {
        self.use_loopback_ip_address = enabled;
        self
    }

    pub fn with_jwk_max_age(mut self, max_age: Duration) -> Self {
        self.jwk_max_age = Some(max_age);
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_jwt_options(mut self, jwt_options: JWTOptions) -> Self {
        self.jwt_options = jwt_options;
        self
    }

    pub fn add_pub_sec_key(mut self, key: PubSecKeyOptions) -> Self {
        self.pub_sec_keys.push(key);
        self
    }

    /// `site` with its trailing `/` removed and placeholders replaced.
    pub fn resolved_site(&self) -> AuthResult<Option<String>> {
        self.site
            .as_deref()
            .map(|site| self.replace_variables(site.trim_end_matches('/')))
            .transpose()
    }

    pub fn authorization_url(&self) -> AuthResult<String> {
        self.compute_path(self.authorization_path.as_deref().unwrap_or(DEFAULT_AUTHORIZATION_PATH))
    }

    pub fn token_url(&self) -> AuthResult<String> {
        self.compute_path(self.token_path.as_deref().unwrap_or(DEFAULT_TOKEN_PATH))
    }

    pub fn revocation_url(&self) -> AuthResult<String> {
        self.compute_path(self.revocation_path.as_deref().unwrap_or(DEFAULT_REVOCATION_PATH))
    }

    pub fn user_info_url(&self) -> AuthResult<Option<String>> {
        self.optional_path(self.user_info_path.as_deref())
    }

    pub fn jwk_url(&self) -> AuthResult<Option<String>> {
        self.optional_path(self.jwk_path.as_deref())
    }

    pub fn introspection_url(&self) -> AuthResult<Option<String>> {
        self.optional_path(self.introspection_path.as_deref())
    }

    pub fn logout_url(&self) -> AuthResult<Option<String>> {
        self.optional_path(self.logout_path.as_deref())
    }

    fn optional_path(&self, path: Option<&str>) -> AuthResult<Option<String>> {
        path.map(|p| self.compute_path(p)).transpose()
    }

    /// Resolves a configured endpoint against `site` and substitutes placeholders.
    pub fn compute_path(&self, path: &str) -> AuthResult<String> {
        if path.starts_with('/') {
            if let Some(site) = self.site.as_deref() {
                return self.replace_variables(&format!("{}{}", site.trim_end_matches('/'), path));
            }
        }
        self.replace_variables(path)
    }

    /// Replaces `{tenant}`, `{tenantid}` and `{realm}` with the configured tenant.
    pub fn replace_variables(&self, path: &str) -> AuthResult<String> {
        if !TENANT_PATTERN.is_match(path) {
            return Ok(path.to_string());
        }
        match self.tenant.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(tenant) => Ok(TENANT_PATTERN.replace_all(path, tenant).into_owned()),
            None => Err(AuthError::InvalidArgument("The tenant value is null or blank.".into())),
        }
    }

    /// Scopes joined with the configured separator.
    pub fn scope_string(&self, scopes: &[String]) -> String {
        scopes.join(&self.scope_separator)
    }

    /// The client id, required non-blank before any call that sends it.
    pub fn require_client_id(&self) -> AuthResult<&str> {
        self.client_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AuthError::InvalidArgument("Missing configuration: [clientId]".into()))
    }

    /// Checks the client configuration is complete for the configured flow.
    pub fn validate(&self) -> AuthResult<()> {
        let assertion = (self.client_assertion_type.is_some(), self.client_assertion.is_some());
        if assertion.0 != assertion.1 {
            return Err(AuthError::InvalidArgument(
                "Missing configuration: [clientAssertion] and [clientAssertionType]".into(),
            ));
        }
        let uses_assertion = assertion.0 && assertion.1;
        match self.flow {
            OAuth2Flow::AuthCode | OAuth2Flow::AuthJwt if !uses_assertion => {
                self.require_client_id()?;
            }
            OAuth2Flow::Password if !uses_assertion && self.client_id.is_none() => {
                debug!("If you are using Client OAuth2 Resource Owner flow, please specify [clientId]");
            }
            _ => {}
        }
        Ok(())
    }
}
