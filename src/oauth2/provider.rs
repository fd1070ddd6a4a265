//! The OAuth2 / OpenID Connect authentication provider.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::api::OAuth2Api;
use super::credentials::OAuth2Credentials;
use super::flow::OAuth2Flow;
use super::options::OAuth2Options;
use crate::auth_core::capability::{DirectExecutor, UiThreadExecutor, UserAgentLauncher};
use crate::auth_core::credentials::{Credentials, TokenCredentials, UsernamePasswordCredentials};
use crate::auth_core::crypto::{generate_code_verifier, generate_state, hash_nonce, random_token};
use crate::auth_core::error::{AuthError, AuthResult};
use crate::auth_core::http_client::OAuthHttpClient;
use crate::auth_core::provider::AuthenticationProvider;
use crate::auth_core::user::{User, KEY_AUTH};
use crate::callback::{CallbackHttpServer, HttpOptions, QueryParams};
use crate::openid::discovery::DiscoveryClient;
use crate::openid::jwt::{ClaimChecks, DecodedToken, JwtValidator};

/// Redirect path used when neither the credentials nor the options name one.
pub const DEFAULT_REDIRECT_PATH: &str = "/auth";

const UNSUPPORTED_FLOW: &str = "Provided flow is not supported by provider";

/// Where an authentication attempt currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Idle,
    Discovering,
    AwaitingRedirect,
    ExchangingCode,
    ValidatingToken,
    Authenticated,
    Error(String),
}

/// Options together with the clients built from them. Replaced as a whole
/// once discovery has run.
#[derive(Clone)]
struct Resolved<C: OAuthHttpClient> {
    options: Arc<OAuth2Options>,
    api: OAuth2Api<C>,
    validator: JwtValidator<C>,
    discovered: bool,
}

impl<C: OAuthHttpClient> Resolved<C> {
    fn new(client: C, options: OAuth2Options, discovered: bool) -> AuthResult<Self> {
        let validator = JwtValidator::from_options(client.clone(), &options)?;
        let options = Arc::new(options);
        Ok(Self { api: OAuth2Api::new(client, options.clone()), options, validator, discovered })
    }

    /// A site without authorization and token endpoints is completed from its
    /// discovery document before first use.
    fn needs_discovery(&self) -> bool {
        !self.discovered
            && self.options.site.is_some()
            && self.options.authorization_path.is_none()
            && self.options.token_path.is_none()
    }
}

/// Authenticates users against an OAuth2 / OpenID Connect provider.
///
/// Authorization-code credentials without a code run the browser flow:
/// a loopback [`CallbackHttpServer`] is started, the authorization URL is
/// handed to the [`UserAgentLauncher`], and the captured code is exchanged
/// for tokens. Password, client-credentials and JWT-bearer credentials go
/// straight to the token endpoint. Bearer [`TokenCredentials`] are validated
/// locally and fall back to token introspection.
///
/// The provider is cheap to clone; clones share options, caches and state.
pub struct OAuth2AuthenticationProvider<C: OAuthHttpClient> {
    client: C,
    launcher: Arc<dyn UserAgentLauncher>,
    executor: Arc<dyn UiThreadExecutor>,
    http_options: HttpOptions,
    resolved: Arc<RwLock<Resolved<C>>>,
    state: Arc<watch::Sender<AuthState>>,
    cancel: Arc<StdMutex<Option<oneshot::Sender<()>>>>,
    attempt_lock: Arc<Mutex<()>>,
}

impl<C: OAuthHttpClient> Clone for OAuth2AuthenticationProvider<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            launcher: self.launcher.clone(),
            executor: self.executor.clone(),
            http_options: self.http_options.clone(),
            resolved: self.resolved.clone(),
            state: self.state.clone(),
            cancel: self.cancel.clone(),
            attempt_lock: self.attempt_lock.clone(),
        }
    }
}

impl<C: OAuthHttpClient> OAuth2AuthenticationProvider<C> {
    /// Fails when the options are incomplete for the configured flow.
    pub fn new(client: C, launcher: Arc<dyn UserAgentLauncher>, options: OAuth2Options) -> AuthResult<Self> {
        Self::build(client, launcher, options, false)
    }

    fn build(
        client: C,
        launcher: Arc<dyn UserAgentLauncher>,
        options: OAuth2Options,
        discovered: bool,
    ) -> AuthResult<Self> {
        options.validate()?;
        let resolved = Resolved::new(client.clone(), options, discovered)?;
        let (state, _) = watch::channel(AuthState::Idle);
        Ok(Self {
            client,
            launcher,
            executor: Arc::new(DirectExecutor),
            http_options: HttpOptions::default(),
            resolved: Arc::new(RwLock::new(resolved)),
            state: Arc::new(state),
            cancel: Arc::new(StdMutex::new(None)),
            attempt_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Runs discovery against `options.site`, then builds the provider from
    /// the completed options.
    #[instrument(skip_all, level = "debug")]
    pub async fn discover(client: C, launcher: Arc<dyn UserAgentLauncher>, options: OAuth2Options) -> AuthResult<Self> {
        let discovered = DiscoveryClient::new(client.clone())
            .discover(&options)
            .await
            .map_err(|e| AuthError::caused_by("OpenID discovery failed", e))?;
        Self::build(client, launcher, discovered, true)
    }

    /// Executor that receives results from [`authenticate_and_deliver`](Self::authenticate_and_deliver).
    pub fn with_executor(mut self, executor: Arc<dyn UiThreadExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Configuration of the loopback listener started for each browser flow.
    pub fn with_http_options(mut self, http_options: HttpOptions) -> Self {
        self.http_options = http_options;
        self
    }

    pub fn http_options(&self) -> &HttpOptions {
        &self.http_options
    }

    /// The options in effect, discovered values included.
    pub async fn options(&self) -> Arc<OAuth2Options> {
        self.resolved.read().await.options.clone()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Observes state transitions of this provider's attempts.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: AuthState) {
        debug!(?state, "OAuth2 state transition");
        self.state.send_replace(state);
    }

    /// Aborts the redirect wait of the attempt in flight, closing its listener.
    /// Returns whether there was one to cancel.
    pub fn cancel(&self) -> bool {
        let sender = lock_cancel(&self.cancel).take();
        match sender {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }

    /// Runs `authenticate` on the runtime and hands its result to the UI executor.
    pub fn authenticate_and_deliver<F>(&self, credentials: Credentials, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(AuthResult<User>) + Send + 'static,
    {
        let provider = self.clone();
        tokio::spawn(async move {
            let result = provider.authenticate(&credentials).await;
            let executor = provider.executor.clone();
            executor.run(Box::new(move || callback(result)));
        })
    }

    async fn resolve(&self) -> AuthResult<Resolved<C>> {
        {
            let resolved = self.resolved.read().await;
            if !resolved.needs_discovery() {
                return Ok(resolved.clone());
            }
        }
        let mut resolved = self.resolved.write().await;
        if resolved.needs_discovery() {
            self.set_state(AuthState::Discovering);
            let options = DiscoveryClient::new(self.client.clone())
                .discover(&resolved.options)
                .await
                .map_err(|e| AuthError::caused_by("OpenID discovery failed", e))?;
            options.validate()?;
            *resolved = Resolved::new(self.client.clone(), options, true)?;
        }
        Ok(resolved.clone())
    }

    /// The authorization URL for callers that drive the user agent themselves.
    pub async fn authorize_url(&self, credentials: &OAuth2Credentials) -> AuthResult<String> {
        self.resolve().await?.api.authorize_url(credentials)
    }

    async fn authenticate_password(&self, credentials: &UsernamePasswordCredentials) -> AuthResult<User> {
        let mut oauth2 = OAuth2Credentials::new()
            .with_flow(OAuth2Flow::Password)
            .with_username(credentials.username.clone());
        if let Some(password) = &credentials.password {
            oauth2 = oauth2.with_password(password.clone());
        }
        self.authenticate_oauth2(&oauth2).await
    }

    async fn authenticate_token(&self, credentials: &TokenCredentials) -> AuthResult<User> {
        let resolved = self.resolve().await?;
        self.set_state(AuthState::ValidatingToken);
        let checks = ClaimChecks::from_options(&resolved.options);
        if Self::verify(&resolved, &credentials.token, "access_token", &checks).await.is_ok() {
            let mut json = Map::new();
            json.insert("access_token".into(), Value::String(credentials.token.clone()));
            return self.create_user(&resolved, json, None).await;
        }

        if resolved.options.introspection_url()?.is_none() {
            return Err(AuthError::authentication(
                "Can't authenticate `access_token`: Provider doesn't support token introspection",
            ));
        }
        let mut json = resolved.api.introspect("access_token", &credentials.token).await?;
        if json.get("active").and_then(Value::as_bool) == Some(false) {
            return Err(AuthError::authentication("Inactive Token"));
        }
        let introspected = json.get("client_id").and_then(Value::as_str);
        if let (Some(introspected), Some(configured)) = (introspected, resolved.options.client_id.as_deref()) {
            if introspected != configured {
                info!(introspected, configured, "Introspect `client_id` doesn't match configured `client_id`");
            }
        }
        json.insert("access_token".into(), Value::String(credentials.token.clone()));
        self.create_user(&resolved, json, None).await
    }

    async fn authenticate_oauth2(&self, credentials: &OAuth2Credentials) -> AuthResult<User> {
        let resolved = self.resolve().await?;
        let options = &resolved.options;
        let flow = credentials.flow.unwrap_or(options.flow);
        if flow == OAuth2Flow::Implicit
            || (!options.supported_grant_types.is_empty()
                && !options.supported_grant_types.iter().any(|g| g == flow.grant_type()))
        {
            return Err(AuthError::authentication(UNSUPPORTED_FLOW));
        }
        if flow == OAuth2Flow::AuthCode && credentials.code.is_none() {
            return self.browser_flow(&resolved, credentials).await;
        }
        credentials.validate(Some(flow))?;
        self.exchange(&resolved, flow, credentials, None).await
    }

    #[instrument(skip_all, level = "debug")]
    async fn browser_flow(&self, resolved: &Resolved<C>, credentials: &OAuth2Credentials) -> AuthResult<User> {
        let _attempt = self.attempt_lock.lock().await;
        let options = &resolved.options;

        let redirect = credentials
            .redirect_uri
            .clone()
            .or_else(|| options.redirect_uri.clone())
            .unwrap_or_else(|| DEFAULT_REDIRECT_PATH.to_string());
        let mut server = CallbackHttpServer::new(self.http_options.clone()).with_expected_path(redirect_path(&redirect));
        let (host, port) = server.start().await?;

        let scopes = if credentials.scopes.is_empty() { options.scopes.clone() } else { credentials.scopes.clone() };
        let nonce = match (&credentials.nonce, &options.jwt_options.nonce) {
            (Some(nonce), _) | (None, Some(nonce)) => Some(nonce.clone()),
            (None, None) if scopes.iter().any(|s| s == "openid") => Some(random_token(16)?),
            _ => None,
        };
        let code_verifier = match &credentials.code_verifier {
            Some(verifier) => Some(verifier.clone()),
            None if options.pkce => Some(generate_code_verifier()?),
            None => None,
        };
        let state = credentials.state.clone().unwrap_or_else(generate_state);
        let attempt = OAuth2Credentials {
            redirect_uri: Some(normalize_uri(&redirect, &host, port, options.use_loopback_ip_address)),
            scopes,
            flow: Some(OAuth2Flow::AuthCode),
            nonce: nonce.clone(),
            state: Some(state.clone()),
            code_verifier,
            ..OAuth2Credentials::default()
        };
        let url = resolved.api.authorize_url(&attempt)?;
        debug!(%url, "Opening authorization URL");

        let (cancel_tx, cancel_rx) = oneshot::channel();
        *lock_cancel(&self.cancel) = Some(cancel_tx);
        self.set_state(AuthState::AwaitingRedirect);
        let captured = match self.launcher.open(&url) {
            Ok(()) => {
                let timeout = self.http_options.callback_timeout;
                tokio::select! {
                    captured = server.await_callback(timeout) => captured.map(|req| req.query.clone()),
                    Ok(()) = cancel_rx => Err(AuthError::Cancelled),
                }
            }
            Err(e) => Err(e),
        };
        lock_cancel(&self.cancel).take();
        server.close();
        let query = captured?;

        let code = authorization_code(&query, &state)?;
        let expected_nonce = nonce
            .map(|n| hash_nonce(options.jwt_options.nonce_algorithm.as_deref(), &n))
            .transpose()?;
        let attempt = OAuth2Credentials { code: Some(code), ..attempt };
        self.exchange(resolved, OAuth2Flow::AuthCode, &attempt, expected_nonce.as_deref()).await
    }

    /// Trades the credentials for tokens at the token endpoint.
    async fn exchange(
        &self,
        resolved: &Resolved<C>,
        flow: OAuth2Flow,
        credentials: &OAuth2Credentials,
        nonce: Option<&str>,
    ) -> AuthResult<User> {
        let options = &resolved.options;
        let scope = match (credentials.scopes.is_empty(), options.scopes.is_empty()) {
            (false, _) => Some(options.scope_string(&credentials.scopes)),
            (true, false) => Some(options.scope_string(&options.scopes)),
            (true, true) => None,
        };
        let mut params: Vec<(String, String)> = Vec::new();
        let mut push = |key: &str, value: Option<&String>| {
            if let Some(value) = value {
                params.push((key.to_string(), value.clone()));
            }
        };
        match flow {
            OAuth2Flow::AuthCode => {
                push("code", credentials.code.as_ref());
                push("redirect_uri", credentials.redirect_uri.as_ref());
                push("code_verifier", credentials.code_verifier.as_ref());
            }
            OAuth2Flow::Password => {
                push("username", credentials.username.as_ref());
                push("password", credentials.password.as_ref());
                push("scope", scope.as_ref());
            }
            OAuth2Flow::Client => push("scope", scope.as_ref()),
            OAuth2Flow::AuthJwt => {
                push("assertion", credentials.assertion.as_ref().or(credentials.jwt.as_ref()));
                push("scope", scope.as_ref());
            }
            OAuth2Flow::Implicit => {
                return Err(AuthError::authentication(
                    "Current flow does not allow acquiring a token by the replay party",
                ));
            }
        }

        self.set_state(AuthState::ExchangingCode);
        let json = resolved.api.token(flow.grant_type(), params).await?;
        self.set_state(AuthState::ValidatingToken);
        self.create_user(resolved, json, nonce).await
    }

    async fn verify(
        resolved: &Resolved<C>,
        token: &str,
        token_type: &str,
        checks: &ClaimChecks,
    ) -> AuthResult<DecodedToken> {
        if resolved.options.verify_token {
            resolved.validator.validate(token, token_type, checks).await
        } else {
            resolved.validator.inspect(token, token_type, checks)
        }
    }

    /// Builds the user from a token response. The raw response is kept under
    /// `attributes.auth` next to the decoded tokens.
    async fn create_user(
        &self,
        resolved: &Resolved<C>,
        json: Map<String, Value>,
        nonce: Option<&str>,
    ) -> AuthResult<User> {
        let options = &resolved.options;
        let mut auth = json.clone();
        let mut name = None;
        let mut subject = None;

        if let Some(token) = json.get("access_token").and_then(Value::as_str) {
            let checks = ClaimChecks::from_options(options);
            match Self::verify(resolved, token, "access_token", &checks).await {
                Ok(decoded) => {
                    name = principal_name(&decoded.payload);
                    subject = decoded.claim_str("sub").map(str::to_string);
                    auth.insert("accessToken".into(), decoded.to_json());
                    auth.insert("claimToken".into(), Value::String("accessToken".into()));
                }
                // Access tokens may be opaque.
                Err(e) => debug!(error = %e, "Cannot decode/verify access token"),
            }
        }

        if let Some(token) = json.get("id_token").and_then(Value::as_str) {
            let mut checks = ClaimChecks::from_options(options);
            if let Some(nonce) = nonce {
                checks = checks.with_nonce(nonce);
            }
            if let Some(client_id) = &options.client_id {
                checks = checks.with_authorized_party(client_id.clone());
            }
            let decoded = Self::verify(resolved, token, "id_token", &checks)
                .await
                .inspect_err(|e| warn!(error = %e, "ID token rejected"))?;
            if let Some(id_name) = principal_name(&decoded.payload) {
                name = Some(id_name);
            }
            subject = subject.or_else(|| decoded.claim_str("sub").map(str::to_string));
            auth.insert("idToken".into(), decoded.to_json());
        }

        if let Some(expires_in) = json.get("expires_in").and_then(as_seconds) {
            auth.insert("expires_at".into(), Value::from(Utc::now().timestamp() + expires_in));
        }

        let name = name
            .or(subject)
            .or_else(|| principal_name(&json))
            .or_else(|| ["username", "sub"].iter().find_map(|k| json.get(*k).and_then(Value::as_str).map(str::to_string)))
            .or_else(|| options.client_id.clone())
            .ok_or_else(|| AuthError::authentication("User's name is null."))?;

        self.set_state(AuthState::Authenticated);
        Ok(User::new(name).with_attribute(KEY_AUTH, Value::Object(auth)))
    }

    /// Exchanges the user's refresh token for a fresh set of tokens.
    #[instrument(skip_all, fields(user = user.name()), level = "debug")]
    pub async fn refresh(&self, user: &User) -> AuthResult<User> {
        let refresh_token = auth_token(user, "refresh_token")
            .ok_or_else(|| AuthError::authentication("refresh_token is null or missing"))?;
        let resolved = self.resolve().await?;
        let mut json = resolved
            .api
            .token("refresh_token", vec![("refresh_token".into(), refresh_token.clone())])
            .await?;
        // Providers may omit the refresh token when they do not rotate it.
        json.entry("refresh_token").or_insert(Value::String(refresh_token));
        self.create_user(&resolved, json, None).await
    }

    /// Revokes the user's `token_type` token (`access_token` or `refresh_token`).
    pub async fn revoke(&self, user: &User, token_type: &str) -> AuthResult<()> {
        let token = required_token(user, token_type)?;
        self.resolve().await?.api.revoke(token_type, &token).await
    }

    /// Asks the provider about the user's `token_type` token.
    pub async fn introspect(&self, user: &User, token_type: &str) -> AuthResult<Map<String, Value>> {
        let token = required_token(user, token_type)?;
        self.resolve().await?.api.introspect(token_type, &token).await
    }

    /// Fetches the userinfo document and checks it describes the same subject
    /// as the user's access token.
    pub async fn user_info(&self, user: &User) -> AuthResult<Map<String, Value>> {
        let access_token = required_token(user, "access_token")?;
        let info = self.resolve().await?.api.user_info(&access_token).await?;
        let token_subject = user
            .auth()
            .and_then(|auth| auth.get("accessToken"))
            .and_then(|token| token.get("payload"))
            .and_then(|payload| payload.get("sub"))
            .and_then(Value::as_str);
        if let Some(token_subject) = token_subject {
            let info_subject = info.get("sub").and_then(Value::as_str);
            if info_subject != Some(token_subject) {
                warn!(token_subject, ?info_subject, "UserInfo subject mismatch");
                return Err(AuthError::authentication("User subject does not match UserInfo subject"));
            }
        }
        Ok(info)
    }

    /// Ends the user's session at the provider.
    pub async fn logout(&self, user: &User) -> AuthResult<()> {
        let access_token = required_token(user, "access_token")?;
        let refresh_token = auth_token(user, "refresh_token");
        self.resolve().await?.api.logout(&access_token, refresh_token.as_deref()).await
    }
}

#[async_trait]
impl<C: OAuthHttpClient> AuthenticationProvider for OAuth2AuthenticationProvider<C> {
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthError> {
        credentials.validate()?;
        let result = match credentials {
            Credentials::UsernamePassword(c) => self.authenticate_password(c).await,
            Credentials::Token(c) => self.authenticate_token(c).await,
            Credentials::OAuth2(c) => self.authenticate_oauth2(c).await,
        };
        if let Err(e) = &result {
            self.set_state(AuthState::Error(e.to_string()));
        }
        result
    }
}

fn lock_cancel(
    cancel: &StdMutex<Option<oneshot::Sender<()>>>,
) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<()>>> {
    match cancel.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Checks the redirect for errors and CSRF state, then returns the code.
fn authorization_code(query: &QueryParams, expected_state: &str) -> AuthResult<String> {
    if let Some(error) = query.get("error") {
        let description = query.get("error_description").unwrap_or(error);
        return Err(AuthError::authentication(format!("{}: {}", error, description)));
    }
    if query.get("state") != Some(expected_state) {
        return Err(AuthError::authentication("State mismatch"));
    }
    query
        .get("code")
        .filter(|code| !code.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| AuthError::authentication("Authorization code is missing"))
}

fn principal_name(payload: &Map<String, Value>) -> Option<String> {
    ["name", "email"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn as_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn auth_token(user: &User, token_type: &str) -> Option<String> {
    user.auth()
        .and_then(|auth| auth.get(token_type))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn required_token(user: &User, token_type: &str) -> AuthResult<String> {
    auth_token(user, token_type)
        .ok_or_else(|| AuthError::authentication(format!("{} is null or missing", token_type)))
}

/// Path component of a redirect URI, used to match the callback request.
fn redirect_path(uri: &str) -> String {
    let without_scheme = match uri.find("://") {
        Some(idx) => {
            let rest = &uri[idx + 3..];
            rest.find('/').map(|slash| &rest[slash..]).unwrap_or("/")
        }
        None => uri,
    };
    without_scheme.split(['?', '#']).next().unwrap_or("/").to_string()
}

/// Completes a relative redirect URI with the callback listener's address.
fn normalize_uri(uri: &str, host: &str, port: u16, use_loopback_ip_address: bool) -> String {
    if !uri.starts_with('/') {
        return uri.to_string();
    }
    let is_local = matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]");
    let server = if use_loopback_ip_address && host == "localhost" { "127.0.0.1" } else { host };
    let authority = if port > 0 { format!("{}:{}", server, port) } else { server.to_string() };
    let scheme = if is_local { "http" } else { "https" };
    format!("{}://{}{}", scheme, authority, uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_redirects_use_the_listener_address() {
        assert_eq!(normalize_uri("/auth", "localhost", 8080, false), "http://localhost:8080/auth");
        assert_eq!(normalize_uri("/auth", "localhost", 8080, true), "http://127.0.0.1:8080/auth");
        assert_eq!(normalize_uri("/cb", "auth.example.com", 443, false), "https://auth.example.com:443/cb");
        assert_eq!(normalize_uri("http://host/cb", "localhost", 8080, false), "http://host/cb");
    }

    #[test]
    fn redirect_path_strips_authority_and_query() {
        assert_eq!(redirect_path("/auth"), "/auth");
        assert_eq!(redirect_path("http://localhost:8080/callback?x=1"), "/callback");
        assert_eq!(redirect_path("http://localhost:8080"), "/");
    }

    #[test]
    fn redirect_errors_and_state_are_checked() {
        let denied = QueryParams::parse("error=access_denied&error_description=User%20said%20no");
        assert_eq!(authorization_code(&denied, "s").unwrap_err().to_string(), "access_denied: User said no");

        let forged = QueryParams::parse("code=abc&state=other");
        assert_eq!(authorization_code(&forged, "s").unwrap_err().to_string(), "State mismatch");

        let blank = QueryParams::parse("code=&state=s");
        assert_eq!(authorization_code(&blank, "s").unwrap_err().to_string(), "Authorization code is missing");

        assert_eq!(authorization_code(&QueryParams::parse("code=abc&state=s"), "s").unwrap(), "abc");
    }

    #[test]
    fn expiry_accepts_numbers_and_strings() {
        assert_eq!(as_seconds(&Value::from(3600)), Some(3600));
        assert_eq!(as_seconds(&Value::from("3600")), Some(3600));
        assert_eq!(as_seconds(&Value::Null), None);
    }
}
