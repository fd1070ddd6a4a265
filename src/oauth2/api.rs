//! Wire calls against the provider's OAuth2 endpoints.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::credentials::OAuth2Credentials;
use super::flow::OAuth2Flow;
use super::options::{IntrospectionMode, OAuth2Options};
use crate::auth_core::crypto::{hash_nonce, pkce_code_challenge};
use crate::auth_core::error::{AuthError, AuthResult};
use crate::auth_core::http_client::{HttpMethod, HttpRequest, HttpResponse, OAuthHttpClient};
use crate::callback::QueryParams;
use crate::openid::jwt::DecodedToken;

const ACCEPT_TOKEN: &str = "application/json,application/x-www-form-urlencoded;q=0.9";
const ACCEPT_USER_INFO: &str = "application/json,application/jwt,application/x-www-form-urlencoded;q=0.9";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Custom encode set for application/x-www-form-urlencoded allowing unreserved characters.
const FORM_URLENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Percent-encodes one form or query component.
pub fn encode_url_owned(input: &str) -> String {
    percent_encode(input.as_bytes(), FORM_URLENCODE_SET).to_string()
}

/// Serializes pairs as `k=v&k=v`, dropping blank values.
pub fn to_query<K: AsRef<str>, V: AsRef<str>>(pairs: impl IntoIterator<Item = (K, V)>) -> String {
    pairs
        .into_iter()
        .filter(|(_, v)| !v.as_ref().trim().is_empty())
        .map(|(k, v)| format!("{}={}", encode_url_owned(k.as_ref()), encode_url_owned(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parses a form-encoded body into JSON. Repeated keys collect into an array.
pub fn query_to_json(query: &str) -> Map<String, Value> {
    let mut json = Map::new();
    for (key, value) in QueryParams::parse(query).iter() {
        let value = Value::String(value.to_string());
        match json.get_mut(key) {
            None => {
                json.insert(key.to_string(), value);
            }
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    json
}

/// The human readable reason of an OAuth2 error document.
pub fn extract_error_description(json: &Value) -> String {
    if let Some(message) = json.get("error").and_then(|e| e.get("message")).and_then(Value::as_str) {
        return message.to_string();
    }
    json.get("error_description")
        .and_then(Value::as_str)
        .or_else(|| json.get("error").and_then(Value::as_str))
        .unwrap_or("null")
        .to_string()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Client for the provider's token, introspection, revocation, userinfo and
/// logout endpoints. Cheap to clone.
#[derive(Clone)]
pub struct OAuth2Api<C: OAuthHttpClient> {
    client: C,
    options: Arc<OAuth2Options>,
}

impl<C: OAuthHttpClient> OAuth2Api<C> {
    pub fn new(client: C, options: Arc<OAuth2Options>) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &OAuth2Options {
        &self.options
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Builds the authorization endpoint URL for a browser redirect.
    ///
    /// `credentials.nonce` is hashed with the configured nonce algorithm and
    /// `credentials.code_verifier` is sent as an S256 challenge.
    pub fn authorize_url(&self, credentials: &OAuth2Credentials) -> AuthResult<String> {
        let options = &self.options;
        let flow = credentials.flow.unwrap_or(options.flow);
        let mut query: Vec<(&str, String)> = Vec::new();
        if flow == OAuth2Flow::AuthCode {
            query.push(("response_type", "code".into()));
        }
        self.push_client_identity(&mut query);
        if let Some(redirect_uri) = &credentials.redirect_uri {
            query.push(("redirect_uri", redirect_uri.clone()));
        }
        let scopes = if credentials.scopes.is_empty() { &options.scopes } else { &credentials.scopes };
        if !scopes.is_empty() {
            query.push(("scope", options.scope_string(scopes)));
        }
        if let Some(state) = &credentials.state {
            query.push(("state", state.clone()));
        }
        if let Some(nonce) = &credentials.nonce {
            query.push(("nonce", hash_nonce(options.jwt_options.nonce_algorithm.as_deref(), nonce)?));
        }
        if let Some(verifier) = &credentials.code_verifier {
            query.push(("code_challenge", pkce_code_challenge(verifier)));
            query.push(("code_challenge_method", "S256".into()));
        }
        Ok(format!("{}?{}", options.authorization_url()?, to_query(query)))
    }

    fn push_client_identity(&self, form: &mut Vec<(&'static str, String)>) {
        match &self.options.client_id {
            Some(client_id) => form.push(("client_id", client_id.clone())),
            None => {
                if let Some(t) = &self.options.client_assertion_type {
                    form.push(("client_assertion_type", t.clone()));
                }
                if let Some(a) = &self.options.client_assertion {
                    form.push(("client_assertion", a.clone()));
                }
            }
        }
    }

    fn basic_authorization(&self) -> Option<String> {
        let options = &self.options;
        match (&options.client_id, &options.client_secret) {
            (Some(id), Some(secret)) if options.use_basic_authorization => {
                Some(format!("Basic {}", STANDARD.encode(format!("{}:{}", id, secret))))
            }
            _ => None,
        }
    }

    /// Calls the token endpoint with `grant_type` and `params`, merging the
    /// configured extra parameters and client authentication.
    #[instrument(skip(self, params), level = "debug")]
    pub async fn token(&self, grant_type: &str, params: Vec<(String, String)>) -> AuthResult<Map<String, Value>> {
        let options = &self.options;
        let basic = self.basic_authorization();

        let mut form: Vec<(String, String)> = params;
        for (key, value) in &options.extra_params {
            if let Some(value) = value_to_string(value) {
                form.retain(|(k, _)| k != key);
                form.push((key.clone(), value));
            }
        }
        form.retain(|(k, _)| k != "grant_type");
        form.push(("grant_type".into(), grant_type.into()));
        if basic.is_none() {
            let mut identity = Vec::new();
            self.push_client_identity(&mut identity);
            if let (Some(secret), Some(_)) = (&options.client_secret, &options.client_id) {
                identity.push(("client_secret", secret.clone()));
            }
            form.extend(identity.into_iter().map(|(k, v)| (k.to_string(), v)));
        }

        let mut headers = vec![
            ("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()),
            ("Accept".to_string(), ACCEPT_TOKEN.to_string()),
        ];
        if let Some(basic) = basic {
            headers.push(("Authorization".into(), basic));
        }
        let resp = self
            .fetch(HttpMethod::POST, &options.token_url()?, headers, Some(to_query(form)))
            .await?;
        let json = self.parse_document(&resp, "token")?;
        debug!(keys = json.len(), "Token response received");
        Ok(json)
    }

    /// Asks the introspection endpoint about `token`.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn introspect(&self, token_type: &str, token: &str) -> AuthResult<Map<String, Value>> {
        let options = &self.options;
        let path = options.introspection_url()?.ok_or_else(|| {
            AuthError::authentication("Provider doesn't support token introspection")
        })?;
        let mut headers = vec![("Accept".to_string(), ACCEPT_TOKEN.to_string())];
        if let Some(basic) = self.basic_authorization() {
            headers.push(("Authorization".into(), basic));
        }
        let resp = match options.introspection_mode {
            IntrospectionMode::Form => {
                headers.push(("Content-Type".into(), FORM_CONTENT_TYPE.into()));
                let body = to_query([("token", token), ("token_type_hint", token_type)]);
                self.fetch(HttpMethod::POST, &path, headers, Some(body)).await?
            }
            IntrospectionMode::Query => {
                let url = format!("{}?{}", path, to_query([(token_type, token)]));
                self.fetch(HttpMethod::POST, &url, headers, Some(String::new())).await?
            }
        };
        self.parse_document(&resp, "introspection")
    }

    /// Revokes `token` at the revocation endpoint.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn revoke(&self, token_type: &str, token: &str) -> AuthResult<()> {
        let mut headers = vec![
            ("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()),
            ("Accept".to_string(), ACCEPT_TOKEN.to_string()),
        ];
        if let Some(basic) = self.basic_authorization() {
            headers.push(("Authorization".into(), basic));
        }
        let body = to_query([("token", token), ("token_type_hint", token_type)]);
        self.fetch(HttpMethod::POST, &self.options.revocation_url()?, headers, Some(body))
            .await
            .map(|_| ())
    }

    /// Fetches the userinfo document for `access_token`.
    #[instrument(skip(self, access_token), level = "debug")]
    pub async fn user_info(&self, access_token: &str) -> AuthResult<Map<String, Value>> {
        let options = &self.options;
        let mut url = options
            .user_info_url()?
            .ok_or_else(|| AuthError::authentication("userInfo path is not configured"))?;
        if !options.user_info_params.is_empty() {
            url = format!("{}?{}", url, to_query(&options.user_info_params));
        }
        let headers = vec![
            ("Authorization".to_string(), format!("Bearer {}", access_token)),
            ("Accept".to_string(), ACCEPT_USER_INFO.to_string()),
        ];
        let resp = self.fetch(HttpMethod::GET, &url, headers, None).await?;
        if content_type(&resp).is_some_and(|ct| ct.contains("application/jwt")) {
            let body = String::from_utf8_lossy(&resp.body);
            let decoded = DecodedToken::parse(body.trim(), "userinfo")?;
            let mut json = Map::new();
            json.insert("header".into(), decoded.header);
            json.insert("payload".into(), Value::Object(decoded.payload));
            return Ok(json);
        }
        self.parse_document(&resp, "userinfo")
    }

    /// Ends the provider session.
    #[instrument(skip(self, access_token, refresh_token), level = "debug")]
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> AuthResult<()> {
        let options = &self.options;
        let url = options
            .logout_url()?
            .ok_or_else(|| AuthError::InvalidArgument("Logout path is not configured".into()))?;
        let mut form: Vec<(&str, String)> = Vec::new();
        form.push(("client_id", options.require_client_id()?.to_string()));
        if let Some(secret) = &options.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        if let Some(refresh_token) = refresh_token {
            form.push(("refresh_token", refresh_token.to_string()));
        }
        let headers = vec![
            ("Authorization".to_string(), format!("Bearer {}", access_token)),
            ("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()),
            ("Accept".to_string(), ACCEPT_TOKEN.to_string()),
        ];
        self.fetch(HttpMethod::POST, &url, headers, Some(to_query(form))).await.map(|_| ())
    }

    async fn fetch(
        &self,
        method: HttpMethod,
        url: &str,
        headers: Vec<(String, String)>,
        body: Option<String>,
    ) -> AuthResult<HttpResponse> {
        if url.is_empty() {
            return Err(AuthError::InvalidArgument("Invalid path".into()));
        }
        let options = &self.options;
        let mut req = HttpRequest::new(method, url).timeout(options.http_timeout);
        for (name, value) in &options.headers {
            req = req.header(name.clone(), value.clone());
        }
        for (name, value) in headers {
            req = req.header(name, value);
        }
        if let Some(user_agent) = &options.user_agent {
            req = req.header("User-Agent", user_agent.clone());
        }
        if let (HttpMethod::POST, Some(body)) = (method, body) {
            req = req.body(body.into_bytes());
        }

        let resp = tokio::time::timeout(options.http_timeout, self.client.execute(req))
            .await
            .map_err(|_| AuthError::Timeout(options.http_timeout))?
            .map_err(|e| AuthError::http(None, format!("Request to {} failed: {}", url, e)))?;
        if resp.is_success() {
            return Ok(resp);
        }
        let status = resp.status;
        if resp.body.is_empty() {
            return Err(AuthError::http(Some(status), format!("Status code: {}", status)));
        }
        if content_type(&resp).is_some_and(|ct| ct.contains("application/json")) {
            if let Ok(error) = serde_json::from_slice::<Value>(&resp.body) {
                if let Some(code) = error.get("error").and_then(Value::as_str).filter(|e| !e.is_empty()) {
                    let message = match error.get("error_description").and_then(Value::as_str) {
                        Some(description) if !description.is_empty() => format!("{}: {}", code, description),
                        _ => code.to_string(),
                    };
                    return Err(AuthError::http(Some(status), message));
                }
            }
        }
        Err(AuthError::http(Some(status), format!("{}: {}", status, String::from_utf8_lossy(&resp.body))))
    }

    /// Parses a JSON or form-encoded document, failing on an `error` member and
    /// folding `X-OAuth-Scopes` into `scope`.
    fn parse_document(&self, resp: &HttpResponse, what: &str) -> AuthResult<Map<String, Value>> {
        if resp.body.is_empty() {
            return Err(AuthError::http(Some(resp.status), "No Body"));
        }
        let mut json = match content_type(resp) {
            Some(ct) if ct.contains("application/x-www-form-urlencoded") || ct.contains("text/plain") => {
                query_to_json(&String::from_utf8_lossy(&resp.body))
            }
            Some(ct) if !ct.contains("json") => {
                return Err(AuthError::http(
                    Some(resp.status),
                    format!("Cannot handle content type: {}", ct),
                ));
            }
            _ => match serde_json::from_slice::<Value>(&resp.body) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    return Err(AuthError::http(Some(resp.status), format!("Invalid {} response", what)));
                }
            },
        };
        if json.contains_key("error") {
            return Err(AuthError::authentication(extract_error_description(&Value::Object(json))));
        }
        if let Some(scopes) = resp.header("X-OAuth-Scopes") {
            let scope = match json.get("scope").and_then(Value::as_str) {
                Some(existing) => format!("{}{}{}", existing, self.options.scope_separator, scopes),
                None => scopes.to_string(),
            };
            json.insert("scope".into(), Value::String(scope));
        }
        if let Some(accepted) = resp.header("X-Accepted-OAuth-Scopes") {
            json.insert("acceptedScopes".into(), Value::String(accepted.to_string()));
        }
        Ok(json)
    }
}

fn content_type(resp: &HttpResponse) -> Option<String> {
    resp.header("Content-Type").map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_core::http_client::InMemoryHttpClient;
    use serde_json::json;

    fn api(client: InMemoryHttpClient, options: OAuth2Options) -> OAuth2Api<InMemoryHttpClient> {
        OAuth2Api::new(client, Arc::new(options))
    }

    fn body(req: &HttpRequest) -> String {
        String::from_utf8(req.body.clone().unwrap_or_default()).unwrap()
    }

    #[test]
    fn form_encoding_keeps_unreserved_characters() {
        assert_eq!(encode_url_owned("Hello World!"), "Hello%20World%21");
        assert_eq!(to_query([("a", "x-y_z.~"), ("b", " "), ("c", "1")]), "a=x-y_z.~&c=1");
    }

    #[test]
    fn form_bodies_become_json() {
        let json = query_to_json("access_token=abc&scope=a+b&aud=x&aud=y");
        assert_eq!(json["access_token"], "abc");
        assert_eq!(json["scope"], "a b");
        assert_eq!(json["aud"], json!(["x", "y"]));
    }

    #[test]
    fn error_descriptions() {
        assert_eq!(extract_error_description(&json!({ "error": "invalid_grant" })), "invalid_grant");
        assert_eq!(
            extract_error_description(&json!({ "error": "invalid_grant", "error_description": "expired code" })),
            "expired code"
        );
        assert_eq!(extract_error_description(&json!({ "error": { "message": "nested" } })), "nested");
    }

    #[test]
    fn authorize_url_carries_pkce_and_state() {
        let options = OAuth2Options::new()
            .with_site("https://idp.example.com")
            .with_client_id("app")
            .with_scopes(["openid", "email"]);
        let creds = OAuth2Credentials::new()
            .with_redirect_uri("http://127.0.0.1:8080/callback")
            .with_state("s1")
            .with_code_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        let url = api(InMemoryHttpClient::new(), options).authorize_url(&creds).unwrap();
        assert_eq!(
            url,
            "https://idp.example.com/oauth/authorize?response_type=code&client_id=app\
             &redirect_uri=http%3A%2F%2F127.0.0.1%3A8080%2Fcallback&scope=openid%20email&state=s1\
             &code_challenge=E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM&code_challenge_method=S256"
        );
    }

    #[tokio::test]
    async fn confidential_clients_use_basic_auth() {
        let client = InMemoryHttpClient::with_default(HttpResponse::json(&json!({ "access_token": "at" })));
        let options = OAuth2Options::new()
            .with_site("https://idp.example.com")
            .with_client_id("app")
            .with_client_secret("secret")
            .with_extra_param("audience", json!("api"));
        let json = api(client.clone(), options)
            .token("client_credentials", vec![("scope".into(), "read".into())])
            .await
            .unwrap();
        assert_eq!(json["access_token"], "at");

        let req = client.last_request_to("https://idp.example.com/oauth/token").unwrap();
        assert_eq!(req.header_value("Authorization"), Some("Basic YXBwOnNlY3JldA=="));
        assert_eq!(req.header_value("Accept"), Some(ACCEPT_TOKEN));
        assert_eq!(body(&req), "scope=read&audience=api&grant_type=client_credentials");
    }

    #[tokio::test]
    async fn public_clients_send_client_id() {
        let client = InMemoryHttpClient::with_default(HttpResponse::json(&json!({ "access_token": "at" })));
        let options = OAuth2Options::new().with_token_path("https://idp.example.com/token").with_client_id("app");
        api(client.clone(), options).token("password", Vec::new()).await.unwrap();
        let req = client.last_request_to("https://idp.example.com/token").unwrap();
        assert_eq!(req.header_value("Authorization"), None);
        assert_eq!(body(&req), "grant_type=password&client_id=app");
    }

    #[tokio::test]
    async fn token_errors_and_scope_headers() {
        let client = InMemoryHttpClient::new();
        client.insert_response(
            "https://idp.example.com/err/token",
            HttpResponse::json(&json!({ "error": "invalid_grant", "error_description": "bad code" })),
        );
        let mut scoped = HttpResponse {
            status: 200,
            headers: vec![("Content-Type".into(), FORM_CONTENT_TYPE.into())],
            body: b"access_token=at&scope=read".to_vec(),
        };
        scoped.headers.push(("X-OAuth-Scopes".into(), "write".into()));
        client.insert_response("https://idp.example.com/ok/token", scoped);

        let err_options = OAuth2Options::new().with_token_path("https://idp.example.com/err/token");
        let err = api(client.clone(), err_options).token("refresh_token", Vec::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "bad code");

        let ok_options = OAuth2Options::new().with_token_path("https://idp.example.com/ok/token");
        let json = api(client, ok_options).token("refresh_token", Vec::new()).await.unwrap();
        assert_eq!(json["scope"], "read write");
    }

    #[tokio::test]
    async fn non_success_status_reports_oauth_error() {
        let mut resp = HttpResponse::json(&json!({ "error": "invalid_client", "error_description": "unknown" }));
        resp.status = 401;
        let client = InMemoryHttpClient::with_default(resp);
        let options = OAuth2Options::new().with_token_path("https://idp.example.com/token");
        let err = api(client, options).token("client_credentials", Vec::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::Http { status: Some(401), .. }));
        assert_eq!(err.to_string(), "invalid_client: unknown");
    }

    #[tokio::test]
    async fn query_mode_introspection() {
        let client = InMemoryHttpClient::with_default(HttpResponse::json(&json!({ "active": true })));
        let options = OAuth2Options::new()
            .with_introspection_path("https://idp.example.com/tokeninfo")
            .with_introspection_mode(IntrospectionMode::Query);
        api(client.clone(), options).introspect("access_token", "t0k").await.unwrap();
        let req = client.requests().pop().unwrap();
        assert_eq!(req.url, "https://idp.example.com/tokeninfo?access_token=t0k");
        assert_eq!(req.method, HttpMethod::POST);
        assert!(body(&req).is_empty());
    }
}
