//! JWKS caching for provider-signed JWT validation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};

use crate::auth_core::error::{AuthError, AuthResult, TokenCheck};
use crate::auth_core::http_client::{HttpMethod, HttpRequest, OAuthHttpClient};

/// Map key for a JWK published without a `kid`.
const ANONYMOUS_KID: &str = "";
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A JWK as represented in a JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    alg: Option<String>,
    #[serde(rename = "use")]
    use_: Option<String>,
    n: Option<String>,
    e: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

/// A JWKS response containing multiple keys.
#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

impl Jwk {
    fn decoding_key(&self) -> AuthResult<DecodingKey> {
        let unusable = |what: &str| {
            AuthError::token(TokenCheck::UnknownKey, format!("JWK {:?} has no usable {}", self.kid, what))
        };
        match self.kty.as_str() {
            "RSA" => {
                let (n, e) = self.n.as_deref().zip(self.e.as_deref()).ok_or_else(|| unusable("n/e"))?;
                DecodingKey::from_rsa_components(n, e).map_err(|_| unusable("RSA components"))
            }
            "EC" => {
                let (x, y) = self.x.as_deref().zip(self.y.as_deref()).ok_or_else(|| unusable("x/y"))?;
                DecodingKey::from_ec_components(x, y).map_err(|_| unusable("EC components"))
            }
            other => Err(unusable(&format!("key type ({})", other))),
        }
    }
}

/// A cache of JWKs fetched from a JWKS URI with automatic refresh.
///
/// Keys are refreshed when a `kid` is unknown or, if a TTL is set, when the
/// last fetch is older than it.
#[derive(Clone)]
pub struct JwksCache<C: OAuthHttpClient> {
    client: C,
    uri: String,
    keys: Arc<DashMap<String, Jwk>>,
    ttl: Option<Duration>,
    timeout: Duration,
    last_refresh: Arc<RwLock<Option<Instant>>>,
    refresh_lock: Arc<Mutex<()>>,
}

impl<C: OAuthHttpClient> JwksCache<C> {
    /// Keys are fetched lazily on the first lookup.
    pub fn new(client: C, uri: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            client,
            uri: uri.into(),
            keys: Arc::new(DashMap::new()),
            ttl,
            timeout: DEFAULT_FETCH_TIMEOUT,
            last_refresh: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Deadline for one JWKS fetch.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Number of signing keys currently cached.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[instrument(skip(self), fields(uri = %self.uri), level = "debug")]
    pub async fn refresh(&self) -> AuthResult<()> {
        let _guard = self.refresh_lock.lock().await;
        let req = HttpRequest::new(HttpMethod::GET, self.uri.clone())
            .header("Accept", "application/json")
            .timeout(self.timeout);
        let resp = tokio::time::timeout(self.timeout, self.client.execute(req))
            .await
            .map_err(|_| AuthError::Timeout(self.timeout))?
            .map_err(|e| AuthError::http(None, format!("JWKS fetch failed: {}", e)))?;
        if !resp.is_success() {
            return Err(AuthError::http(Some(resp.status), format!("JWKS fetch failed: HTTP {}", resp.status)));
        }
        let jwks: JwkSet = serde_json::from_slice(&resp.body)
            .map_err(|e| AuthError::http(Some(resp.status), format!("Invalid JWKS document: {}", e)))?;

        self.keys.clear();
        for jwk in jwks.keys {
            // Encryption keys never verify signatures.
            if jwk.use_.as_deref() == Some("enc") {
                continue;
            }
            let kid = jwk.kid.clone().unwrap_or_else(|| ANONYMOUS_KID.to_string());
            self.keys.insert(kid, jwk);
        }
        *self.last_refresh.write().await = Some(Instant::now());
        debug!(keys = self.keys.len(), "JWKS refreshed");
        Ok(())
    }

    async fn is_stale(&self) -> bool {
        match *self.last_refresh.read().await {
            None => true,
            Some(at) => self.ttl.is_some_and(|ttl| at.elapsed() > ttl),
        }
    }

    /// Decoding key for `kid` and the algorithm the JWK pins, if any.
    ///
    /// Without a `kid` the set must hold exactly one key.
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, kid: Option<&str>) -> AuthResult<(DecodingKey, Option<String>)> {
        if self.is_stale().await || self.lookup(kid).is_none() {
            self.refresh().await?;
        }
        let jwk = self.lookup(kid).ok_or_else(|| {
            AuthError::token(TokenCheck::UnknownKey, format!("No JWK matches kid {:?}", kid))
        })?;
        Ok((jwk.decoding_key()?, jwk.alg.clone()))
    }

    fn lookup(&self, kid: Option<&str>) -> Option<Jwk> {
        match kid {
            Some(kid) => self.keys.get(kid).map(|entry| entry.value().clone()),
            None if self.keys.len() == 1 => self.keys.iter().next().map(|entry| entry.value().clone()),
            None => None,
        }
    }
}
