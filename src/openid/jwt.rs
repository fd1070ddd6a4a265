//! Verification of provider-issued JSON Web Tokens.

use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Header, Validation};
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use super::jwks::JwksCache;
use crate::auth_core::error::{AuthError, AuthResult, TokenCheck};
use crate::auth_core::http_client::OAuthHttpClient;
use crate::oauth2::options::{OAuth2Options, PubSecKeyOptions};

/// A JWT split into its parts, with header and payload parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    pub token: String,
    /// `access_token` or `id_token`.
    pub token_type: String,
    pub header: Value,
    pub payload: Map<String, Value>,
    pub signature: String,
}

impl DecodedToken {
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    /// The JSON form kept in a user's `auth` attribute.
    pub fn to_json(&self) -> Value {
        json!({
            "token": self.token,
            "token_type": self.token_type,
            "header": self.header,
            "payload": self.payload,
            "signature": self.signature,
        })
    }

    /// Splits and parses a token without checking anything but its shape.
    pub fn parse(token: &str, token_type: &str) -> AuthResult<Self> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(AuthError::token(TokenCheck::Malformed, "expected three segments"));
        }
        let header = decode_segment(parts[0], "header")?;
        let payload = match decode_segment(parts[1], "payload")? {
            Value::Object(map) => map,
            _ => return Err(AuthError::token(TokenCheck::Malformed, "payload is not a JSON object")),
        };
        Ok(Self {
            token: token.to_string(),
            token_type: token_type.to_string(),
            header,
            payload,
            signature: parts[2].to_string(),
        })
    }
}

fn decode_segment(segment: &str, what: &str) -> AuthResult<Value> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| AuthError::token(TokenCheck::Malformed, format!("{} is not base64url: {}", what, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::token(TokenCheck::Malformed, format!("{} is not JSON: {}", what, e)))
}

/// What a token must satisfy besides its signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimChecks {
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub leeway: u64,
    pub ignore_expiration: bool,
    /// Expected `nonce` claim, already hashed the way it was sent.
    pub nonce: Option<String>,
    /// Expected `azp` claim, checked only when the token carries one.
    pub authorized_party: Option<String>,
}

impl ClaimChecks {
    /// Issuer, audience, leeway and expiry handling taken from the provider configuration.
    pub fn from_options(options: &OAuth2Options) -> Self {
        let jwt = &options.jwt_options;
        Self {
            issuer: jwt.issuer.clone().filter(|_| options.validate_issuer),
            audience: jwt.audience.clone(),
            leeway: jwt.leeway,
            ignore_expiration: jwt.ignore_expiration,
            nonce: None,
            authorized_party: None,
        }
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn with_authorized_party(mut self, client_id: impl Into<String>) -> Self {
        self.authorized_party = Some(client_id.into());
        self
    }
}

/// Verifies tokens against static keys first and a JWKS endpoint second.
///
/// Checks run in a fixed order (signature, expiry, issuer, audience, nonce,
/// authorized party) and the first failure is reported with its [`TokenCheck`].
#[derive(Clone)]
pub struct JwtValidator<C: OAuthHttpClient> {
    static_keys: Vec<PubSecKeyOptions>,
    jwks: Option<JwksCache<C>>,
}

impl<C: OAuthHttpClient> JwtValidator<C> {
    pub fn new(static_keys: Vec<PubSecKeyOptions>, jwks: Option<JwksCache<C>>) -> Self {
        Self { static_keys, jwks }
    }

    /// Builds a validator from the provider's static keys and JWKS endpoint.
    pub fn from_options(client: C, options: &OAuth2Options) -> AuthResult<Self> {
        let jwks = options.jwk_url()?.map(|uri| {
            JwksCache::new(client, uri, options.jwk_max_age).with_timeout(options.http_timeout)
        });
        Ok(Self::new(options.pub_sec_keys.clone(), jwks))
    }

    pub fn has_keys(&self) -> bool {
        !self.static_keys.is_empty() || self.jwks.is_some()
    }

    pub fn jwks(&self) -> Option<&JwksCache<C>> {
        self.jwks.as_ref()
    }

    #[instrument(skip(self, token, checks), level = "debug")]
    pub async fn validate(&self, token: &str, token_type: &str, checks: &ClaimChecks) -> AuthResult<DecodedToken> {
        let decoded = DecodedToken::parse(token, token_type)?;
        let header = decode_header(token)
            .map_err(|e| AuthError::token(TokenCheck::Malformed, format!("invalid header: {}", e)))?;

        let key = self.resolve_key(&header).await?;
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        decode::<Value>(token, &key, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm | ErrorKind::InvalidKeyFormat => {
                AuthError::token(TokenCheck::Signature, e.to_string())
            }
            _ => AuthError::token(TokenCheck::Malformed, e.to_string()),
        })?;

        check_claims(&decoded.payload, checks)?;
        debug!(kid = ?header.kid, alg = ?header.alg, "Token verified");
        Ok(decoded)
    }

    /// Runs the claim checks without verifying the signature. Used when the
    /// provider is configured with `verify_token = false`.
    pub fn inspect(&self, token: &str, token_type: &str, checks: &ClaimChecks) -> AuthResult<DecodedToken> {
        let decoded = DecodedToken::parse(token, token_type)?;
        check_claims(&decoded.payload, checks)?;
        Ok(decoded)
    }

    async fn resolve_key(&self, header: &Header) -> AuthResult<DecodingKey> {
        if let Some(key) = self.static_key(header)? {
            return Ok(key);
        }
        let Some(jwks) = &self.jwks else {
            return Err(AuthError::token(
                TokenCheck::UnknownKey,
                format!("no key configured for {:?}", header.alg),
            ));
        };
        let (key, alg) = jwks.get(header.kid.as_deref()).await?;
        if let Some(alg) = alg {
            let pinned = Algorithm::from_str(&alg)
                .map_err(|_| AuthError::token(TokenCheck::UnknownKey, format!("unsupported JWK alg {}", alg)))?;
            if pinned != header.alg {
                return Err(AuthError::token(
                    TokenCheck::Signature,
                    format!("token alg {:?} differs from key alg {}", header.alg, alg),
                ));
            }
        }
        Ok(key)
    }

    fn static_key(&self, header: &Header) -> AuthResult<Option<DecodingKey>> {
        let candidate = self.static_keys.iter().find(|key| {
            let alg_matches = Algorithm::from_str(&key.algorithm).is_ok_and(|alg| alg == header.alg);
            let kid_matches = match (&header.kid, &key.id) {
                (Some(kid), Some(id)) => kid == id,
                _ => true,
            };
            alg_matches && kid_matches
        });
        candidate.map(pub_sec_decoding_key).transpose()
    }
}

fn pub_sec_decoding_key(key: &PubSecKeyOptions) -> AuthResult<DecodingKey> {
    let invalid = |e: jsonwebtoken::errors::Error| {
        AuthError::InvalidArgument(format!("Invalid {} key {:?}: {}", key.algorithm, key.id, e))
    };
    let pem = key.buffer.as_bytes();
    match key.algorithm.get(..2) {
        Some("HS") => Ok(DecodingKey::from_secret(pem)),
        Some("RS") | Some("PS") => DecodingKey::from_rsa_pem(pem).map_err(invalid),
        Some("ES") => DecodingKey::from_ec_pem(pem).map_err(invalid),
        Some("Ed") => DecodingKey::from_ed_pem(pem).map_err(invalid),
        _ => Err(AuthError::InvalidArgument(format!("Unsupported key algorithm: {}", key.algorithm))),
    }
}

fn check_claims(payload: &Map<String, Value>, checks: &ClaimChecks) -> AuthResult<()> {
    if !checks.ignore_expiration {
        if let Some(exp) = payload.get("exp").and_then(Value::as_i64) {
            let now = Utc::now().timestamp();
            if exp.saturating_add(checks.leeway as i64) < now {
                return Err(AuthError::token(TokenCheck::Expired, format!("exp {} is before {}", exp, now)));
            }
        }
    }

    if let Some(expected) = &checks.issuer {
        let expected = expected.trim_end_matches('/');
        let actual = payload.get("iss").and_then(Value::as_str).map(|iss| iss.trim_end_matches('/'));
        if actual != Some(expected) {
            return Err(AuthError::token(
                TokenCheck::Issuer,
                format!("expected {} but got {:?}", expected, actual),
            ));
        }
    }

    if !checks.audience.is_empty() {
        let aud: Vec<&str> = match payload.get("aud") {
            Some(Value::String(single)) => vec![single.as_str()],
            Some(Value::Array(many)) => many.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if let Some(missing) = checks.audience.iter().find(|wanted| !aud.contains(&wanted.as_str())) {
            return Err(AuthError::token(TokenCheck::Audience, format!("{} not in {:?}", missing, aud)));
        }
    }

    if let Some(expected) = &checks.nonce {
        if payload.get("nonce").and_then(Value::as_str) != Some(expected.as_str()) {
            return Err(AuthError::token(TokenCheck::Nonce, "nonce does not match the authorization request"));
        }
    }

    if let (Some(expected), Some(azp)) = (&checks.authorized_party, payload.get("azp").and_then(Value::as_str)) {
        if azp != expected {
            return Err(AuthError::token(
                TokenCheck::AuthorizedParty,
                format!("azp {} is not client {}", azp, expected),
            ));
        }
    }
    Ok(())
}
