//! Credential types accepted by the authentication providers.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::error::{AuthError, AuthResult};
use crate::oauth2::credentials::OAuth2Credentials;

/// Any credential a provider may be asked to authenticate.
#[derive(Debug, Clone)]
pub enum Credentials {
    UsernamePassword(UsernamePasswordCredentials),
    Token(TokenCredentials),
    OAuth2(OAuth2Credentials),
}

impl Credentials {
    /// Checks the credentials are well formed. Runs before any provider is consulted.
    pub fn validate(&self) -> AuthResult<()> {
        match self {
            Credentials::UsernamePassword(c) => c.validate(),
            Credentials::Token(c) => c.validate(),
            Credentials::OAuth2(c) => c.validate_shape(),
        }
    }

    /// Value suitable for an HTTP `Authorization` header, where one exists.
    pub fn to_http_authorization(&self) -> AuthResult<String> {
        match self {
            Credentials::UsernamePassword(c) => c.to_http_authorization(),
            Credentials::Token(c) => Ok(c.to_http_authorization()),
            Credentials::OAuth2(_) => Err(AuthError::InvalidArgument(
                "OAuth2 credentials have no HTTP authorization form".into(),
            )),
        }
    }
}

impl From<UsernamePasswordCredentials> for Credentials {
    fn from(value: UsernamePasswordCredentials) -> Self {
        Credentials::UsernamePassword(value)
    }
}

impl From<TokenCredentials> for Credentials {
    fn from(value: TokenCredentials) -> Self {
        Credentials::Token(value)
    }
}

impl From<OAuth2Credentials> for Credentials {
    fn from(value: OAuth2Credentials) -> Self {
        Credentials::OAuth2(value)
    }
}

/// A username and password pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernamePasswordCredentials {
    pub username: String,
    pub password: Option<String>,
}

impl UsernamePasswordCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: Some(password.into()) }
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.username.trim().is_empty() {
            return Err(AuthError::CredentialValidation("Username cannot be null or blank".into()));
        }
        if self.password.is_none() {
            return Err(AuthError::CredentialValidation("Password cannot be null".into()));
        }
        Ok(())
    }

    /// `Basic` authorization value. Usernames containing `:` cannot be encoded.
    pub fn to_http_authorization(&self) -> AuthResult<String> {
        if self.username.contains(':') {
            return Err(AuthError::InvalidArgument("Username contains ':'".into()));
        }
        let raw = format!("{}:{}", self.username, self.password.as_deref().unwrap_or_default());
        Ok(format!("Basic {}", URL_SAFE.encode(raw.as_bytes())))
    }
}

// Keeps the password out of logs.
impl std::fmt::Debug for UsernamePasswordCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsernamePasswordCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A bearer token, typically an access token issued elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCredentials {
    pub token: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into(), scopes: Vec::new() }
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.token.trim().is_empty() {
            return Err(AuthError::CredentialValidation("token cannot be null or blank".into()));
        }
        Ok(())
    }

    pub fn to_http_authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }
}
