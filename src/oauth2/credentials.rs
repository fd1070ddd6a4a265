use serde::{Deserialize, Serialize};

use super::flow::OAuth2Flow;
use crate::auth_core::error::{AuthError, AuthResult};

/// Credentials for one OAuth2 grant. Which fields are required depends on the flow.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2Credentials {
    pub code: Option<String>,
    pub code_verifier: Option<String>,
    pub redirect_uri: Option<String>,
    pub jwt: Option<String>,
    pub assertion: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub scopes: Vec<String>,
    /// Overrides the provider's configured flow.
    pub flow: Option<OAuth2Flow>,
    pub nonce: Option<String>,
    pub state: Option<String>,
}

impl OAuth2Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_jwt(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = Some(jwt.into());
        self
    }

    pub fn with_assertion(mut self, assertion: impl Into<String>) -> Self {
        self.assertion = Some(assertion.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_flow(mut self, flow: OAuth2Flow) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Checks the fields the given flow needs are present.
    pub fn validate(&self, flow: Option<OAuth2Flow>) -> AuthResult<()> {
        let flow = flow.ok_or_else(|| invalid("flow cannot be null"))?;
        match flow {
            OAuth2Flow::AuthCode => {
                require(self.code.as_deref(), "code cannot be null or blank")?;
                self.check_redirect_uri()
            }
            OAuth2Flow::Password => {
                require(self.username.as_deref(), "username cannot be null or blank")?;
                require(self.password.as_deref(), "password cannot be null or blank")
            }
            OAuth2Flow::AuthJwt => match self.jwt {
                Some(_) => Ok(()),
                None => Err(invalid("jwt cannot be null")),
            },
            OAuth2Flow::Client | OAuth2Flow::Implicit => Ok(()),
        }
    }

    /// The checks that hold before the provider has resolved the flow or
    /// captured an authorization code.
    pub fn validate_shape(&self) -> AuthResult<()> {
        self.check_redirect_uri()?;
        match self.flow {
            Some(flow @ (OAuth2Flow::Password | OAuth2Flow::AuthJwt)) => self.validate(Some(flow)),
            _ => Ok(()),
        }
    }

    fn check_redirect_uri(&self) -> AuthResult<()> {
        match self.redirect_uri.as_deref() {
            Some(uri) if uri.trim().is_empty() => Err(invalid("redirectUri cannot be blank")),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for OAuth2Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Credentials")
            .field("flow", &self.flow)
            .field("code", &self.code.as_ref().map(|_| "***"))
            .field("redirect_uri", &self.redirect_uri)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("scopes", &self.scopes)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn require(value: Option<&str>, message: &str) -> AuthResult<()> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(invalid(message)),
    }
}

fn invalid(message: &str) -> AuthError {
    AuthError::CredentialValidation(message.to_string())
}
