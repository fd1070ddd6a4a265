//! Error taxonomy shared by every authentication component.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The individual check a JSON Web Token failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// The token is not three base64url segments with JSON header and payload.
    Malformed,
    /// No verification key matches the token header.
    UnknownKey,
    /// The signature does not verify against the resolved key.
    Signature,
    /// `exp` lies in the past, leeway included.
    Expired,
    /// `iss` differs from the configured issuer.
    Issuer,
    /// A configured audience is missing from `aud`.
    Audience,
    /// `nonce` does not equal the hash of the value sent with the authorization request.
    Nonce,
    /// `azp` names a different client.
    AuthorizedParty,
}

impl fmt::Display for TokenCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            TokenCheck::Malformed => "malformed token",
            TokenCheck::UnknownKey => "unknown signing key",
            TokenCheck::Signature => "invalid signature",
            TokenCheck::Expired => "token expired",
            TokenCheck::Issuer => "invalid issuer",
            TokenCheck::Audience => "invalid audience",
            TokenCheck::Nonce => "invalid nonce",
            TokenCheck::AuthorizedParty => "invalid authorized party",
        };
        f.write_str(reason)
    }
}

/// Core authentication error kinds.
#[derive(Debug, Error)]
pub enum AuthError {
    /// General or aggregate authentication failure, optionally carrying its root cause.
    #[error("{message}")]
    Authentication {
        message: String,
        #[source]
        source: Option<Box<AuthError>>,
    },
    /// Credentials were malformed; raised before any provider is consulted.
    #[error("{0}")]
    CredentialValidation(String),
    /// Identity lookup miss. Providers wrap it instead of surfacing it directly.
    #[error("{0}")]
    UserNotFound(String),
    /// A JSON Web Token failed one of its checks.
    #[error("{check}: {detail}")]
    TokenValidation { check: TokenCheck, detail: String },
    /// The loopback callback listener could not bind or failed before a request arrived.
    #[error("{0}")]
    HttpServer(String),
    /// No result arrived within the configured window.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    /// The in-flight authorization attempt was cancelled.
    #[error("Authentication was cancelled")]
    Cancelled,
    /// Invalid configuration or encoder input.
    #[error("{0}")]
    InvalidArgument(String),
    /// Backend transport failure or non-success HTTP status.
    #[error("{message}")]
    Http { status: Option<u16>, message: String },
}

/// Result alias used across the crate.
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    pub fn authentication(message: impl Into<String>) -> Self {
        AuthError::Authentication { message: message.into(), source: None }
    }

    /// An authentication failure whose root cause is `cause`.
    pub fn caused_by(message: impl Into<String>, cause: AuthError) -> Self {
        AuthError::Authentication { message: message.into(), source: Some(Box::new(cause)) }
    }

    pub fn token(check: TokenCheck, detail: impl Into<String>) -> Self {
        AuthError::TokenValidation { check, detail: detail.into() }
    }

    pub fn http(status: Option<u16>, message: impl Into<String>) -> Self {
        AuthError::Http { status, message: message.into() }
    }

    /// Walks the `source` chain down to the innermost error.
    pub fn root_cause(&self) -> &AuthError {
        let mut current = self;
        while let AuthError::Authentication { source: Some(inner), .. } = current {
            current = inner;
        }
        current
    }

    /// The failed token check, if this is a token validation error.
    pub fn token_check(&self) -> Option<TokenCheck> {
        match self {
            AuthError::TokenValidation { check, .. } => Some(*check),
            _ => None,
        }
    }

    /// Whether retrying the same attempt with a fresh listener may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AuthError::Timeout(_) | AuthError::Cancelled | AuthError::HttpServer(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_follows_nested_sources() {
        let err = AuthError::caused_by(
            "Invalid username",
            AuthError::UserNotFound("User does not exist: bob".into()),
        );
        assert_eq!(err.to_string(), "Invalid username");
        assert!(matches!(err.root_cause(), AuthError::UserNotFound(_)));
        assert_eq!(err.root_cause().to_string(), "User does not exist: bob");
    }

    #[test]
    fn token_errors_name_their_check() {
        let err = AuthError::token(TokenCheck::Expired, "exp 10 < now 20");
        assert_eq!(err.token_check(), Some(TokenCheck::Expired));
        assert_eq!(err.to_string(), "token expired: exp 10 < now 20");
        assert!(!err.is_recoverable());
        assert!(AuthError::Timeout(Duration::from_secs(1)).is_recoverable());
    }
}
