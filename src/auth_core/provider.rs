//! The provider trait every authentication source implements.

use async_trait::async_trait;

use super::credentials::Credentials;
use super::error::AuthError;
use super::user::User;

/// Resolves credentials into an authenticated [`User`].
#[async_trait]
pub trait AuthenticationProvider: Send + Sync + 'static {
    /// Authenticates the given credentials asynchronously.
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthError>;
}
