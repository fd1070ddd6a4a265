//! Username/password authentication backed by a user store.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use super::credentials::{Credentials, UsernamePasswordCredentials};
use super::error::{AuthError, AuthResult};
use super::password::{BCryptPasswordEncoder, PasswordEncoder};
use super::provider::AuthenticationProvider;
use super::user::{User, KEY_AUTH};

/// Attribute under which a stored user keeps its username and encoded password.
pub const KEY_CREDENTIALS: &str = "credentials";

/// Storage of users that authenticate with a username and password.
#[async_trait]
pub trait UserManager: Send + Sync + 'static {
    /// Creates a user, storing the password encoded. Fails if the name is taken.
    async fn create_user(
        &self,
        credentials: &UsernamePasswordCredentials,
        roles: Vec<String>,
        attributes: Map<String, Value>,
    ) -> AuthResult<User>;

    /// Replaces roles and attributes of an existing user, keeping its credentials.
    async fn update_user(
        &self,
        username: &str,
        roles: Vec<String>,
        attributes: Map<String, Value>,
    ) -> AuthResult<User>;

    /// Removes a user, returning it if it existed.
    async fn delete_user(&self, username: &str) -> AuthResult<Option<User>>;

    /// Stores a new password and drops any `auth` attribute to force re-authentication.
    async fn change_password(&self, username: &str, new_password: &str) -> AuthResult<User>;

    fn user_exists(&self, username: &str) -> bool;

    /// Fails with [`AuthError::UserNotFound`] when the user is unknown.
    async fn load_user_by_username(&self, username: &str) -> AuthResult<User>;
}

/// Process-local [`UserManager`].
#[derive(Clone)]
pub struct InMemoryUserManager {
    users: Arc<DashMap<String, User>>,
    encoder: Arc<dyn PasswordEncoder>,
}

impl Default for InMemoryUserManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUserManager {
    /// Creates an empty store using the default bcrypt encoder.
    pub fn new() -> Self {
        Self::with_encoder(Arc::new(BCryptPasswordEncoder::new()))
    }

    pub fn with_encoder(encoder: Arc<dyn PasswordEncoder>) -> Self {
        Self { users: Arc::new(DashMap::new()), encoder }
    }

    /// Seeds the store with already built users.
    pub fn with_users(self, users: impl IntoIterator<Item = User>) -> Self {
        for user in users {
            self.users.insert(user.name().to_string(), user);
        }
        self
    }

    pub fn encoder(&self) -> Arc<dyn PasswordEncoder> {
        self.encoder.clone()
    }

    async fn credentials_json(&self, credentials: &UsernamePasswordCredentials) -> AuthResult<Value> {
        let encoded = encode_blocking(
            self.encoder.clone(),
            credentials.password.clone().unwrap_or_default(),
        )
        .await?;
        Ok(json!({ "username": credentials.username, "password": encoded }))
    }

    fn not_found(username: &str) -> AuthError {
        AuthError::UserNotFound(format!("User does not exist: {}", username))
    }
}

#[async_trait]
impl UserManager for InMemoryUserManager {
    #[instrument(skip(self, credentials, attributes), fields(username = %credentials.username), level = "debug")]
    async fn create_user(
        &self,
        credentials: &UsernamePasswordCredentials,
        roles: Vec<String>,
        attributes: Map<String, Value>,
    ) -> AuthResult<User> {
        credentials.validate()?;
        if self.user_exists(&credentials.username) {
            return Err(AuthError::InvalidArgument(format!("User already exists: {}", credentials.username)));
        }

        let stored = self.credentials_json(credentials).await?;
        let user = User::new(credentials.username.clone())
            .with_roles(roles)
            .with_attributes(attributes)
            .with_attribute(KEY_CREDENTIALS, stored);

        match self.users.entry(credentials.username.clone()) {
            Entry::Occupied(_) => Err(AuthError::InvalidArgument(format!(
                "User already exists: {}",
                credentials.username
            ))),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }

    async fn update_user(
        &self,
        username: &str,
        roles: Vec<String>,
        attributes: Map<String, Value>,
    ) -> AuthResult<User> {
        let mut entry = self.users.get_mut(username).ok_or_else(|| Self::not_found(username))?;
        let mut user = User::new(username).with_roles(roles).with_attributes(attributes);
        if let Some(stored) = entry.attributes().get(KEY_CREDENTIALS) {
            user = user.with_attribute(KEY_CREDENTIALS, stored.clone());
        }
        *entry = user.clone();
        Ok(user)
    }

    async fn delete_user(&self, username: &str) -> AuthResult<Option<User>> {
        Ok(self.users.remove(username).map(|(_, user)| user))
    }

    #[instrument(skip(self, new_password), level = "debug")]
    async fn change_password(&self, username: &str, new_password: &str) -> AuthResult<User> {
        if !self.user_exists(username) {
            return Err(Self::not_found(username));
        }
        let credentials = UsernamePasswordCredentials::new(username, new_password);
        credentials.validate()?;
        let stored = self.credentials_json(&credentials).await?;

        let mut entry = self.users.get_mut(username).ok_or_else(|| Self::not_found(username))?;
        let mut attributes = entry.attributes().clone();
        attributes.insert(KEY_CREDENTIALS.to_string(), stored);
        attributes.remove(KEY_AUTH);
        let user = User::new(username)
            .with_roles(entry.roles().iter().cloned())
            .with_attributes(attributes);
        *entry = user.clone();
        Ok(user)
    }

    fn user_exists(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    async fn load_user_by_username(&self, username: &str) -> AuthResult<User> {
        self.users
            .get(username)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Self::not_found(username))
    }
}

/// Authenticates [`UsernamePasswordCredentials`] against a [`UserManager`].
///
/// Unknown usernames still pay for one password verification, so both
/// failures take about as long.
pub struct BasicAuthenticationProvider<M: UserManager> {
    user_manager: Arc<M>,
    encoder: Arc<dyn PasswordEncoder>,
    /// Encoded throwaway password checked when the user does not exist.
    decoy: OnceCell<String>,
    roles: BTreeSet<String>,
    attributes: Map<String, Value>,
}

impl<M: UserManager> BasicAuthenticationProvider<M> {
    /// Every authenticated user receives `roles` and `attributes`.
    pub fn new<I, S>(user_manager: Arc<M>, roles: I, attributes: Map<String, Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_manager,
            encoder: Arc::new(BCryptPasswordEncoder::new()),
            decoy: OnceCell::new(),
            roles: roles.into_iter().map(Into::into).collect(),
            attributes,
        }
    }

    /// Uses a specific encoder to verify stored passwords.
    pub fn with_encoder(mut self, encoder: Arc<dyn PasswordEncoder>) -> Self {
        self.encoder = encoder;
        self.decoy = OnceCell::new();
        self
    }

    pub fn user_manager(&self) -> &Arc<M> {
        &self.user_manager
    }

    async fn authenticate_password(&self, credentials: &UsernamePasswordCredentials) -> AuthResult<User> {
        credentials.validate().inspect_err(|e| {
            warn!(error = %e, "Username and password credentials not valid");
        })?;

        let user = match self.user_manager.load_user_by_username(&credentials.username).await {
            Ok(user) => user,
            Err(e @ AuthError::UserNotFound(_)) => {
                self.verify_decoy(credentials).await;
                return Err(AuthError::caused_by("Invalid username", e));
            }
            Err(e) => return Err(e),
        };

        let stored = user
            .attributes()
            .get(KEY_CREDENTIALS)
            .and_then(Value::as_object)
            .ok_or_else(|| AuthError::authentication("User has no credentials"))?;
        let username = stored.get("username").and_then(Value::as_str).unwrap_or_default();
        let encoded = stored.get("password").and_then(Value::as_str).unwrap_or_default().to_string();

        let password = credentials.password.clone().unwrap_or_default();
        let matched = username == credentials.username
            && matches_blocking(self.encoder.clone(), password, encoded.clone()).await?;
        if !matched {
            debug!(username = %credentials.username, "Password mismatch");
            return Err(AuthError::authentication("Invalid username or password"));
        }

        Ok(User::new(user.name())
            .with_roles(self.roles.iter().cloned())
            .with_attributes(self.attributes.clone())
            .with_attribute(
                KEY_AUTH,
                json!({ "type": "basic", "username": username, "password": encoded }),
            ))
    }

    async fn verify_decoy(&self, credentials: &UsernamePasswordCredentials) {
        let decoy = self
            .decoy
            .get_or_try_init(|| encode_blocking(self.encoder.clone(), "decoy-password".to_string()))
            .await;
        match decoy {
            Ok(decoy) => {
                let password = credentials.password.clone().unwrap_or_default();
                let _ = matches_blocking(self.encoder.clone(), password, decoy.clone()).await;
            }
            Err(e) => debug!(error = %e, "Cannot encode decoy password"),
        }
    }
}

#[async_trait]
impl<M: UserManager> AuthenticationProvider for BasicAuthenticationProvider<M> {
    #[instrument(skip(self, credentials), level = "debug")]
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthError> {
        match credentials {
            Credentials::UsernamePassword(c) => self.authenticate_password(c).await,
            _ => Err(AuthError::authentication("Basic authentication requires username and password credentials")),
        }
    }
}

// bcrypt is CPU bound; keep it off the async workers.
async fn encode_blocking(encoder: Arc<dyn PasswordEncoder>, raw: String) -> AuthResult<String> {
    tokio::task::spawn_blocking(move || encoder.encode(&raw))
        .await
        .map_err(|e| AuthError::InvalidArgument(format!("Password encoding task failed: {}", e)))?
}

async fn matches_blocking(encoder: Arc<dyn PasswordEncoder>, raw: String, encoded: String) -> AuthResult<bool> {
    tokio::task::spawn_blocking(move || encoder.matches(&raw, &encoded))
        .await
        .map_err(|e| AuthError::authentication(format!("Password verification task failed: {}", e)))
}
