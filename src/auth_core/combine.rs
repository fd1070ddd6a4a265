//! Provider combinators: first success wins (`any`) or every provider must succeed (`all`).

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, instrument};

use super::credentials::Credentials;
use super::error::{AuthError, AuthResult};
use super::provider::AuthenticationProvider;
use super::user::User;

const EMPTY_PROVIDERS: &str = "The combined providers list is empty.";
const NO_CAPABLE_PROVIDER: &str = "No provider capable of performing this operation.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Any,
    All,
}

/// Authenticates through an ordered list of child providers.
///
/// `any()` tries children one after another and returns the first user
/// produced. `all()` runs every child concurrently and folds the users with
/// [`User::merge`] in list order; when children fail, the failure of the
/// earliest one in the list is reported. Once a failure is known, `all()`
/// waits only for the children listed before it and drops the rest.
#[derive(Clone)]
pub struct CombineAuthenticationProvider {
    mode: Mode,
    providers: Arc<RwLock<Vec<Arc<dyn AuthenticationProvider>>>>,
}

impl CombineAuthenticationProvider {
    pub fn any() -> Self {
        Self::with_mode(Mode::Any)
    }

    pub fn all() -> Self {
        Self::with_mode(Mode::All)
    }

    fn with_mode(mode: Mode) -> Self {
        Self { mode, providers: Arc::new(RwLock::new(Vec::new())) }
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(self, provider: Arc<dyn AuthenticationProvider>) -> Self {
        self.add(provider);
        self
    }

    /// Appends a provider. Safe while other tasks authenticate; attempts already
    /// running keep the list they started with.
    pub fn add(&self, provider: Arc<dyn AuthenticationProvider>) {
        let mut providers = match self.providers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        providers.push(provider);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn AuthenticationProvider>> {
        match self.providers.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn authenticate_any(
        providers: &[Arc<dyn AuthenticationProvider>],
        credentials: &Credentials,
    ) -> AuthResult<User> {
        let mut last_failure = None;
        for (idx, provider) in providers.iter().enumerate() {
            match provider.authenticate(credentials).await {
                Ok(user) => return Ok(user),
                Err(e) => {
                    debug!(provider = idx, error = %e, "Provider failed, trying next");
                    last_failure = Some(e);
                }
            }
        }
        Err(match last_failure {
            Some(cause) => AuthError::caused_by(NO_CAPABLE_PROVIDER, cause),
            None => AuthError::authentication(NO_CAPABLE_PROVIDER),
        })
    }

    async fn authenticate_all(
        providers: &[Arc<dyn AuthenticationProvider>],
        credentials: &Credentials,
    ) -> AuthResult<User> {
        let mut pending: FuturesUnordered<_> = providers
            .iter()
            .enumerate()
            .map(|(idx, provider)| async move { (idx, provider.authenticate(credentials).await) })
            .collect();

        let mut users: Vec<Option<User>> = providers.iter().map(|_| None).collect();
        let mut failure: Option<(usize, AuthError)> = None;
        while let Some((idx, result)) = pending.next().await {
            match result {
                Ok(user) => users[idx] = Some(user),
                Err(e) => {
                    debug!(provider = idx, error = %e, "Provider failed");
                    if failure.as_ref().is_none_or(|(first, _)| idx < *first) {
                        failure = Some((idx, e));
                    }
                }
            }
            // Every provider listed before the failing one has succeeded.
            if let Some((first, _)) = &failure {
                if users[..*first].iter().all(Option::is_some) {
                    break;
                }
            }
        }
        if let Some((_, e)) = failure {
            return Err(e);
        }

        users
            .into_iter()
            .flatten()
            .reduce(|merged, user| merged.merge(&user))
            .ok_or_else(|| AuthError::authentication(EMPTY_PROVIDERS))
    }
}

#[async_trait]
impl AuthenticationProvider for CombineAuthenticationProvider {
    #[instrument(skip(self, credentials), fields(mode = ?self.mode), level = "debug")]
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthError> {
        credentials.validate()?;

        let providers = self.snapshot();
        if providers.is_empty() {
            return Err(AuthError::authentication(EMPTY_PROVIDERS));
        }

        match self.mode {
            Mode::Any => Self::authenticate_any(&providers, credentials).await,
            Mode::All => Self::authenticate_all(&providers, credentials).await,
        }
    }
}
