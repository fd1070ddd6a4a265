//! Password encoding policy around the bcrypt primitive.

use std::fmt;
use std::sync::Arc;

use bcrypt::Version;
use lazy_static::lazy_static;
use regex::Regex;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::warn;

use super::error::{AuthError, AuthResult};

/// Lowest accepted bcrypt cost factor.
pub const MIN_LOG_ROUNDS: u32 = 4;
/// Highest accepted bcrypt cost factor.
pub const MAX_LOG_ROUNDS: u32 = 31;
/// Cost factor used when none is configured.
pub const DEFAULT_STRENGTH: u32 = 10;

lazy_static! {
    static ref BCRYPT_PATTERN: Regex =
        Regex::new(r"^\$2([ayb])?\$(\d\d)\$[./0-9A-Za-z]{53}$").expect("bcrypt pattern is valid");
}

/// One-way password encoding.
pub trait PasswordEncoder: Send + Sync + 'static {
    /// Encodes the raw password with a fresh salt.
    fn encode(&self, raw_password: &str) -> AuthResult<String>;

    /// Verifies a raw password against an encoded one. Malformed encodings never match.
    fn matches(&self, raw_password: &str, encoded_password: &str) -> bool;

    /// Whether the encoded password should be encoded again for better security.
    fn upgrade_encoding(&self, encoded_password: &str) -> AuthResult<bool> {
        let _ = encoded_password;
        Ok(false)
    }
}

/// bcrypt revision tag written into the encoded string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BCryptVersion {
    #[default]
    TwoA,
    TwoB,
    TwoY,
}

impl BCryptVersion {
    fn as_bcrypt(self) -> Version {
        match self {
            BCryptVersion::TwoA => Version::TwoA,
            BCryptVersion::TwoB => Version::TwoB,
            BCryptVersion::TwoY => Version::TwoY,
        }
    }
}

/// Source of the 16 salt bytes. Tests inject a deterministic one.
pub trait SaltSource: Send + Sync + 'static {
    fn fill_salt(&self, salt: &mut [u8; 16]) -> AuthResult<()>;
}

/// Salt source backed by the operating system CSPRNG.
pub struct SystemSaltSource {
    rng: SystemRandom,
}

impl Default for SystemSaltSource {
    fn default() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl SaltSource for SystemSaltSource {
    fn fill_salt(&self, salt: &mut [u8; 16]) -> AuthResult<()> {
        self.rng
            .fill(salt)
            .map_err(|_| AuthError::InvalidArgument("Salt generation failed".into()))
    }
}

/// bcrypt implementation of [`PasswordEncoder`].
#[derive(Clone)]
pub struct BCryptPasswordEncoder {
    strength: u32,
    version: BCryptVersion,
    salt_source: Arc<dyn SaltSource>,
}

impl Default for BCryptPasswordEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BCryptPasswordEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BCryptPasswordEncoder")
            .field("strength", &self.strength)
            .field("version", &self.version)
            .finish()
    }
}

impl BCryptPasswordEncoder {
    /// Encoder with strength 10, version `2a` and system randomness.
    pub fn new() -> Self {
        Self {
            strength: DEFAULT_STRENGTH,
            version: BCryptVersion::default(),
            salt_source: Arc::new(SystemSaltSource::default()),
        }
    }

    /// Sets the cost factor. Must lie within `4..=31`.
    pub fn with_strength(mut self, strength: u32) -> AuthResult<Self> {
        if !(MIN_LOG_ROUNDS..=MAX_LOG_ROUNDS).contains(&strength) {
            return Err(AuthError::InvalidArgument("Bad strength".into()));
        }
        self.strength = strength;
        Ok(self)
    }

    pub fn with_version(mut self, version: BCryptVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_salt_source(mut self, salt_source: Arc<dyn SaltSource>) -> Self {
        self.salt_source = salt_source;
        self
    }

    pub fn strength(&self) -> u32 {
        self.strength
    }

    pub fn version(&self) -> BCryptVersion {
        self.version
    }
}

impl PasswordEncoder for BCryptPasswordEncoder {
    fn encode(&self, raw_password: &str) -> AuthResult<String> {
        let mut salt = [0u8; 16];
        self.salt_source.fill_salt(&mut salt)?;
        let parts = bcrypt::hash_with_salt(raw_password, self.strength, salt)
            .map_err(|e| AuthError::InvalidArgument(e.to_string()))?;
        Ok(parts.format_for_version(self.version.as_bcrypt()))
    }

    fn matches(&self, raw_password: &str, encoded_password: &str) -> bool {
        if encoded_password.is_empty() {
            warn!("Empty encoded password");
            return false;
        }
        if !BCRYPT_PATTERN.is_match(encoded_password) {
            warn!("Encoded password does not look like BCrypt");
            return false;
        }
        match bcrypt::verify(raw_password, encoded_password) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "BCrypt verification failed");
                false
            }
        }
    }

    fn upgrade_encoding(&self, encoded_password: &str) -> AuthResult<bool> {
        if encoded_password.is_empty() {
            warn!("Empty encoded password");
            return Ok(false);
        }
        let captures = BCRYPT_PATTERN.captures(encoded_password).ok_or_else(|| {
            AuthError::InvalidArgument(format!(
                "Encoded password does not look like BCrypt: {}",
                encoded_password
            ))
        })?;
        let strength: u32 = captures[2]
            .parse()
            .map_err(|_| AuthError::InvalidArgument("Invalid bcrypt cost factor".into()))?;
        Ok(strength < self.strength)
    }
}
