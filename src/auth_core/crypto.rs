//! Randomness and hashing helpers for the authorization request (state, PKCE, nonce) using `ring`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use uuid::Uuid;

use super::error::{AuthError, AuthResult};

/// Generate a PKCE code challenge from the given verifier using SHA-256 and base64url (no padding).
pub fn pkce_code_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// `len` random bytes from the system CSPRNG, base64url encoded without padding.
pub fn random_token(len: usize) -> AuthResult<String> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf)
        .map_err(|_| AuthError::authentication("Secure random generation failed"))?;
    Ok(URL_SAFE_NO_PAD.encode(&buf))
}

/// Opaque CSRF `state` value.
pub fn generate_state() -> String {
    Uuid::new_v4().to_string()
}

/// PKCE verifier: 32 random bytes, 43 base64url characters.
pub fn generate_code_verifier() -> AuthResult<String> {
    random_token(32)
}

/// Hashes `value` with a named digest (`SHA-256`, `SHA-384`, `SHA-512`) and
/// renders it as lowercase hex. Without an algorithm the value is returned unchanged.
pub fn hash_nonce(algorithm: Option<&str>, value: &str) -> AuthResult<String> {
    let Some(algorithm) = algorithm else {
        return Ok(value.to_string());
    };
    let alg = match algorithm.to_ascii_uppercase().replace('-', "").as_str() {
        "SHA256" => &digest::SHA256,
        "SHA384" => &digest::SHA384,
        "SHA512" => &digest::SHA512,
        other => {
            return Err(AuthError::InvalidArgument(format!("Unsupported nonce algorithm: {}", other)));
        }
    };
    let hash = digest::digest(alg, value.as_bytes());
    Ok(hash.as_ref().iter().map(|b| format!("{:02x}", b)).collect())
}
