//! OpenID Connect client support: discovery, JWKS and token verification.

pub mod discovery;
pub mod jwks;
pub mod jwt;

pub use discovery::{DiscoveryClient, DiscoveryDocument};
pub use jwks::JwksCache;
pub use jwt::{ClaimChecks, DecodedToken, JwtValidator};
