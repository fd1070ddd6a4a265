//! Authentication primitives shared by every provider: users, credentials,
//! errors, password policy and the provider combinators.

pub mod error;
pub mod user;
pub mod credentials;
pub mod provider;
pub mod password;
pub mod basic;
pub mod combine;
pub mod http_client;
pub mod crypto;
pub mod capability;
