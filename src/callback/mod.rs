//! Single-shot loopback HTTP listener that captures the OAuth2 redirect.

pub mod options;
pub mod request;
pub mod server;

pub use options::HttpOptions;
pub use request::{CallbackRequest, QueryParams};
pub use server::CallbackHttpServer;
