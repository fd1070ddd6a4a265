use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Configuration of the loopback callback listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    /// Host to bind. `localhost` binds the IPv4 loopback address.
    pub host: String,
    /// Port to bind, `0` for an ephemeral port.
    pub port: u16,
    /// Sets `SO_REUSEADDR` on the listening socket.
    pub reuse_address: bool,
    /// Sets `SO_REUSEPORT` on the listening socket where the platform supports it.
    pub reuse_port: bool,
    /// How long to wait for the browser redirect.
    pub callback_timeout: Duration,
    /// How long a connected client may take to send its request head.
    pub request_timeout: Duration,
    /// Upper bound on the request line plus headers, in bytes.
    pub max_request_size: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reuse_address: false,
            reuse_port: false,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

impl HttpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    pub fn with_reuse_port(mut self, reuse: bool) -> Self {
        self.reuse_port = reuse;
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = size;
        self
    }

    /// Whether the configured host names the local machine.
    pub fn is_local(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "::1" | "[::1]")
    }
}
