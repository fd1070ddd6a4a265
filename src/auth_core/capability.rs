//! Host capabilities the authentication core consumes but does not own.

use std::process::{Command, Stdio};

use tokio::sync::mpsc;
use tracing::debug;

use super::error::{AuthError, AuthResult};

/// Opens a URL in a user agent: a system browser, an embedded web view, or
/// the current page when the application itself runs in a browser.
pub trait UserAgentLauncher: Send + Sync + 'static {
    fn open(&self, url: &str) -> AuthResult<()>;
}

/// Marshals a callback onto the presentation thread.
pub trait UiThreadExecutor: Send + Sync + 'static {
    fn run(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// Launches the platform's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl UserAgentLauncher for SystemBrowser {
    fn open(&self, url: &str) -> AuthResult<()> {
        let mut command = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", "start", "", url]);
            c
        } else if cfg!(target_os = "macos") {
            let mut c = Command::new("open");
            c.arg(url);
            c
        } else {
            let mut c = Command::new("xdg-open");
            c.arg(url);
            c
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|e| AuthError::authentication(format!("Failed to open browser: {}", e)))
    }
}

/// Hands every URL to a channel. Used by headless hosts and tests that drive
/// the redirect themselves.
#[derive(Debug, Clone)]
pub struct ChannelUserAgent {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelUserAgent {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl UserAgentLauncher for ChannelUserAgent {
    fn open(&self, url: &str) -> AuthResult<()> {
        debug!(url, "Forwarding URL to user agent channel");
        self.sender
            .send(url.to_string())
            .map_err(|_| AuthError::authentication("User agent channel is closed"))
    }
}

/// Runs callbacks immediately on the calling thread. For hosts without a
/// dedicated presentation thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl UiThreadExecutor for DirectExecutor {
    fn run(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task();
    }
}
