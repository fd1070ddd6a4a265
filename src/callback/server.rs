use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use super::options::HttpOptions;
use super::request::{CallbackRequest, QueryParams};
use crate::auth_core::error::{AuthError, AuthResult};

/// Page served to the browser once the redirect has been captured.
pub const DEFAULT_RESPONSE_HTML: &str = concat!(
    "<!DOCTYPE html>\n",
    "<html lang=\"en\">\n",
    "<head>\n",
    "    <meta http-equiv=\"Content-Type\" content=\"text/html\" charset=\"UTF-8\">\n",
    "    <title>Authentication</title>\n",
    "</head>\n",
    "<body>\n",
    "    <div style=\"text-align: center; font-family: sans-serif; margin-top: 20px;\">\n",
    "        <h3>Authentication Successful</h3>\n",
    "        <i>Please close the page.</i>\n",
    "    </div>\n",
    "</body>\n",
    "</html>",
);

const LISTEN_BACKLOG: u32 = 16;

/// Loopback listener that accepts exactly one redirect request, answers it with
/// [`DEFAULT_RESPONSE_HTML`] and shuts down.
///
/// Requests for a different path than the expected one (a browser asking for
/// `/favicon.ico`, say) are answered with `404` and do not end the wait.
pub struct CallbackHttpServer {
    options: HttpOptions,
    expected_path: Option<String>,
    local_addr: Option<SocketAddr>,
    result: Option<oneshot::Receiver<AuthResult<CallbackRequest>>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    captured: Option<CallbackRequest>,
}

impl CallbackHttpServer {
    pub fn new(options: HttpOptions) -> Self {
        Self {
            options,
            expected_path: None,
            local_addr: None,
            result: None,
            shutdown: None,
            task: None,
            captured: None,
        }
    }

    /// Only a request for `path` completes the wait.
    pub fn with_expected_path(mut self, path: impl Into<String>) -> Self {
        self.expected_path = Some(path.into());
        self
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }

    /// Binds the listener and starts accepting. Returns the configured host and the bound port.
    #[instrument(skip(self), fields(host = %self.options.host, port = self.options.port), level = "debug")]
    pub async fn start(&mut self) -> AuthResult<(String, u16)> {
        if self.task.is_some() {
            return Err(AuthError::HttpServer("Server already started".into()));
        }
        let listener = self.bind().await?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AuthError::HttpServer(format!("Failed to read local address: {}", e)))?;
        self.local_addr = Some(local_addr);

        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.result = Some(result_rx);
        self.shutdown = Some(shutdown_tx);
        self.task = Some(tokio::spawn(accept_loop(
            listener,
            self.expected_path.clone(),
            self.options.request_timeout,
            self.options.max_request_size,
            result_tx,
            shutdown_rx,
        )));

        info!(port = local_addr.port(), "Starting callback server");
        Ok((self.options.host.clone(), local_addr.port()))
    }

    async fn bind(&self) -> AuthResult<TcpListener> {
        let addr = self.resolve().await?;
        let socket = (if addr.is_ipv4() { TcpSocket::new_v4() } else { TcpSocket::new_v6() })
            .map_err(|e| AuthError::HttpServer(format!("Failed to create socket: {}", e)))?;
        if self.options.reuse_address {
            socket
                .set_reuseaddr(true)
                .map_err(|e| AuthError::HttpServer(format!("Failed to set SO_REUSEADDR: {}", e)))?;
        }
        if self.options.reuse_port {
            set_reuse_port(&socket);
        }
        socket
            .bind(addr)
            .map_err(|e| AuthError::HttpServer(format!("Failed to bind {}: {}", addr, e)))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| AuthError::HttpServer(format!("Failed to listen on {}: {}", addr, e)))
    }

    async fn resolve(&self) -> AuthResult<SocketAddr> {
        let host = self.options.host.trim_start_matches('[').trim_end_matches(']');
        if host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.options.port));
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.options.port));
        }
        tokio::net::lookup_host((host, self.options.port))
            .await
            .map_err(|e| AuthError::HttpServer(format!("Failed to resolve {}: {}", host, e)))?
            .next()
            .ok_or_else(|| AuthError::HttpServer(format!("No address for {}", host)))
    }

    /// Waits for the redirect. On timeout the listener is closed and
    /// [`AuthError::Timeout`] is returned; a fresh server may be started to retry.
    pub async fn await_callback(&mut self, timeout: Duration) -> AuthResult<&CallbackRequest> {
        if self.captured.is_none() {
            let receiver = self
                .result
                .as_mut()
                .ok_or_else(|| AuthError::HttpServer("Server not started".into()))?;
            let outcome = match tokio::time::timeout(timeout, receiver).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(AuthError::Cancelled),
                Err(_) => Err(AuthError::Timeout(timeout)),
            };
            self.result = None;
            self.close();
            self.captured = Some(outcome?);
        }
        self.captured
            .as_ref()
            .ok_or_else(|| AuthError::HttpServer("No request captured".into()))
    }

    /// Stops accepting and releases the listening socket. Idempotent.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Callback server stopped");
        }
    }

    pub fn host(&self) -> &str {
        &self.options.host
    }

    /// Bound port once started, the configured one before.
    pub fn port(&self) -> u16 {
        self.local_addr.map(|addr| addr.port()).unwrap_or(self.options.port)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Raw request target of the captured redirect, query string included.
    pub fn full_requested_url(&self) -> Option<&str> {
        self.captured.as_ref().map(|req| req.target.as_str())
    }

    pub fn query_params(&self) -> Option<&QueryParams> {
        self.captured.as_ref().map(|req| &req.query)
    }

    pub fn captured(&self) -> Option<&CallbackRequest> {
        self.captured.as_ref()
    }
}

impl Drop for CallbackHttpServer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(unix)]
fn set_reuse_port(socket: &TcpSocket) {
    if let Err(e) = socket.set_reuseport(true) {
        warn!(error = %e, "The 'SO_REUSEPORT' option is not supported on this platform.");
    }
}

#[cfg(not(unix))]
fn set_reuse_port(_socket: &TcpSocket) {
    warn!("The 'SO_REUSEPORT' option is not supported on this platform.");
}

async fn accept_loop(
    listener: TcpListener,
    expected_path: Option<String>,
    request_timeout: Duration,
    max_request_size: usize,
    result: oneshot::Sender<AuthResult<CallbackRequest>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    // Connections are served side by side so an idle pre-connect cannot hold up the redirect.
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Callback connection accepted");
                    let expected_path = expected_path.clone();
                    connections.spawn(async move {
                        let served =
                            serve_connection(stream, expected_path.as_deref(), request_timeout, max_request_size).await;
                        (peer, served)
                    });
                }
                Err(e) => {
                    let _ = result.send(Err(AuthError::HttpServer(format!("Accept failed: {}", e))));
                    return;
                }
            },
            Some(joined) = connections.join_next() => match joined {
                Ok((_, Ok(Some(request)))) => {
                    debug!(
                        url = %request.target,
                        method = %request.method,
                        params = %request.query,
                        "Captured redirect request"
                    );
                    let _ = result.send(Ok(request));
                    return;
                }
                Ok((_, Ok(None))) => {}
                Ok((peer, Err(e))) => warn!(%peer, error = %e, "Discarding callback connection"),
                Err(e) => warn!(error = %e, "Callback connection task failed"),
            },
        }
    }
}

/// Serves one connection. `Ok(None)` means the request was not the redirect.
async fn serve_connection(
    stream: TcpStream,
    expected_path: Option<&str>,
    request_timeout: Duration,
    max_request_size: usize,
) -> AuthResult<Option<CallbackRequest>> {
    let mut reader = BufReader::new(stream);
    let request = match tokio::time::timeout(
        request_timeout,
        CallbackRequest::read_from(&mut reader, max_request_size),
    )
    .await
    {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            write_response(reader.get_mut(), 400, "Bad Request", "text/plain", b"Bad Request").await?;
            return Err(e);
        }
        Err(_) => return Err(AuthError::Timeout(request_timeout)),
    };

    let stream = reader.get_mut();
    if expected_path.is_some_and(|path| path != request.path()) {
        write_response(stream, 404, "Not Found", "text/plain", b"Not Found").await?;
        return Ok(None);
    }
    write_response(stream, 200, "OK", "text/html", DEFAULT_RESPONSE_HTML.as_bytes()).await?;
    Ok(Some(request))
}

async fn write_response(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    content_type: &str,
    body: &[u8],
) -> AuthResult<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: {}\r\n\r\n",
        status,
        reason,
        body.len(),
        content_type
    );
    let io = |e: std::io::Error| AuthError::HttpServer(format!("Failed to write response: {}", e));
    stream.write_all(head.as_bytes()).await.map_err(io)?;
    stream.write_all(body).await.map_err(io)?;
    stream.flush().await.map_err(io)?;
    let _ = stream.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_page_is_350_bytes() {
        assert_eq!(DEFAULT_RESPONSE_HTML.len(), 350);
        assert!(DEFAULT_RESPONSE_HTML.contains("<h3>Authentication Successful</h3>"));
    }

    #[tokio::test]
    async fn await_before_start_fails() {
        let mut server = CallbackHttpServer::new(HttpOptions::new().with_port(0));
        let err = server.await_callback(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, AuthError::HttpServer(_)));
    }

    #[tokio::test]
    async fn times_out_without_request() {
        let mut server = CallbackHttpServer::new(HttpOptions::new().with_port(0));
        let (host, port) = server.start().await.unwrap();
        assert_eq!(host, "localhost");
        assert_ne!(port, 0);
        let err = server.await_callback(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, AuthError::Timeout(_)));
        assert!(err.is_recoverable());
    }
}
