use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::percent_decode_str;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::auth_core::error::{AuthError, AuthResult};

/// Query string parameters in arrival order. Duplicate keys are kept and a
/// key without `=` maps to an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Parses a raw `application/x-www-form-urlencoded` query string.
    ///
    /// # Examples
    ///
    /// ```
    /// use starberry_auth::callback::QueryParams;
    /// let params = QueryParams::parse("foo&bar=HTTP/1.1&bar=2");
    /// assert_eq!(params.get("foo"), Some(""));
    /// assert_eq!(params.get_all("bar"), vec!["HTTP/1.1", "2"]);
    /// ```
    pub fn parse(query: &str) -> Self {
        let pairs = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (decode_component(key), decode_component(value)),
                None => (decode_component(pair), String::new()),
            })
            .collect();
        Self { pairs }
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str()).collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Collapses to a sorted single-valued map, keeping the first value per key.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for (k, v) in &self.pairs {
            map.entry(k.clone()).or_insert_with(|| v.clone());
        }
        map
    }
}

impl fmt::Display for QueryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.to_map().iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", rendered.join(", "))
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// The request head captured by the callback listener.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub method: String,
    /// Raw request target, query string included.
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub query: QueryParams,
}

impl CallbackRequest {
    /// Parses the request line, e.g. `GET /auth?code=abc HTTP/1.1`.
    pub fn parse_start_line(line: &str) -> AuthResult<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(AuthError::HttpServer("Malformed request line".into()));
        }
        if !parts[2].starts_with("HTTP/1.") {
            return Err(AuthError::HttpServer(format!("Unsupported protocol: {}", parts[2])));
        }
        let target = parts[1].to_string();
        let query = target
            .split_once('?')
            .map(|(_, q)| QueryParams::parse(q))
            .unwrap_or_default();
        Ok(Self {
            method: parts[0].to_string(),
            target,
            version: parts[2].to_string(),
            headers: Vec::new(),
            query,
        })
    }

    /// Reads and parses a request head from the stream, stopping at the blank line.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut BufReader<R>, max_size: usize) -> AuthResult<Self> {
        // Bounds the bytes buffered even when a line never ends.
        let mut head = (&mut *reader).take(max_size as u64);
        let mut request: Option<CallbackRequest> = None;
        loop {
            let mut line = String::new();
            let read = head
                .read_line(&mut line)
                .await
                .map_err(|e| AuthError::HttpServer(format!("Failed to read request: {}", e)))?;
            if head.limit() == 0 && !line.ends_with('\n') {
                return Err(AuthError::HttpServer("Request head too large".into()));
            }
            if read == 0 {
                break;
            }
            let line = line.trim_end_matches(['\r', '\n']);
            match request.as_mut() {
                None => request = Some(Self::parse_start_line(line)?),
                Some(_) if line.is_empty() => break,
                Some(req) => {
                    if let Some((name, value)) = line.split_once(':') {
                        req.headers.push((name.trim().to_string(), value.trim().to_string()));
                    }
                }
            }
        }
        request.ok_or_else(|| AuthError::HttpServer("Empty request".into()))
    }

    /// Path component of the target.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_less_keys_are_empty_strings() {
        let params = QueryParams::parse("foo&bar=HTTP/1.1");
        assert_eq!(params.get("foo"), Some(""));
        assert_eq!(params.get("bar"), Some("HTTP/1.1"));
        assert_eq!(params.to_string(), "{bar=HTTP/1.1, foo=}");
    }

    #[test]
    fn values_are_form_decoded() {
        let params = QueryParams::parse("scope=openid+email%20profile&state=a%2Fb&&");
        assert_eq!(params.get("scope"), Some("openid email profile"));
        assert_eq!(params.get("state"), Some("a/b"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn start_line_parsing() {
        let req = CallbackRequest::parse_start_line("GET /auth?foo&bar=HTTP/1.1 HTTP/1.1").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path(), "/auth");
        assert_eq!(req.target, "/auth?foo&bar=HTTP/1.1");
        assert!(CallbackRequest::parse_start_line("GET /auth").is_err());
        assert!(CallbackRequest::parse_start_line("GET / SPDY/3").is_err());
    }

    #[tokio::test]
    async fn reads_head_from_stream() {
        let raw: &[u8] = b"GET /cb?code=x HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\nignored";
        let mut reader = BufReader::new(raw);
        let req = CallbackRequest::read_from(&mut reader, 1024).await.unwrap();
        assert_eq!(req.query.get("code"), Some("x"));
        assert_eq!(req.header("host"), Some("localhost"));
        assert_eq!(req.headers.len(), 2);

        let mut small = BufReader::new(raw);
        assert!(CallbackRequest::read_from(&mut small, 8).await.is_err());
    }

    #[tokio::test]
    async fn unterminated_lines_stop_at_the_size_limit() {
        let (mut client, server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            // Keeps sending without ever ending the request line.
            loop {
                if client.write_all(&[b'a'; 32]).await.is_err() {
                    break;
                }
            }
        });
        let mut reader = BufReader::new(server);
        let err = tokio::time::timeout(std::time::Duration::from_secs(5), CallbackRequest::read_from(&mut reader, 256))
            .await
            .expect("oversized heads fail without waiting for a newline")
            .unwrap_err();
        assert_eq!(err.to_string(), "Request head too large");
        drop(reader);
        writer.await.unwrap();
    }
}
