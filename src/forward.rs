//! Relaying requests to a real backend.

use crate::error::ForwardError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Headers that describe a single connection and are never relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Whether a header must be dropped when relaying or echoing.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Join a forwarded endpoint and a request path without doubling slashes.
pub fn join_url(endpoint: &str, path_and_query: &str) -> String {
    if path_and_query.is_empty() {
        return endpoint.to_string();
    }
    let base = endpoint.trim_end_matches('/');
    if path_and_query.starts_with('/') || path_and_query.starts_with('?') {
        format!("{base}{path_and_query}")
    } else {
        format!("{base}/{path_and_query}")
    }
}

/// A request about to be relayed upstream.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// What the upstream answered.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl UpstreamReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Client used to relay requests.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: ForwardRequest) -> Result<UpstreamReply, ForwardError>;
}

/// Forwarder backed by `reqwest` with mandatory timeouts.
pub struct HttpForwarder {
    client: reqwest::Client,
    timeout_ms: u64,
}

impl HttpForwarder {
    /// Create a forwarder with request and connect timeouts.
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to create HTTP client with custom settings, using default");
                reqwest::Client::new()
            });

        Self {
            client,
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, request: ForwardRequest) -> Result<UpstreamReply, ForwardError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ForwardError::InvalidUrl(format!("{} {}", request.method, request.url)))?;
        let url = reqwest::Url::parse(&request.url)
            .map_err(|_| ForwardError::InvalidUrl(request.url.clone()))?;

        debug!(url = %url, method = %method, "Forwarding request");

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        let response = builder.body(request.body).send().await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::Timeout(self.timeout_ms)
            } else {
                ForwardError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ForwardError::Timeout(self.timeout_ms)
                } else {
                    ForwardError::Unreachable(e.to_string())
                }
            })?
            .to_vec();

        Ok(UpstreamReply {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request(url: String) -> ForwardRequest {
        ForwardRequest {
            url,
            method: "POST".to_string(),
            headers: vec![
                ("X-Trace".to_string(), "abc".to_string()),
                ("Host".to_string(), "ignored".to_string()),
            ],
            body: b"ping".to_vec(),
        }
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://up/api/", "/pet?id=1"), "http://up/api/pet?id=1");
        assert_eq!(join_url("http://up/api", "pet"), "http://up/api/pet");
        assert_eq!(join_url("http://up/ws", ""), "http://up/ws");
    }

    #[test]
    fn test_hop_by_hop() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("content-length"));
        assert!(!is_hop_by_hop("Content-Type"));
    }

    #[tokio::test]
    async fn test_relays_upstream_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let raw = String::from_utf8_lossy(&buf[..n]).to_string();
            socket
                .write_all(b"HTTP/1.1 201 Created\r\nX-Upstream: yes\r\nContent-Length: 4\r\nConnection: close\r\n\r\npong")
                .await
                .unwrap();
            raw
        });

        let forwarder = HttpForwarder::new(Duration::from_secs(5), Duration::from_secs(1));
        let reply = forwarder
            .forward(request(format!("http://{addr}/pets")))
            .await
            .unwrap();

        assert_eq!(reply.status, 201);
        assert_eq!(reply.body, b"pong");
        assert!(reply
            .headers
            .iter()
            .any(|(k, v)| k == "x-upstream" && v == "yes"));

        let raw = server.await.unwrap().to_lowercase();
        assert!(raw.starts_with("post /pets"));
        assert!(raw.contains("x-trace: abc"));
        assert!(!raw.contains("ignored"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let forwarder = HttpForwarder::new(Duration::from_secs(2), Duration::from_millis(500));
        let result = forwarder.forward(request(format!("http://{addr}/"))).await;
        assert!(matches!(
            result,
            Err(ForwardError::Unreachable(_)) | Err(ForwardError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_upstream_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let forwarder = HttpForwarder::new(Duration::from_millis(200), Duration::from_millis(200));
        let result = forwarder.forward(request(format!("http://{addr}/"))).await;
        assert!(matches!(result, Err(ForwardError::Timeout(200))));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let forwarder = HttpForwarder::new(Duration::from_secs(1), Duration::from_secs(1));
        let result = forwarder.forward(request("not a url".to_string())).await;
        assert!(matches!(result, Err(ForwardError::InvalidUrl(_))));
    }
}
