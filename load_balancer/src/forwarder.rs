use crate::error::ForwardError;

use actix_web::web::Bytes;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Method, Url};
use std::fmt::Debug;

/// Headers that only make sense for a single connection and must not be relayed by a proxy.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A request received by the load balancer, kept in memory so that it can be sent again when a
/// backend fails.
#[derive(Clone, Debug, Default)]
pub struct ProxyRequest {
    pub method: String,

    /// Path and query of the inbound request, for example: /search?q=rust
    pub path_and_query: String,

    pub headers: Vec<(String, Vec<u8>)>,

    pub body: Bytes,

    /// Address of the client that sent the request, appended to X-Forwarded-For.
    pub client_addr: Option<String>,
}

/// The response of a backend server, relayed as is to the client.
#[derive(Clone, Debug)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
}

/// Forwards one request to one backend server. Implementations do not retry: a failure is
/// reported to the dispatcher which decides what to do next.
#[async_trait]
pub trait Forwarder: Send + Sync + Debug {
    async fn forward(&self, request: &ProxyRequest) -> Result<ProxyResponse, ForwardError>;
}

/// Returns true if the header must not be relayed between the client and the backend server.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Forwards requests over HTTP to the backend server at `target`.
#[derive(Clone, Debug)]
pub struct HttpForwarder {
    /// Address of the backend server, contains the protocol, hostname and port. Its path, if any,
    /// prefixes the path of every forwarded request.
    target: Url,

    /// Shared between all the backends. Its timeout bounds every forwarded request.
    client: Client,
}

impl HttpForwarder {
    pub fn new(target: Url, client: Client) -> Self {
        Self { target, client }
    }

    /// Builds the address the request is sent to by joining the target path and the request
    /// path with exactly one slash.
    fn target_url(&self, path_and_query: &str) -> String {
        let base = self.target.as_str().trim_end_matches('/');
        let path = path_and_query.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, request: &ProxyRequest) -> Result<ProxyResponse, ForwardError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ForwardError::InvalidRequest(format!("method {}", request.method)))?;
        let url = self.target_url(&request.path_and_query);
        info!("Sending {} request to backend server {}", method, url);
        let start_time = std::time::Instant::now();

        let mut builder = self.client.request(method, &url);
        let mut forwarded_for = None;
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case("x-forwarded-for") {
                forwarded_for = Some(value.as_slice());
                continue;
            }
            if is_hop_by_hop(name) || name.eq_ignore_ascii_case("host") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_slice());
        }
        if let Some(value) = x_forwarded_for(forwarded_for, request.client_addr.as_deref()) {
            builder = builder.header("x-forwarded-for", value);
        }

        let response = builder.body(request.body.clone()).send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        let body = response.bytes().await?;

        let elapsed_time_ms = start_time.elapsed().as_millis();
        debug!("sending request to backend took {}ms", elapsed_time_ms);

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

/// Appends the client address to the X-Forwarded-For header received from the client, if any.
fn x_forwarded_for(existing: Option<&[u8]>, client_addr: Option<&str>) -> Option<Vec<u8>> {
    match (existing, client_addr) {
        (Some(prior), Some(client)) => {
            let mut value = prior.to_vec();
            value.extend_from_slice(b", ");
            value.extend_from_slice(client.as_bytes());
            Some(value)
        }
        (Some(prior), None) => Some(prior.to_vec()),
        (None, Some(client)) => Some(client.as_bytes().to_vec()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarder(target: &str) -> HttpForwarder {
        let client = Client::builder().no_proxy().build().unwrap();
        HttpForwarder::new(Url::parse(target).unwrap(), client)
    }

    #[test]
    fn test_target_url() {
        let f = forwarder("http://localhost:8081");
        assert_eq!(f.target_url("/"), "http://localhost:8081/");
        assert_eq!(f.target_url("/a/b?c=d"), "http://localhost:8081/a/b?c=d");
    }

    #[test]
    fn test_target_url_with_base_path() {
        let f = forwarder("http://localhost:8081/api/");
        assert_eq!(f.target_url("/users?id=1"), "http://localhost:8081/api/users?id=1");
        assert_eq!(f.target_url("/"), "http://localhost:8081/api/");
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("x-request-id"));
    }

    #[test]
    fn test_x_forwarded_for() {
        assert_eq!(
            x_forwarded_for(Some(&b"10.0.0.1"[..]), Some("10.0.0.2")),
            Some(b"10.0.0.1, 10.0.0.2".to_vec())
        );
        assert_eq!(
            x_forwarded_for(None, Some("10.0.0.2")),
            Some(b"10.0.0.2".to_vec())
        );
        assert_eq!(x_forwarded_for(None, None), None);
    }

    #[tokio::test]
    async fn test_forward_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let f = forwarder(&format!("http://127.0.0.1:{}", port));
        let request = ProxyRequest {
            method: "GET".to_string(),
            path_and_query: "/".to_string(),
            ..Default::default()
        };

        let result = f.forward(&request).await;
        assert!(matches!(result, Err(ForwardError::Transport(_))));
    }

    #[tokio::test]
    async fn test_forward_invalid_method() {
        let f = forwarder("http://127.0.0.1:1");
        let request = ProxyRequest {
            method: "NOT A METHOD".to_string(),
            path_and_query: "/".to_string(),
            ..Default::default()
        };

        let result = f.forward(&request).await;
        assert!(matches!(result, Err(ForwardError::InvalidRequest(_))));
    }
}
