//! Outbound request/response exchange with the lookup service
//!
//! The engine only needs "send this request, give me status and body". The
//! [`Transport`] trait captures that so the coalescing logic can be driven by the
//! reqwest-backed [`HttpTransport`] in production and by recording doubles in
//! tests.

use crate::config::ClientConfig;
use crate::error::{ClientError, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt::Debug;
use std::time::Duration;
use tracing::trace;
use url::Url;

/// Everything except RFC 3986 unreserved characters is escaped
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// One outbound call, independent of any HTTP library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: Method,
    /// Absolute path, e.g. `/segment/touch-multi`
    pub path: String,
    /// Query pairs in send order; repeated keys are allowed
    pub query: Vec<(String, String)>,
    pub body: Bytes,
    pub deadline: Duration,
}

impl TransportRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: Bytes::new(),
            deadline: Duration::from_secs(3),
        }
    }

    pub fn post(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::Post,
            body: body.into(),
            ..Self::get(path)
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Percent-encoded query string without the leading `?`
    ///
    /// A space becomes `%20`, never `+`.
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(key, QUERY_ESCAPE),
                    utf8_percent_encode(value, QUERY_ESCAPE)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string())
        }
    }

    /// All values sent under `key`, in order
    pub fn query_values(&self, key: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Raw answer from the lookup service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs one request/response exchange; shared across concurrent dispatches
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn execute(&self, request: TransportRequest)
        -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport with a pooled client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base_url = config.base_url()?;
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.http.pool_max_idle_per_host)
            .pool_idle_timeout(config.http.pool_idle_timeout())
            .connect_timeout(config.http.connect_timeout())
            .tcp_nodelay(config.http.tcp_nodelay)
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    /// Full URL for a request, keeping any path prefix of the base URL
    pub fn url_for(&self, request: &TransportRequest) -> Url {
        let mut url = self.base_url.clone();
        let path = format!(
            "{}{}",
            self.base_url.path().trim_end_matches('/'),
            request.path
        );
        url.set_path(&path);
        if request.query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&request.query_string()));
        }
        url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.url_for(&request);
        let deadline = request.deadline;
        trace!(method = request.method.as_str(), %url, "Sending request");

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        }
        .timeout(deadline);

        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let timeout_aware = |err: reqwest::Error| {
            if err.is_timeout() {
                TransportError::Timeout(deadline)
            } else {
                TransportError::from(err)
            }
        };

        let response = builder.send().await.map_err(timeout_aware)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(timeout_aware)?;

        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_encodes_and_repeats() {
        let request = TransportRequest::get("/segment/touch-multi")
            .with_query("segment_id", "1")
            .with_query("segment_id", "2")
            .with_query("partner_uid", "a+b/c=d e");

        assert_eq!(
            request.query_string(),
            "segment_id=1&segment_id=2&partner_uid=a%2Bb%2Fc%3Dd%20e"
        );
        assert_eq!(request.query_values("segment_id"), vec!["1", "2"]);
    }

    #[test]
    fn test_query_string_keeps_unreserved() {
        let request = TransportRequest::get("/segment/touch-multi")
            .with_query("external_uid", "Ab9-._~ é");
        assert_eq!(request.query_string(), "external_uid=Ab9-._~%20%C3%A9");
    }

    #[test]
    fn test_url_keeps_base_prefix() {
        let config = ClientConfig::default().with_base_url("http://localhost:8080/api/");
        let transport = HttpTransport::new(&config).unwrap();

        let request = TransportRequest::get("/segment/touch-multi").with_query("otp", "x");
        assert_eq!(
            transport.url_for(&request).as_str(),
            "http://localhost:8080/api/segment/touch-multi?otp=x"
        );

        let spaced = TransportRequest::get("/segment/touch-multi").with_query("otp", "a b");
        assert_eq!(
            transport.url_for(&spaced).query(),
            Some("otp=a%20b")
        );
    }

    #[test]
    fn test_success_range() {
        assert!(TransportResponse::ok("{}").is_success());
        assert!(TransportResponse::new(204, "").is_success());
        assert!(!TransportResponse::new(301, "").is_success());
        assert!(!TransportResponse::new(500, "").is_success());
    }
}
