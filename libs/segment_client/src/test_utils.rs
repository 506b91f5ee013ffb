use crate::error::TransportError;
use crate::transport::{Transport, TransportRequest, TransportResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type Responder =
    Arc<dyn Fn(&TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync>;

/// A transport that records every request and answers with a scripted responder
pub struct MockTransport {
    responder: Responder,
    requests: Mutex<Vec<TransportRequest>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            responder: Arc::new(responder),
            requests: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    /// Answer every request with `200` and a fixed body
    pub fn with_body(body: impl Into<String>) -> Self {
        let body = body.into();
        Self::new(move |_| Ok(TransportResponse::ok(body.clone())))
    }

    /// Answer every lookup with `ok: true` for each requested segment
    pub fn members() -> Self {
        Self::new(|req| Ok(Self::all_members(req)))
    }

    /// Answer lookups by asking `is_member(identifier, segment_id)`
    pub fn members_where<F>(is_member: F) -> Self
    where
        F: Fn(&str, u32) -> bool + Send + Sync + 'static,
    {
        Self::new(move |req| {
            let identifier = requested_identifier(req).unwrap_or_default();
            Ok(Self::response_for(req, |segment_id| {
                json!({ "ok": is_member(&identifier, segment_id) })
            }))
        })
    }

    /// A `200` response marking every requested segment as a member
    pub fn all_members(request: &TransportRequest) -> TransportResponse {
        Self::response_for(request, |_| json!({ "ok": true }))
    }

    fn response_for(
        request: &TransportRequest,
        outcome: impl Fn(u32) -> Value,
    ) -> TransportResponse {
        let body: Map<String, Value> = request
            .query_values("segment_id")
            .into_iter()
            .filter_map(|id| id.parse::<u32>().ok())
            .map(|id| (id.to_string(), outcome(id)))
            .collect();
        TransportResponse::ok(Value::Object(body).to_string())
    }

    /// Delay every answer (drives deadline tests)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }
}

/// The identifier carried by a lookup request, whatever its kind
pub fn requested_identifier(request: &TransportRequest) -> Option<String> {
    crate::identifier::IdentifierType::ALL
        .into_iter()
        .find_map(|kind| request.query_values(kind.query_key()).first().map(|v| v.to_string()))
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("requests", &self.request_count())
            .field("latency", &self.latency)
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.requests.lock().push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.responder)(&request)
    }
}

/// A transport whose every call fails to connect
#[derive(Debug)]
pub struct FailingTransport {
    message: String,
}

impl FailingTransport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Transport for FailingTransport {
    async fn execute(
        &self,
        _request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        Err(TransportError::connect(self.message.clone()))
    }
}
