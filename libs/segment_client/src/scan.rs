//! Bulk scan: share of a list of identifiers contained in a segment
//!
//! Scans are single request/response exchanges and bypass the batcher.

use crate::error::{ScanError, TransportError};
use crate::response::parse_intersection;
use crate::transport::{Transport, TransportRequest};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

pub const SCAN_PATH: &str = "/segment/scan";

/// Fewest identifiers a list scan accepts
pub const SCAN_MIN_IDENTIFIERS: usize = 100;

/// Separator between identifiers in a scan body
pub const SCAN_SEPARATOR: &str = ",\n";

#[derive(Debug, Clone)]
pub struct Scanner {
    transport: Arc<dyn Transport>,
    client_id: Option<u32>,
    deadline: Duration,
}

impl Scanner {
    pub fn new(transport: Arc<dyn Transport>, client_id: Option<u32>, deadline: Duration) -> Self {
        Self {
            transport,
            client_id,
            deadline,
        }
    }

    /// Scan a list of at least [`SCAN_MIN_IDENTIFIERS`] identifiers
    pub async fn scan<S: AsRef<str>>(
        &self,
        identifiers: &[S],
        segment_id: u32,
    ) -> Result<f32, ScanError> {
        if identifiers.len() < SCAN_MIN_IDENTIFIERS {
            return Err(ScanError::TooFewIdentifiers {
                got: identifiers.len(),
                min: SCAN_MIN_IDENTIFIERS,
            });
        }

        let parts: Vec<&str> = identifiers.iter().map(|s| s.as_ref()).collect();
        self.post(Bytes::from(parts.join(SCAN_SEPARATOR)), segment_id)
            .await
    }

    /// Scan a pre-joined body of identifiers separated by `",\n"`
    pub async fn scan_bytes(
        &self,
        body: impl Into<Bytes>,
        segment_id: u32,
    ) -> Result<f32, ScanError> {
        let body = body.into();
        let separators = body.iter().filter(|&&b| b == b',').count();
        if separators + 1 < SCAN_MIN_IDENTIFIERS {
            return Err(ScanError::TooFewIdentifiers {
                got: separators + 1,
                min: SCAN_MIN_IDENTIFIERS,
            });
        }
        self.post(body, segment_id).await
    }

    /// Scan identifiers read from a file, socket or any other stream
    pub async fn scan_reader<R>(&self, mut reader: R, segment_id: u32) -> Result<f32, ScanError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await?;
        self.post(Bytes::from(body), segment_id).await
    }

    async fn post(&self, body: Bytes, segment_id: u32) -> Result<f32, ScanError> {
        let mut request = TransportRequest::post(SCAN_PATH, body)
            .with_query("segment_id", segment_id.to_string())
            .with_deadline(self.deadline);
        if let Some(client_id) = self.client_id {
            request = request.with_query("client_id", client_id.to_string());
        }

        debug!(segment_id, bytes = request.body.len(), "Sending scan");
        let response = tokio::time::timeout(self.deadline, self.transport.execute(request))
            .await
            .map_err(|_| TransportError::Timeout(self.deadline))??;

        if !response.is_success() {
            return Err(ScanError::Status {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        parse_intersection(&response.body).map_err(ScanError::Parse)
    }
}
