use crate::batcher::Batcher;
use crate::config::ClientConfig;
use crate::error::{CheckError, ClientError, ScanError};
use crate::identifier::IdentifierType;
use crate::metrics::StatsSnapshot;
use crate::scan::Scanner;
use crate::task::PendingCheck;
use crate::transport::{HttpTransport, Transport};
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::info;

/// Client for the segment membership service
///
/// Membership checks go through the coalescing [`Batcher`]; scans are sent
/// directly. Create it inside a tokio runtime and call [`SegmentClient::shutdown`]
/// before exit so queued checks are answered.
#[derive(Debug)]
pub struct SegmentClient {
    config: ClientConfig,
    batcher: Batcher,
    scanner: Scanner,
}

impl SegmentClient {
    /// Build a client speaking HTTP to `config.base_url`
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Build a client over any transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let deadline = config.per_request_deadline();
        let batcher = Batcher::start(&config.batch, deadline, Arc::clone(&transport));
        let scanner = Scanner::new(transport, config.client_id, deadline);

        info!(
            base_url = %config.base_url,
            max_batch_size = config.batch.max_batch_size,
            max_batch_delay_ms = config.batch.max_batch_delay_ms,
            "Segment client started"
        );

        Self {
            config,
            batcher,
            scanner,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Check whether `identifier` belongs to `segment_id`
    pub async fn check(
        &self,
        identifier: impl Into<String>,
        segment_id: u32,
        identifier_type: IdentifierType,
    ) -> Result<bool, CheckError> {
        self.batcher.check(identifier, segment_id, identifier_type).await
    }

    /// Queue a check and return its pending result
    pub fn enqueue(
        &self,
        identifier: impl Into<String>,
        segment_id: u32,
        identifier_type: IdentifierType,
    ) -> Result<PendingCheck, CheckError> {
        self.batcher.enqueue(identifier, segment_id, identifier_type)
    }

    /// Share of `identifiers` contained in `segment_id`
    pub async fn scan<S: AsRef<str>>(
        &self,
        identifiers: &[S],
        segment_id: u32,
    ) -> Result<f32, ScanError> {
        self.scanner.scan(identifiers, segment_id).await
    }

    /// Like [`scan`](Self::scan) for a body already joined with `",\n"`
    pub async fn scan_bytes(
        &self,
        body: impl Into<Bytes>,
        segment_id: u32,
    ) -> Result<f32, ScanError> {
        self.scanner.scan_bytes(body, segment_id).await
    }

    /// Like [`scan`](Self::scan) for identifiers read from a stream
    pub async fn scan_reader<R>(&self, reader: R, segment_id: u32) -> Result<f32, ScanError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.scanner.scan_reader(reader, segment_id).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.batcher.stats()
    }

    pub async fn shutdown(&self) {
        self.batcher.shutdown().await;
        info!("Segment client shut down");
    }
}
