//! The coalescing engine: queue, flush coordinator and processor wired together

use crate::config::BatchConfig;
use crate::error::{AdmissionError, CheckError};
use crate::identifier::IdentifierType;
use crate::metrics::{EngineStats, FlushTrigger, StatsSnapshot};
use crate::processor::BatchProcessor;
use crate::queue::{Admission, BatchQueue};
use crate::scheduler::FlushScheduler;
use crate::task::{LookupTask, PendingCheck};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Accepts individual lookups and answers them through coalesced requests
///
/// Must be started inside a tokio runtime. Lookups still queued when the
/// batcher is shut down (or dropped) resolve with `CheckError::Shutdown`.
#[derive(Debug)]
pub struct Batcher {
    queue: Arc<BatchQueue>,
    processor: Arc<BatchProcessor>,
    stats: Arc<EngineStats>,
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl Batcher {
    pub fn start(config: &BatchConfig, deadline: Duration, transport: Arc<dyn Transport>) -> Self {
        let stats = Arc::new(EngineStats::new());
        let queue = Arc::new(BatchQueue::new(config.max_batch_size, config.queue_capacity));
        let processor = Arc::new(BatchProcessor::new(
            transport,
            deadline,
            config.max_concurrency,
            Arc::clone(&stats),
        ));
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = FlushScheduler::new(
            Arc::clone(&queue),
            Arc::clone(&processor),
            Arc::clone(&stats),
            config.max_batch_delay(),
            Arc::clone(&wake),
            shutdown_rx,
        );
        let coordinator = tokio::spawn(scheduler.run());

        Self {
            queue,
            processor,
            stats,
            wake,
            shutdown_tx,
            coordinator: Mutex::new(Some(coordinator)),
        }
    }

    /// Admit one lookup without waiting for its result
    pub fn enqueue(
        &self,
        identifier: impl Into<String>,
        segment_id: u32,
        identifier_type: IdentifierType,
    ) -> Result<PendingCheck, CheckError> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            self.stats.record_rejected();
            return Err(AdmissionError::EmptyIdentifier.into());
        }

        let (task, pending) = LookupTask::new(identifier, segment_id, identifier_type);
        match self.queue.push(task) {
            Err(_closed) => return Err(CheckError::Shutdown),
            Ok(Admission::Opened) | Ok(Admission::BatchReady) => self.wake.notify_one(),
            Ok(Admission::Queued) => {}
            Ok(Admission::Forced(batches)) => {
                warn!(
                    capacity = self.queue.capacity(),
                    batches = batches.len(),
                    "Queue at capacity, forcing flush"
                );
                for batch in batches {
                    self.stats.record_flush(FlushTrigger::Forced);
                    debug!(trigger = FlushTrigger::Forced.name(), size = batch.len(), "Flushing batch");
                    self.processor.spawn(batch);
                }
            }
        }

        self.stats.record_admitted();
        Ok(pending)
    }

    /// Check whether `identifier` belongs to `segment_id`
    pub async fn check(
        &self,
        identifier: impl Into<String>,
        segment_id: u32,
        identifier_type: IdentifierType,
    ) -> Result<bool, CheckError> {
        self.enqueue(identifier, segment_id, identifier_type)?.await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Lookups admitted but not yet flushed
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.queue.is_closed()
    }

    /// Stop admitting, fail everything still queued, stop the coordinator
    ///
    /// Requests already sent finish normally under their deadline.
    pub async fn shutdown(&self) {
        let drained = self.queue.close();
        if !drained.is_empty() {
            info!(pending = drained.len(), "Failing queued lookups on shutdown");
        }
        for task in drained {
            self.stats.record_resolution(false);
            task.resolve(Err(CheckError::Shutdown));
        }

        self.shutdown_tx.send_replace(true);
        let coordinator = self.coordinator.lock().take();
        if let Some(handle) = coordinator {
            if let Err(e) = handle.await {
                warn!(error = %e, "Flush coordinator ended abnormally");
            }
        }
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        // dropped slots resolve their callers with Shutdown
        drop(self.queue.close());
        if let Some(handle) = self.coordinator.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransport;

    fn batcher(transport: Arc<MockTransport>, size: usize, delay_ms: u64) -> Batcher {
        Batcher::start(
            &BatchConfig::new(size, Duration::from_millis(delay_ms)),
            Duration::from_secs(1),
            transport,
        )
    }

    #[tokio::test]
    async fn test_empty_identifier_rejected() {
        let b = batcher(Arc::new(MockTransport::members()), 10, 50);
        let result = b.enqueue("", 1, IdentifierType::DeviceId);
        assert!(matches!(
            result,
            Err(CheckError::Admission(AdmissionError::EmptyIdentifier))
        ));
        assert_eq!(b.stats().tasks_rejected, 1);
        assert_eq!(b.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_check_flushes_after_delay() {
        let transport = Arc::new(MockTransport::members());
        let b = batcher(Arc::clone(&transport), 10, 50);

        let start = tokio::time::Instant::now();
        assert_eq!(b.check("u", 3, IdentifierType::Otp).await, Ok(true));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(transport.request_count(), 1);
        assert_eq!(b.stats().flushes_by_timer, 1);
    }

    #[tokio::test]
    async fn test_admission_after_shutdown() {
        let b = batcher(Arc::new(MockTransport::members()), 10, 50);
        b.shutdown().await;
        assert!(b.is_shut_down());
        assert_eq!(
            b.check("u", 1, IdentifierType::DeviceId).await,
            Err(CheckError::Shutdown)
        );
        // second shutdown is a no-op
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_forced_flush_from_plain_thread() {
        let transport = Arc::new(MockTransport::members());
        let b = Arc::new(Batcher::start(
            &BatchConfig::new(2, Duration::from_secs(60)).with_queue_capacity(2),
            Duration::from_secs(1),
            transport.clone(),
        ));

        let producer = Arc::clone(&b);
        let pending = std::thread::spawn(move || {
            vec![
                producer.enqueue("a", 1, IdentifierType::DeviceId).unwrap(),
                producer.enqueue("b", 2, IdentifierType::DeviceId).unwrap(),
            ]
        })
        .join()
        .unwrap();

        for p in pending {
            assert_eq!(p.await, Ok(true));
        }
        assert_eq!(b.stats().flushes_forced, 1);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_drop_resolves_pending() {
        let b = batcher(Arc::new(MockTransport::members()), 10, 60_000);
        let pending = b.enqueue("u", 1, IdentifierType::DeviceId).unwrap();
        drop(b);
        assert_eq!(pending.await, Err(CheckError::Shutdown));
    }
}
