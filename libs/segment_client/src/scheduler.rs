//! Flush coordinator: size/delay race over the batch queue
//!
//! One background task owns the normal flush decisions. It sleeps until either
//! an admission signals a full batch or the oldest queued lookup has waited
//! `max_batch_delay`, whichever comes first, then swaps out at most one batch
//! and hands it to the processor without waiting for the network.

use crate::metrics::{EngineStats, FlushTrigger};
use crate::processor::BatchProcessor;
use crate::queue::BatchQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

enum Event {
    Shutdown,
    Admission,
    DelayElapsed,
}

pub struct FlushScheduler {
    queue: Arc<BatchQueue>,
    processor: Arc<BatchProcessor>,
    stats: Arc<EngineStats>,
    max_delay: Duration,
    wake: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
}

impl FlushScheduler {
    pub fn new(
        queue: Arc<BatchQueue>,
        processor: Arc<BatchProcessor>,
        stats: Arc<EngineStats>,
        max_delay: Duration,
        wake: Arc<Notify>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            processor,
            stats,
            max_delay,
            wake,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            max_batch_size = self.queue.max_batch_size(),
            max_delay_ms = self.max_delay.as_millis() as u64,
            "Flush coordinator started"
        );

        loop {
            while self.queue.has_full_batch() {
                self.flush(FlushTrigger::Size);
            }

            let deadline = self.queue.oldest_admitted().map(|t| t + self.max_delay);

            let event = tokio::select! {
                biased;
                // only ever set to true; a dropped sender also means stop
                _ = self.shutdown.changed() => Event::Shutdown,
                _ = self.wake.notified() => Event::Admission,
                _ = sleep_until_some(deadline) => Event::DelayElapsed,
            };

            match event {
                Event::Shutdown => break,
                Event::Admission => {}
                Event::DelayElapsed => self.flush(FlushTrigger::Timer),
            }
        }

        info!("Flush coordinator stopped");
    }

    fn flush(&self, trigger: FlushTrigger) {
        let batch = self.queue.take_batch();
        if batch.is_empty() {
            return;
        }

        self.stats.record_flush(trigger);
        debug!(trigger = trigger.name(), size = batch.len(), "Flushing batch");
        self.processor.spawn(batch);
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
