//! Dispatch of flushed batches and fan-out of results
//!
//! A flushed batch is grouped by identifier, each group is sent as one request
//! and the single response is fanned back out to every member lookup.
//! Transport, status and parse failures are shared by the whole group; a
//! failed or missing segment only fails its own lookups.
//!
//! The per-request deadline starts when the batch is flushed and covers both
//! the wait for a concurrency permit and the call itself.

use crate::error::{CheckError, TransportError};
use crate::group::{group_tasks, RequestGroup};
use crate::metrics::EngineStats;
use crate::response::LookupResponse;
use crate::task::{CheckResult, LookupTask};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct BatchProcessor {
    transport: Arc<dyn Transport>,
    deadline: Duration,
    permits: Arc<Semaphore>,
    stats: Arc<EngineStats>,
    runtime: Handle,
}

impl BatchProcessor {
    /// Must be called inside a tokio runtime; batches are processed on it
    pub fn new(
        transport: Arc<dyn Transport>,
        deadline: Duration,
        max_concurrency: usize,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            transport,
            deadline,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            stats,
            runtime: Handle::current(),
        }
    }

    /// Process a flushed batch in the background
    ///
    /// Callable from any thread, including ones outside the runtime.
    pub fn spawn(self: &Arc<Self>, batch: Vec<LookupTask>) -> JoinHandle<()> {
        let processor = Arc::clone(self);
        self.runtime
            .spawn(async move { processor.process(batch).await })
    }

    /// Group, dispatch and resolve every task of `batch`
    pub async fn process(self: Arc<Self>, batch: Vec<LookupTask>) {
        let deadline_at = Instant::now() + self.deadline;
        let grouping = group_tasks(batch);

        for (task, err) in grouping.rejected {
            self.stats.record_rejected();
            debug!(identifier = %task.identifier, segment_id = task.segment_id, error = %err, "Lookup rejected");
            self.finish(task, Err(err.into()));
        }

        let handles: Vec<_> = grouping
            .groups
            .into_iter()
            .map(|group| {
                let processor = Arc::clone(&self);
                self.runtime
                    .spawn(async move { processor.dispatch(group, deadline_at).await })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Group dispatch task ended abnormally");
            }
        }
    }

    /// One outbound call for `group` finished by `deadline_at`, then fan-out
    pub async fn dispatch(&self, group: RequestGroup, deadline_at: Instant) {
        if group.tasks().iter().all(LookupTask::is_abandoned) {
            debug!(identifier = %group.identifier, "Every caller gone, skipping lookup");
            self.stats.record_abandoned(group.len());
            return;
        }

        let response = match tokio::time::timeout_at(deadline_at, self.send(&group, deadline_at)).await
        {
            Ok(response) => response,
            Err(_) => Err(CheckError::Transport(TransportError::Timeout(self.deadline))),
        };

        match response {
            Ok(response) => {
                self.stats.record_group(group.len(), false);
                for task in group.into_tasks() {
                    let result = response.result_for(task.segment_id);
                    if let Err(e) = &result {
                        debug!(identifier = %task.identifier, segment_id = task.segment_id, error = %e, "Lookup failed");
                    }
                    self.finish(task, result);
                }
            }
            Err(err) => {
                warn!(
                    identifier = %group.identifier,
                    lookups = group.len(),
                    error = %err,
                    "Lookup request failed for whole group"
                );
                self.stats.record_group(group.len(), true);
                self.fail_group(group, err);
            }
        }
    }

    async fn send(
        &self,
        group: &RequestGroup,
        deadline_at: Instant,
    ) -> Result<LookupResponse, CheckError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CheckError::Shutdown)?;

        let request = group.to_request(deadline_at.saturating_duration_since(Instant::now()));
        debug!(
            identifier = %group.identifier,
            segments = group.segment_ids().len(),
            lookups = group.len(),
            "Dispatching lookup"
        );

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(CheckError::status(response.status, &response.body));
        }
        LookupResponse::parse(&response.body)
    }

    fn fail_group(&self, group: RequestGroup, err: CheckError) {
        for task in group.into_tasks() {
            self.finish(task, Err(err.clone()));
        }
    }

    fn finish(&self, task: LookupTask, result: CheckResult) {
        self.stats.record_resolution(result.is_ok());
        task.resolve(result);
    }
}
