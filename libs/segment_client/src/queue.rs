//! Bounded FIFO of admitted, not-yet-flushed lookups
//!
//! The queue is the only state shared between producers and the flush
//! coordinator; every swap happens under its mutex so each task leaves in
//! exactly one batch.

use crate::task::LookupTask;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::time::Instant;

/// What an admission did to the queue
#[derive(Debug)]
pub enum Admission {
    /// First task after an empty queue; a new accumulation window opens
    Opened,
    /// Queue holds at least a full batch
    BatchReady,
    /// Appended to an open window
    Queued,
    /// Queue hit capacity and was emptied; the admitting caller dispatches these
    Forced(Vec<Vec<LookupTask>>),
}

#[derive(Debug)]
struct QueueState {
    tasks: VecDeque<LookupTask>,
    closed: bool,
}

#[derive(Debug)]
pub struct BatchQueue {
    state: Mutex<QueueState>,
    max_batch_size: usize,
    capacity: usize,
}

impl BatchQueue {
    pub fn new(max_batch_size: usize, capacity: usize) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            max_batch_size,
            capacity: capacity.max(max_batch_size),
        }
    }

    /// Admit a task; hands the task back if the queue is closed
    pub fn push(&self, task: LookupTask) -> Result<Admission, LookupTask> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(task);
        }

        state.tasks.push_back(task);
        let len = state.tasks.len();

        if len >= self.capacity {
            let drained: VecDeque<_> = std::mem::take(&mut state.tasks);
            return Ok(Admission::Forced(chunk(drained, self.max_batch_size)));
        }

        Ok(if len >= self.max_batch_size {
            Admission::BatchReady
        } else if len == 1 {
            Admission::Opened
        } else {
            Admission::Queued
        })
    }

    /// Remove up to one batch, oldest first
    pub fn take_batch(&self) -> Vec<LookupTask> {
        let mut state = self.state.lock();
        let n = state.tasks.len().min(self.max_batch_size);
        state.tasks.drain(..n).collect()
    }

    /// Admission time of the oldest queued task
    pub fn oldest_admitted(&self) -> Option<Instant> {
        self.state.lock().tasks.front().map(|task| task.admitted_at)
    }

    pub fn has_full_batch(&self) -> bool {
        self.state.lock().tasks.len() >= self.max_batch_size
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse further admissions and return everything still queued
    pub fn close(&self) -> Vec<LookupTask> {
        let mut state = self.state.lock();
        state.closed = true;
        state.tasks.drain(..).collect()
    }
}

fn chunk(mut tasks: VecDeque<LookupTask>, size: usize) -> Vec<Vec<LookupTask>> {
    let mut batches = Vec::with_capacity(tasks.len().div_ceil(size));
    while !tasks.is_empty() {
        let n = tasks.len().min(size);
        batches.push(tasks.drain(..n).collect());
    }
    batches
}
