//! Counters for the coalescing engine

use std::sync::atomic::{AtomicU64, Ordering};

/// Why a batch left the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Queue reached `max_batch_size`
    Size,
    /// Oldest lookup waited `max_batch_delay`
    Timer,
    /// Queue reached `queue_capacity` during admission
    Forced,
}

impl FlushTrigger {
    pub fn name(self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Forced => "forced",
        }
    }
}

/// Live engine counters, shared between callers, coordinator and processor
#[derive(Debug, Default)]
pub struct EngineStats {
    tasks_admitted: AtomicU64,
    tasks_rejected: AtomicU64,
    flushes_by_size: AtomicU64,
    flushes_by_timer: AtomicU64,
    flushes_forced: AtomicU64,
    groups_dispatched: AtomicU64,
    groups_failed: AtomicU64,
    tasks_dispatched: AtomicU64,
    tasks_abandoned: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub tasks_admitted: u64,
    pub tasks_rejected: u64,
    pub flushes_by_size: u64,
    pub flushes_by_timer: u64,
    pub flushes_forced: u64,
    pub groups_dispatched: u64,
    pub groups_failed: u64,
    /// Lookups carried by dispatched groups
    pub tasks_dispatched: u64,
    /// Lookups whose callers all went away before dispatch; also counted failed
    pub tasks_abandoned: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
}

impl StatsSnapshot {
    pub fn total_flushes(&self) -> u64 {
        self.flushes_by_size + self.flushes_by_timer + self.flushes_forced
    }

    pub fn tasks_resolved(&self) -> u64 {
        self.tasks_succeeded + self.tasks_failed
    }

    /// Average lookups carried per outbound request
    pub fn coalescing_ratio(&self) -> f64 {
        if self.groups_dispatched == 0 {
            return 0.0;
        }
        self.tasks_dispatched as f64 / self.groups_dispatched as f64
    }
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.tasks_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, trigger: FlushTrigger) {
        let counter = match trigger {
            FlushTrigger::Size => &self.flushes_by_size,
            FlushTrigger::Timer => &self.flushes_by_timer,
            FlushTrigger::Forced => &self.flushes_forced,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_group(&self, tasks: usize, failed: bool) {
        self.groups_dispatched.fetch_add(1, Ordering::Relaxed);
        self.tasks_dispatched.fetch_add(tasks as u64, Ordering::Relaxed);
        if failed {
            self.groups_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A group dropped before dispatch because nobody waits for it
    pub fn record_abandoned(&self, tasks: usize) {
        self.tasks_abandoned.fetch_add(tasks as u64, Ordering::Relaxed);
        self.tasks_failed.fetch_add(tasks as u64, Ordering::Relaxed);
    }

    pub fn record_resolution(&self, ok: bool) {
        if ok {
            self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_admitted: self.tasks_admitted.load(Ordering::Relaxed),
            tasks_rejected: self.tasks_rejected.load(Ordering::Relaxed),
            flushes_by_size: self.flushes_by_size.load(Ordering::Relaxed),
            flushes_by_timer: self.flushes_by_timer.load(Ordering::Relaxed),
            flushes_forced: self.flushes_forced.load(Ordering::Relaxed),
            groups_dispatched: self.groups_dispatched.load(Ordering::Relaxed),
            groups_failed: self.groups_failed.load(Ordering::Relaxed),
            tasks_dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
            tasks_abandoned: self.tasks_abandoned.load(Ordering::Relaxed),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
        }
    }
}
