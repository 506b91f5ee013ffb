//! Individual lookups and their write-once result cells

use crate::error::CheckError;
use crate::identifier::IdentifierType;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::time::Instant;

pub type CheckResult = Result<bool, CheckError>;

/// Writer half of a single check result
///
/// `resolve` consumes the slot, so a result can be written at most once. A slot
/// dropped without being resolved writes `CheckError::Shutdown` so the waiting
/// caller is never left hanging.
#[derive(Debug)]
pub struct ResultSlot {
    sender: Option<oneshot::Sender<CheckResult>>,
}

impl ResultSlot {
    /// Create a connected slot / pending-check pair
    pub fn channel() -> (ResultSlot, PendingCheck) {
        let (tx, rx) = oneshot::channel();
        (ResultSlot { sender: Some(tx) }, PendingCheck { receiver: rx })
    }

    /// Write the result; returns false if the caller stopped waiting
    pub fn resolve(mut self, result: CheckResult) -> bool {
        match self.sender.take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// True once the caller dropped its `PendingCheck`
    pub fn is_abandoned(&self) -> bool {
        self.sender.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl Drop for ResultSlot {
    fn drop(&mut self) {
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(Err(CheckError::Shutdown));
        }
    }
}

/// Reader half of a single check result
#[derive(Debug)]
#[must_use = "a pending check does nothing unless awaited"]
pub struct PendingCheck {
    receiver: oneshot::Receiver<CheckResult>,
}

impl Future for PendingCheck {
    type Output = CheckResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CheckError::Shutdown)))
    }
}

/// One admitted "is `identifier` in `segment_id`" question
#[derive(Debug)]
pub struct LookupTask {
    pub identifier: String,
    pub segment_id: u32,
    pub identifier_type: IdentifierType,
    pub admitted_at: Instant,
    slot: ResultSlot,
}

impl LookupTask {
    pub fn new(
        identifier: impl Into<String>,
        segment_id: u32,
        identifier_type: IdentifierType,
    ) -> (Self, PendingCheck) {
        let (slot, pending) = ResultSlot::channel();
        let task = Self {
            identifier: identifier.into(),
            segment_id,
            identifier_type,
            admitted_at: Instant::now(),
            slot,
        };
        (task, pending)
    }

    /// Resolve the caller's pending check, consuming the task
    pub fn resolve(self, result: CheckResult) -> bool {
        self.slot.resolve(result)
    }

    pub fn is_abandoned(&self) -> bool {
        self.slot.is_abandoned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_delivers_value() {
        let (task, pending) = LookupTask::new("uid", 7, IdentifierType::DeviceId);
        assert!(task.resolve(Ok(true)));
        assert_eq!(pending.await, Ok(true));
    }

    #[tokio::test]
    async fn test_dropped_slot_resolves_with_shutdown() {
        let (task, pending) = LookupTask::new("uid", 7, IdentifierType::DeviceId);
        drop(task);
        assert_eq!(pending.await, Err(CheckError::Shutdown));
    }

    #[tokio::test]
    async fn test_abandoned_caller() {
        let (task, pending) = LookupTask::new("uid", 7, IdentifierType::Otp);
        assert!(!task.is_abandoned());
        drop(pending);
        assert!(task.is_abandoned());
        assert!(!task.resolve(Ok(false)));
    }
}
