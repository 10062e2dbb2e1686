//! Pending Call Table
//!
//! Single responsibility: Correlate call IDs with the handles awaiting their outcome.
//!
//! # Exactly-once Resolution
//!
//! Replies, timeouts and disconnect failures all race for the same entry.
//! Every path first *claims* the entry (remove under the lock) and only then
//! delivers the outcome, so whichever path claims first wins and every other
//! path finds nothing and does nothing.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CallError;

/// What a call eventually resolves to.
pub type CallOutcome = Result<Value, CallError>;

struct PendingEntry {
    tx: oneshot::Sender<CallOutcome>,
    timer: AbortHandle,
    registered_at: Instant,
}

/// Concurrency-safe map of in-flight calls. Cheap to clone.
#[derive(Clone, Default)]
pub struct PendingCallTable {
    entries: Arc<Mutex<HashMap<u64, PendingEntry>>>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and start its timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&self, id: u64, timeout: Duration) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        let registered_at = Instant::now();

        // Spawn under the lock so a zero timeout cannot fire before the insert.
        let previous = {
            let mut entries = self.lock();
            let timer = self.spawn_timer(id, deadline(registered_at, timeout));
            entries.insert(
                id,
                PendingEntry {
                    tx,
                    timer,
                    registered_at,
                },
            )
        };
        if let Some(previous) = previous {
            // IDs are never reused; a collision means a caller bypassed the client.
            previous.timer.abort();
            let _ = previous
                .tx
                .send(Err(CallError::Encode(format!("call id {} reused", id))));
        }

        debug!(id = id, timeout_ms = timeout.as_millis() as u64, "Registered pending call");
        rx
    }

    /// Deliver an outcome. Returns false if the call was already resolved or evicted.
    pub fn resolve(&self, id: u64, outcome: CallOutcome) -> bool {
        let Some(entry) = self.claim(id) else {
            debug!(id = id, "Ignoring outcome for unknown or settled call");
            return false;
        };

        entry.timer.abort();
        // The handle may have been dropped without anyone listening; that is fine.
        let _ = entry.tx.send(outcome);
        true
    }

    /// Deliver a reply from the server.
    pub fn resolve_reply(&self, id: u64, success: bool, payload: Value) -> bool {
        let outcome = if success {
            Ok(payload)
        } else {
            Err(CallError::Remote(payload))
        };
        self.resolve(id, outcome)
    }

    /// Move a call's deadline to `registered_at + timeout`.
    pub fn rearm(&self, id: u64, timeout: Duration) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        entry.timer.abort();
        entry.timer = self.spawn_timer(id, deadline(entry.registered_at, timeout));
        true
    }

    /// Fail every pending call. Returns how many were failed.
    pub fn fail_all(&self, error: CallError) -> usize {
        let drained: Vec<(u64, PendingEntry)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            debug!(id = id, error = %error, "Failing pending call");
            entry.timer.abort();
            let _ = entry.tx.send(Err(error.clone()));
        }
        count
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Atomic check-and-remove.
    fn claim(&self, id: u64) -> Option<PendingEntry> {
        self.lock().remove(&id)
    }

    fn spawn_timer(&self, id: u64, deadline: Instant) -> AbortHandle {
        let table = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if table.resolve(id, Err(CallError::Timeout)) {
                debug!(id = id, "Call timed out");
            }
        })
        .abort_handle()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Saturates instead of overflowing `Instant` for very long timeouts.
fn deadline(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_reply_resolves_once() {
        let table = PendingCallTable::new();
        let rx = table.register(1, Duration::from_secs(5));

        assert!(table.resolve_reply(1, true, json!("first")));
        assert!(!table.resolve_reply(1, true, json!("second")));
        assert!(!table.resolve_reply(1, false, json!("late error")));

        assert_eq!(rx.await.unwrap(), Ok(json!("first")));
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reply_carries_payload() {
        let table = PendingCallTable::new();
        let rx = table.register(9, Duration::from_secs(5));
        table.resolve_reply(9, false, json!({"reason": "denied"}));
        assert_eq!(
            rx.await.unwrap(),
            Err(CallError::Remote(json!({"reason": "denied"})))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_evicts_and_blocks_late_reply() {
        let table = PendingCallTable::new();
        let rx = table.register(2, Duration::from_millis(100));

        assert_eq!(rx.await.unwrap(), Err(CallError::Timeout));
        assert!(!table.contains(2));
        assert!(!table.resolve_reply(2, true, json!("too late")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_cancels_timer() {
        let table = PendingCallTable::new();
        let rx = table.register(3, Duration::from_millis(100));
        assert!(table.resolve_reply(3, true, json!(1)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rx.await.unwrap(), Ok(json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_counts_from_registration() {
        let table = PendingCallTable::new();
        let start = Instant::now();
        let rx = table.register(4, Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(table.rearm(4, Duration::from_millis(1000)));

        assert_eq!(rx.await.unwrap(), Err(CallError::Timeout));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(1050));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_all() {
        let table = PendingCallTable::new();
        let a = table.register(5, Duration::from_secs(5));
        let b = table.register(6, Duration::from_secs(5));

        assert_eq!(table.fail_all(CallError::Disconnected("gone".into())), 2);
        assert_eq!(a.await.unwrap(), Err(CallError::Disconnected("gone".into())));
        assert_eq!(b.await.unwrap(), Err(CallError::Disconnected("gone".into())));
        assert_eq!(table.fail_all(CallError::Timeout), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_does_not_overflow() {
        let table = PendingCallTable::new();
        let rx = table.register(7, Duration::MAX);

        tokio::time::sleep(Duration::from_secs(86_400)).await;
        assert!(table.contains(7));
        assert!(table.resolve_reply(7, true, json!("eventually")));
        assert_eq!(rx.await.unwrap(), Ok(json!("eventually")));
    }
}
