//! Call handle
//!
//! `HubClient::call` returns a [`Call`] right away. The call is already
//! registered in the pending table, so a reply that arrives before anyone
//! looks at the handle is buffered in its oneshot channel until `.done()` or
//! `.await` picks it up.
//!
//! ```ignore
//! client
//!     .call("ChatHub", "send", vec![json!("hello")])
//!     .timeout(Duration::from_secs(2))
//!     .finally(|| debug!("send settled"))
//!     .done(|reply| info!(?reply, "sent"), |e| warn!(error = %e, "send failed"));
//!
//! // or
//! let reply = client.call("ChatHub", "history", vec![]).await?;
//! ```
//!
//! Callbacks always run on a spawned task, never inside the caller's frame.

use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::IntoFuture;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::hooks::ErrorHandler;
use super::pending::{CallOutcome, PendingCallTable};
use crate::error::CallError;

type Finally = Box<dyn FnOnce() + Send>;

/// Deferred result of one hub call. Resolves exactly once.
#[must_use = "a call's outcome is only observed through done(), done_ok() or await"]
pub struct Call {
    id: u64,
    rx: oneshot::Receiver<CallOutcome>,
    pending: PendingCallTable,
    default_error_handler: ErrorHandler,
    finally: Vec<Finally>,
}

impl Call {
    pub(crate) fn new(
        id: u64,
        rx: oneshot::Receiver<CallOutcome>,
        pending: PendingCallTable,
        default_error_handler: ErrorHandler,
    ) -> Self {
        Self {
            id,
            rx,
            pending,
            default_error_handler,
            finally: Vec::new(),
        }
    }

    /// The call ID used on the wire.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Override this call's timeout. The deadline counts from when the call was made.
    ///
    /// Has no effect once the call has settled.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.pending.rearm(self.id, timeout);
        self
    }

    /// Run `f` after the success or error callback, whichever fires.
    pub fn finally<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.finally.push(Box::new(f));
        self
    }

    /// Attach success and error callbacks.
    pub fn done<S, E>(self, on_success: S, on_error: E) -> JoinHandle<()>
    where
        S: FnOnce(Value) + Send + 'static,
        E: FnOnce(CallError) + Send + 'static,
    {
        let Self { rx, finally, .. } = self;
        tokio::spawn(async move {
            match settle(rx).await {
                Ok(value) => on_success(value),
                Err(e) => on_error(e),
            }
            run_finally(finally);
        })
    }

    /// Attach a success callback; failures go to the client's default error handler.
    pub fn done_ok<S>(self, on_success: S) -> JoinHandle<()>
    where
        S: FnOnce(Value) + Send + 'static,
    {
        let handler = self.default_error_handler.clone();
        self.done(on_success, move |e| handler(&e))
    }
}

impl IntoFuture for Call {
    type Output = CallOutcome;
    type IntoFuture = BoxFuture<'static, CallOutcome>;

    fn into_future(self) -> Self::IntoFuture {
        let Self { rx, finally, .. } = self;
        Box::pin(async move {
            let outcome = settle(rx).await;
            run_finally(finally);
            outcome
        })
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("finally", &self.finally.len())
            .finish()
    }
}

async fn settle(rx: oneshot::Receiver<CallOutcome>) -> CallOutcome {
    rx.await.unwrap_or(Err(CallError::Abandoned))
}

fn run_finally(finally: Vec<Finally>) {
    for f in finally {
        f();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn make_call(table: &PendingCallTable, id: u64, timeout: Duration) -> Call {
        let rx = table.register(id, timeout);
        Call::new(id, rx, table.clone(), Arc::new(|_: &CallError| {}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_before_done_is_buffered() {
        let table = PendingCallTable::new();
        let call = make_call(&table, 1, Duration::from_secs(5));
        table.resolve_reply(1, true, json!("early"));

        let got = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&got);
        call.done(move |v| *slot.lock().unwrap() = Some(v), |_| panic!("unexpected error"))
            .await
            .unwrap();
        assert_eq!(*got.lock().unwrap(), Some(json!("early")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finally_runs_after_error() {
        let table = PendingCallTable::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&order), Arc::clone(&order));

        make_call(&table, 2, Duration::from_millis(10))
            .finally(move || a.lock().unwrap().push("finally"))
            .done(|_| panic!("unexpected success"), move |e| {
                assert_eq!(e, CallError::Timeout);
                b.lock().unwrap().push("error");
            })
            .await
            .unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["error", "finally"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_ok_routes_errors_to_default_handler() {
        let table = PendingCallTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let rx = table.register(3, Duration::from_secs(5));
        let call = Call::new(
            3,
            rx,
            table.clone(),
            Arc::new(move |e: &CallError| {
                assert_eq!(*e, CallError::Remote(json!("denied")));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        table.resolve_reply(3, false, json!("denied"));
        call.done_ok(|_| panic!("unexpected success")).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_with_finally() {
        let table = PendingCallTable::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        let call = make_call(&table, 4, Duration::from_secs(5))
            .finally(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            });
        table.resolve_reply(4, true, json!(10));
        assert_eq!(call.await, Ok(json!(10)));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_override() {
        let table = PendingCallTable::new();
        let start = tokio::time::Instant::now();
        let call = make_call(&table, 5, Duration::from_secs(5)).timeout(Duration::from_millis(200));
        assert_eq!(call.await, Err(CallError::Timeout));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
