//! Diagnostic callbacks
//!
//! Every hook has a default that logs through `tracing`, so an application
//! that installs nothing still sees unroutable pushes, bad frames and
//! connection churn in its logs.

use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{CallError, HubError};

pub type OpenHook = Arc<dyn Fn() + Send + Sync>;
pub type CauseHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type MessageErrorHook = Arc<dyn Fn(&HubError) + Send + Sync>;
pub type NotFoundHook = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&CallError) + Send + Sync>;

#[derive(Clone)]
pub struct Hooks {
    pub on_open: OpenHook,
    pub on_close: CauseHook,
    pub on_reconnecting: CauseHook,
    pub on_message_error: MessageErrorHook,
    pub on_client_function_not_found: NotFoundHook,
    /// Used by `Call::done_ok` when the caller supplies no error handler.
    pub default_error_handler: ErrorHandler,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            on_open: Arc::new(|| info!("Hub connection open")),
            on_close: Arc::new(|cause: &str| warn!(cause = %cause, "Hub connection closed")),
            on_reconnecting: Arc::new(|cause: &str| {
                info!(cause = %cause, "Reconnecting to hub server")
            }),
            on_message_error: Arc::new(|e: &HubError| error!(error = %e, "Failed to handle inbound message")),
            on_client_function_not_found: Arc::new(|hub: &str, function: &str| {
                warn!(hub = %hub, function = %function, "No client handler for server push")
            }),
            default_error_handler: Arc::new(|e: &CallError| error!(error = %e, "Hub call failed")),
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}
