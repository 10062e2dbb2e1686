//! Message Router
//!
//! Decodes each inbound frame and sends it one of two ways:
//!
//! - **Reply** → pending call table, matched by ID (arrival order is irrelevant)
//! - **Invocation** → the hub's dispatch queue, which runs client handlers in
//!   the order the server emitted them
//!
//! One dispatch worker per hub keeps a slow handler on one hub from holding
//! up replies or pushes for the others. Bad frames and unroutable pushes go
//! to the diagnostic hooks; nothing here tears down the connection. A
//! panicking handler is reported as a handler error and its worker keeps going.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

use super::hooks::Hooks;
use super::pending::PendingCallTable;
use super::protocol::{decode_inbound, Codec, Inbound, InvocationEnvelope};
use super::registry::HubRegistry;
use crate::error::HubError;

pub struct MessageRouter {
    codec: Arc<dyn Codec>,
    pending: PendingCallTable,
    registry: Arc<HubRegistry>,
    hooks: Hooks,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<InvocationEnvelope>>>,
}

impl MessageRouter {
    pub fn new(
        codec: Arc<dyn Codec>,
        pending: PendingCallTable,
        registry: Arc<HubRegistry>,
        hooks: Hooks,
    ) -> Self {
        Self {
            codec,
            pending,
            registry,
            hooks,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Route one frame. Must be called from within a tokio runtime.
    pub fn route(&self, bytes: &[u8]) {
        match decode_inbound(self.codec.as_ref(), bytes) {
            Ok(Inbound::Reply(reply)) => {
                let id = reply.id;
                if !self
                    .pending
                    .resolve_reply(reply.id, reply.success, reply.payload)
                {
                    debug!(id = id, "Dropping reply for a call that already settled");
                }
            }
            Ok(Inbound::Invocation(invocation)) => self.dispatch(invocation),
            Err(e) => (self.hooks.on_message_error)(&e),
        }
    }

    fn dispatch(&self, invocation: InvocationEnvelope) {
        if !self.registry.contains_hub(&invocation.hub) {
            (self.hooks.on_client_function_not_found)(&invocation.hub, &invocation.function);
            return;
        }

        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = queues
            .entry(invocation.hub.clone())
            .or_insert_with_key(|hub| self.spawn_worker(hub));
        // Workers only stop when the runtime shuts down.
        if let Err(mpsc::error::SendError(invocation)) = tx.send(invocation) {
            drop(queues);
            (self.hooks.on_message_error)(&HubError::Handler {
                hub: invocation.hub,
                function: invocation.function,
                message: "dispatch worker stopped".to_string(),
            });
        }
    }

    fn spawn_worker(&self, hub: &str) -> mpsc::UnboundedSender<InvocationEnvelope> {
        let (tx, mut rx) = mpsc::unbounded_channel::<InvocationEnvelope>();
        let registry = Arc::clone(&self.registry);
        let hooks = self.hooks.clone();
        let hub = hub.to_string();

        tokio::spawn(async move {
            debug!(hub = %hub, "Hub dispatch worker started");
            while let Some(invocation) = rx.recv().await {
                invoke(&registry, &hooks, invocation);
            }
            debug!(hub = %hub, "Hub dispatch worker ended");
        });

        tx
    }
}

fn invoke(registry: &HubRegistry, hooks: &Hooks, invocation: InvocationEnvelope) {
    let InvocationEnvelope {
        hub,
        function,
        args,
    } = invocation;

    match registry.handler(&hub, &function) {
        Some(handler) => {
            debug!(hub = %hub, function = %function, "Invoking client handler");
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(args)))
                .unwrap_or_else(|payload| {
                    Err(HubError::Handler {
                        hub: hub.clone(),
                        function: function.clone(),
                        message: format!("handler panicked: {}", panic_message(payload.as_ref())),
                    })
                });
            if let Err(e) = result {
                (hooks.on_message_error)(&e);
            }
        }
        None => (hooks.on_client_function_not_found)(&hub, &function),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
