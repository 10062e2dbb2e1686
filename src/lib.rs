//! Hub Client - multiplexed RPC over one persistent WebSocket
//!
//! A client registers named hubs, each with server methods it may call and
//! client functions the server may push to. Calls return a [`hub::Call`]
//! that settles exactly once with the server's reply, a timeout, or a
//! connection failure. The connection reconnects on its own after a
//! configurable delay, queueing calls made while it is down.
//!
//! ## Configuration
//!
//! ```toml
//! url = "ws://localhost:8888"
//! call_timeout_ms = 5000
//! reconnect_timeout_seconds = 5   # -1 disables reconnection
//! disconnect_policy = "wait_for_timeout"
//! codec = "json"
//!
//! [[hubs]]
//! name = "ChatHub"
//! server_methods = ["send", "history"]
//! client_methods = ["onMessage"]
//! ```

pub mod config;
pub mod error;
pub mod hub;

// Re-exports
pub use config::{ClientConfig, CodecKind, DisconnectPolicy, HubConfig, ReconnectPolicy};
pub use error::{CallError, HubError};
pub use hub::{Call, ConnectionState, HubClient, HubDefinition, HubRegistry};
