//! Hub RPC Module
//!
//! Client side of the hub protocol: method calls to named hubs on a server,
//! and server pushes into handlers the client registered, all over one
//! persistent WebSocket.
//!
//! # Architecture
//!
//! Each submodule has a single responsibility:
//!
//! | Module      | Responsibility                                         |
//! |-------------|--------------------------------------------------------|
//! | `transport` | WebSocket connect, frame sink/stream                   |
//! | `memory`    | In-process transport for tests and embedding           |
//! | `protocol`  | Envelopes, reply/invocation classification, codecs     |
//! | `pending`   | Outstanding calls by ID, timeouts, exactly-once settle |
//! | `call`      | The deferred result handed back to callers             |
//! | `router`    | Inbound frames → pending table or hub dispatch queues  |
//! | `registry`  | Hub definitions and client handler slots               |
//! | `hooks`     | Diagnostic callbacks with logging defaults             |
//! | `client`    | Connection state, outgoing queue, reconnection         |
//!
//! # Guarantees
//!
//! - Call IDs are unique and strictly increasing per client
//! - Every call settles exactly once: reply, timeout or failure
//! - No operation reports failure synchronously
//! - Calls made while connecting are sent in order once the link opens
//! - Invocations for one hub run in the order the server sent them
//!
//! # Usage
//!
//! ```ignore
//! use hub_client::hub::{HubClient, HubDefinition};
//!
//! let client = HubClient::builder()
//!     .url("ws://localhost:8888")
//!     .hub(HubDefinition::new("ChatHub")
//!         .server_methods(["send"])
//!         .client_methods(["onMessage"]))
//!     .build()?;
//!
//! client.on("ChatHub", "onMessage", |(who, text): (String, String)| {
//!     println!("{who}: {text}");
//! })?;
//! client.open();
//!
//! let reply = client.hub("ChatHub")?.call("send", vec![json!("hi")])?.await?;
//! ```

pub mod call;
pub mod client;
pub mod hooks;
pub mod memory;
pub mod protocol;
pub mod registry;
pub mod transport;

mod pending;
mod router;

pub use call::Call;
pub use client::{
    ConnectionState, HubClient, HubClientBuilder, HubProxy, ServerMethod, WeakHubClient,
};
pub use hooks::Hooks;
pub use pending::CallOutcome;
pub use protocol::{Codec, JsonCodec, MsgpackCodec};
pub use registry::{ClientHandler, HubDefinition, HubRegistry};
pub use transport::{Connector, Link, WsConnector};
