//! Error types for hub-client

use serde_json::Value;
use thiserror::Error;

/// Operational errors raised by the client, its transports and codecs.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown hub: {0}")]
    UnknownHub(String),

    #[error("Hub {hub} has no server method {function}")]
    UnknownServerMethod { hub: String, function: String },

    #[error("Hub {hub} has no client function {function}")]
    UnknownClientFunction { hub: String, function: String },

    #[error("Handler {hub}.{function} failed: {message}")]
    Handler {
        hub: String,
        function: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome delivered to the error path of a single call.
///
/// `Timeout` and `NotConnected` render as the sentinel strings servers and
/// older clients of the hub protocol expect to see in logs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// The server answered with `success: false`; the payload is its error detail.
    #[error("{0}")]
    Remote(Value),

    #[error("timeOut Error")]
    Timeout,

    #[error("webSocket not connected")]
    NotConnected,

    /// The link dropped while the call was in flight (fail-fast policy only).
    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("failed to encode call: {0}")]
    Encode(String),

    /// The client went away before the call was resolved.
    #[error("call abandoned")]
    Abandoned,
}

impl CallError {
    /// The server-supplied payload, if this is a remote failure.
    pub fn remote_payload(&self) -> Option<&Value> {
        match self {
            Self::Remote(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sentinel_messages() {
        assert_eq!(CallError::Timeout.to_string(), "timeOut Error");
        assert_eq!(CallError::NotConnected.to_string(), "webSocket not connected");
    }

    #[test]
    fn test_remote_payload() {
        let err = CallError::Remote(json!("boom"));
        assert_eq!(err.remote_payload(), Some(&json!("boom")));
        assert_eq!(CallError::Timeout.remote_payload(), None);
    }
}
