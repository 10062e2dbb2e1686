//! Hub Wire Protocol
//!
//! Single responsibility: Shape and classify hub envelopes, and turn them into bytes.
//!
//! # Wire Format
//!
//! Envelopes are plain maps. The codec (JSON or MessagePack) decides the bytes.
//!
//! ## Call (client → server)
//! ```text
//! { "hub": <string>, "function": <string>, "args": [...], "ID": <u64> }
//! ```
//!
//! ## Reply (server → client)
//! ```text
//! { "ID": <u64>, "success": <bool>, "replay": <result or error detail> }
//! ```
//!
//! ## Invocation (server → client push)
//! ```text
//! { "hub": <string>, "function": <string>, "args": [...] }
//! ```
//!
//! A frame is a reply when it carries both `ID` and `replay`. Anything else
//! naming a hub and a function is an invocation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CodecKind;
use crate::error::HubError;

/// An outgoing call. Only the ID survives once it is encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub hub: String,
    pub function: String,
    pub args: Vec<Value>,
    #[serde(rename = "ID")]
    pub id: u64,
}

/// The server's answer to a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    #[serde(rename = "ID")]
    pub id: u64,
    pub success: bool,
    #[serde(rename = "replay")]
    pub payload: Value,
}

/// A server push addressed to a client handler slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    pub hub: String,
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reply(ReplyEnvelope),
    Invocation(InvocationEnvelope),
}

impl Inbound {
    /// Classify a decoded frame.
    pub fn classify(value: Value) -> Result<Self, HubError> {
        let map = value
            .as_object()
            .ok_or_else(|| HubError::Protocol("Message is not a map".into()))?;

        if map.contains_key("ID") && map.contains_key("replay") {
            let reply = serde_json::from_value(value)
                .map_err(|e| HubError::Protocol(format!("Malformed reply: {}", e)))?;
            return Ok(Self::Reply(reply));
        }

        if map.contains_key("hub") && map.contains_key("function") {
            let invocation = serde_json::from_value(value)
                .map_err(|e| HubError::Protocol(format!("Malformed invocation: {}", e)))?;
            return Ok(Self::Invocation(invocation));
        }

        Err(HubError::Protocol(
            "Message is neither a reply nor an invocation".into(),
        ))
    }
}

/// Opaque serializer for structured messages.
pub trait Codec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, HubError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, HubError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, HubError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, HubError> {
        serde_json::from_slice(bytes)
            .map_err(|e| HubError::Protocol(format!("Failed to decode JSON frame: {}", e)))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// MessagePack with named map keys, so envelopes keep their field names.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, HubError> {
        rmp_serde::to_vec_named(value)
            .map_err(|e| HubError::Protocol(format!("Failed to encode msgpack frame: {}", e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, HubError> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| HubError::Protocol(format!("Failed to decode msgpack frame: {}", e)))
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }
}

impl CodecKind {
    pub fn codec(self) -> std::sync::Arc<dyn Codec> {
        match self {
            Self::Json => std::sync::Arc::new(JsonCodec),
            Self::Msgpack => std::sync::Arc::new(MsgpackCodec),
        }
    }
}

/// Encode a call into wire bytes.
pub fn encode_call(codec: &dyn Codec, call: &CallEnvelope) -> Result<Vec<u8>, HubError> {
    let value = serde_json::to_value(call)?;
    codec.encode(&value)
}

/// Decode and classify inbound wire bytes.
pub fn decode_inbound(codec: &dyn Codec, bytes: &[u8]) -> Result<Inbound, HubError> {
    Inbound::classify(codec.decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_envelope_field_names() {
        let call = CallEnvelope {
            hub: "ChatHub".into(),
            function: "send".into(),
            args: vec![json!("hi"), json!(2)],
            id: 7,
        };
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(
            value,
            json!({"hub": "ChatHub", "function": "send", "args": ["hi", 2], "ID": 7})
        );
    }

    #[test]
    fn test_classify_reply() {
        let inbound =
            Inbound::classify(json!({"ID": 3, "success": false, "replay": "nope"})).unwrap();
        assert_eq!(
            inbound,
            Inbound::Reply(ReplyEnvelope {
                id: 3,
                success: false,
                payload: json!("nope"),
            })
        );
    }

    #[test]
    fn test_classify_reply_with_null_payload() {
        let inbound = Inbound::classify(json!({"ID": 1, "success": true, "replay": null})).unwrap();
        assert!(matches!(inbound, Inbound::Reply(r) if r.payload.is_null()));
    }

    #[test]
    fn test_classify_invocation_without_id() {
        let inbound =
            Inbound::classify(json!({"hub": "ChatHub", "function": "onMessage", "args": [1]}))
                .unwrap();
        match inbound {
            Inbound::Invocation(inv) => {
                assert_eq!(inv.hub, "ChatHub");
                assert_eq!(inv.function, "onMessage");
                assert_eq!(inv.args, vec![json!(1)]);
            }
            other => panic!("expected invocation, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejects_garbage() {
        assert!(Inbound::classify(json!([1, 2, 3])).is_err());
        assert!(Inbound::classify(json!({"foo": "bar"})).is_err());
        // reply marker present but no success flag
        assert!(Inbound::classify(json!({"ID": 1, "replay": 5})).is_err());
    }

    #[test]
    fn test_reply_survives_codecs() {
        let reply = ReplyEnvelope {
            id: 42,
            success: true,
            payload: json!({"rows": [1, 2]}),
        };
        let codecs: [&dyn Codec; 2] = [&JsonCodec, &MsgpackCodec];
        for codec in codecs {
            let bytes = codec.encode(&serde_json::to_value(&reply).unwrap()).unwrap();
            match decode_inbound(codec, &bytes).unwrap() {
                Inbound::Reply(decoded) => {
                    assert_eq!(decoded.id, 42, "codec {}", codec.name());
                    assert!(decoded.success, "codec {}", codec.name());
                }
                other => panic!("expected reply, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_json_decode_error_is_protocol_error() {
        let err = JsonCodec.decode(b"{not json").unwrap_err();
        assert!(matches!(err, HubError::Protocol(_)));
    }
}
