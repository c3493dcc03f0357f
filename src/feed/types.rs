use std::fmt;

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ws::{Protocol, WsError};

/// Kind of an inbound feed message.
///
/// Types the client does not know are kept verbatim in [`MessageType::Other`]
/// and forwarded to the caller.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Full state of the auction, usually sent right after connecting
    Snapshot,
    /// Incremental change to the auction
    Update,
    /// Server-side error report for this subscription
    Error,
    /// Heartbeat acknowledgement, never forwarded
    Pong,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot => f.write_str("snapshot"),
            Self::Update => f.write_str("update"),
            Self::Error => f.write_str("error"),
            Self::Pong => f.write_str("pong"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// Message received from the auction feed.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Event-specific payload, left uninterpreted
    #[serde(default)]
    #[builder(default)]
    pub data: Value,
    /// Subscription key (auction id) the message belongs to
    #[serde(
        rename = "auctionId",
        alias = "subscriptionKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auction_id: Option<String>,
}

impl InboundMessage {
    #[must_use]
    pub fn is_pong(&self) -> bool {
        self.msg_type == MessageType::Pong
    }
}

/// Message sent by the client.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Heartbeat, serialized as `{"type":"ping"}`
    Ping,
}

/// Parse a text or binary frame from the feed.
///
/// Accepts a single object or an array of objects. Whitespace-only frames
/// yield nothing. Heartbeat acknowledgements are dropped.
pub fn parse_messages(bytes: &[u8]) -> crate::Result<Vec<InboundMessage>> {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &bytes[start..]);

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut messages = if trimmed.first() == Some(&b'[') {
        serde_json::from_slice::<Vec<InboundMessage>>(trimmed).map_err(WsError::MessageParse)?
    } else {
        vec![serde_json::from_slice::<InboundMessage>(trimmed).map_err(WsError::MessageParse)?]
    };

    messages.retain(|message| {
        #[cfg(feature = "tracing")]
        if message.is_pong() {
            tracing::trace!("Heartbeat acknowledged");
        }
        !message.is_pong()
    });

    Ok(messages)
}

/// Wire protocol of the auction feed.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedProtocol;

impl Protocol<InboundMessage> for FeedProtocol {
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<InboundMessage>> {
        parse_messages(bytes)
    }

    fn heartbeat(&self) -> String {
        // A unit variant with a static tag cannot fail to serialize.
        serde_json::to_string(&ClientMessage::Ping)
            .unwrap_or_else(|_e| r#"{"type":"ping"}"#.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Kind;

    #[test]
    fn parse_update_message() {
        let json = r#"{
            "type": "update",
            "data": { "lot": 7, "highestBid": "120.50" },
            "auctionId": "abc"
        }"#;

        let messages = parse_messages(json.as_bytes()).unwrap();

        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.msg_type, MessageType::Update);
        assert_eq!(message.data, json!({ "lot": 7, "highestBid": "120.50" }));
        assert_eq!(message.auction_id.as_deref(), Some("abc"));
    }

    #[test]
    fn pong_is_dropped() {
        let messages = parse_messages(br#"{"type":"pong","auctionId":"abc"}"#).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn pong_is_dropped_from_batches() {
        let json = r#"[
            {"type":"pong"},
            {"type":"snapshot","data":{"lots":[]},"auctionId":"abc"}
        ]"#;

        let messages = parse_messages(json.as_bytes()).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].msg_type, MessageType::Snapshot);
    }

    #[test]
    fn unknown_type_is_kept_verbatim() {
        let json = r#"{"type":"auction_closed","data":{"winner":"u1"},"auctionId":"abc"}"#;

        let messages = parse_messages(json.as_bytes()).unwrap();

        assert_eq!(
            messages[0].msg_type,
            MessageType::Other("auction_closed".to_owned())
        );
        assert_eq!(messages[0].msg_type.to_string(), "auction_closed");
    }

    #[test]
    fn subscription_key_alias_and_missing_data() {
        let messages = parse_messages(br#"{"type":"error","subscriptionKey":"abc"}"#).unwrap();

        assert_eq!(messages[0].msg_type, MessageType::Error);
        assert_eq!(messages[0].auction_id.as_deref(), Some("abc"));
        assert_eq!(messages[0].data, Value::Null);
    }

    #[test]
    fn whitespace_frames_are_empty() {
        assert!(parse_messages(b"  \n\t ").unwrap().is_empty());
        assert!(parse_messages(b"").unwrap().is_empty());
    }

    #[test]
    fn malformed_frames_are_parse_errors() {
        let error = parse_messages(b"not json").unwrap_err();

        assert_eq!(error.kind(), Kind::WebSocket);
        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::MessageParse(_))
        ));

        assert!(parse_messages(br#"{"data":{}}"#).is_err());
    }

    #[test]
    fn heartbeat_payload() {
        assert_eq!(FeedProtocol.heartbeat(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn message_serializes_with_wire_names() {
        let message = InboundMessage::builder()
            .msg_type(MessageType::Update)
            .data(json!({ "bid": 10 }))
            .auction_id("abc".to_owned())
            .build();

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({ "type": "update", "data": { "bid": 10 }, "auctionId": "abc" })
        );
    }
}
