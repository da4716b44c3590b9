use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::parse_tagged;
use crate::Result;
use crate::batch::Batch;

/// An event from the transport worker to the host.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransportEvent {
    /// Batched messages released by the batcher
    Batch { batch: Batch },
    /// A single message that was not batched
    Message { message: Value },
    /// The connection came back after an unexpected drop
    Reconnected,
}

impl TransportEvent {
    /// Parse an event from its JSON form. Unknown `type` tags are a protocol error.
    pub fn from_json(text: &str) -> Result<Self> {
        parse_tagged(text)
    }

    #[must_use]
    pub fn as_batch(&self) -> Option<&Batch> {
        match self {
            Self::Batch { batch } => Some(batch),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_message(&self) -> Option<&Value> {
        match self {
            Self::Message { message } => Some(message),
            _ => None,
        }
    }
}

/// Interpret raw inbound text: JSON when it parses, otherwise the text itself.
#[must_use]
pub fn parse_inbound(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Kind;

    #[test]
    fn batch_event_wire_form() {
        let event = TransportEvent::from_json(
            r#"{"type":"batch","batch":{"k":[2,3],"dropped":true}}"#,
        )
        .unwrap();

        let batch = event.as_batch().unwrap();
        assert!(batch.dropped);
        assert_eq!(batch.get("k").unwrap(), [json!(2), json!(3)]);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "batch", "batch": { "k": [2, 3], "dropped": true } })
        );
    }

    #[test]
    fn reconnected_and_message_wire_form() {
        assert_eq!(
            TransportEvent::from_json(r#"{"type":"reconnected"}"#).unwrap(),
            TransportEvent::Reconnected
        );
        let event = TransportEvent::from_json(r#"{"type":"message","message":{"v":1}}"#).unwrap();
        assert_eq!(event.as_message(), Some(&json!({ "v": 1 })));
    }

    #[test]
    fn unknown_event_tag_is_protocol_error() {
        let err = TransportEvent::from_json(r#"{"type":"telemetry"}"#).unwrap_err();

        assert_eq!(err.kind(), Kind::Protocol);
    }

    #[test]
    fn inbound_text_falls_back_to_string() {
        assert_eq!(parse_inbound(r#"{"id":"a"}"#), json!({ "id": "a" }));
        assert_eq!(parse_inbound("PONG"), json!("PONG"));
    }
}
