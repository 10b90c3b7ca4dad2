//! Inbound command envelope.
//!
//! # Format
//!
//! ```json
//! {
//!   "command": "message",
//!   "identifier": "{\"channel\":\"Chat\",\"room\":5}",
//!   "data": "{\"action\":\"speak\",\"text\":\"hi\"}"
//! }
//! ```
//!
//! `data` is a string that itself JSON-encodes an object. A raw JSON object
//! is accepted too.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, from_str};

use crate::error::{Error, Result};

// ============================================================================
// CommandKind
// ============================================================================

/// Command discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Open a subscription.
    Subscribe,
    /// Close a subscription.
    Unsubscribe,
    /// Invoke a channel action on a subscription.
    Message,
}

impl CommandKind {
    /// Wire name of the command.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Message => "message",
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A command sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// What to do.
    pub command: CommandKind,

    /// Subscription identifier, unique per connection.
    pub identifier: String,

    /// Command payload (`message` carries `{action, ...}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    /// Creates a subscribe envelope.
    #[inline]
    #[must_use]
    pub fn subscribe(identifier: impl Into<String>) -> Self {
        Self {
            command: CommandKind::Subscribe,
            identifier: identifier.into(),
            data: None,
        }
    }

    /// Creates a subscribe envelope naming the channel in `data`.
    ///
    /// Used when the identifier is not itself a JSON object carrying
    /// `"channel"`.
    #[must_use]
    pub fn subscribe_to(identifier: impl Into<String>, channel: &str) -> Self {
        Self {
            command: CommandKind::Subscribe,
            identifier: identifier.into(),
            data: Some(Value::String(
                serde_json::json!({ "channel": channel }).to_string(),
            )),
        }
    }

    /// Creates an unsubscribe envelope.
    #[inline]
    #[must_use]
    pub fn unsubscribe(identifier: impl Into<String>) -> Self {
        Self {
            command: CommandKind::Unsubscribe,
            identifier: identifier.into(),
            data: None,
        }
    }

    /// Creates a message envelope. `data` is string-encoded as on the wire.
    #[inline]
    #[must_use]
    pub fn message(identifier: impl Into<String>, data: &Value) -> Self {
        Self {
            command: CommandKind::Message,
            identifier: identifier.into(),
            data: Some(Value::String(data.to_string())),
        }
    }

    /// Parses an envelope from inbound text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the text is not a valid envelope.
    pub fn decode(text: &str) -> Result<Self> {
        from_str(text).map_err(|e| Error::protocol(format!("invalid envelope: {e}")))
    }

    /// Encodes the envelope as JSON text.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Returns the decoded `data` payload, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `data` is a string holding invalid JSON.
    pub fn payload(&self) -> Result<Option<Value>> {
        match &self.data {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => from_str(text)
                .map(Some)
                .map_err(|e| Error::protocol(format!("invalid data: {e}"))),
            Some(other) => Ok(Some(other.clone())),
        }
    }

    /// Returns the action name and the full payload of a `message` command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `data` is missing or has no string
    /// `action` key.
    pub fn action(&self) -> Result<(String, Value)> {
        let payload = self
            .payload()?
            .ok_or_else(|| Error::protocol("message without data"))?;
        let action = payload
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol("data without action"))?
            .to_string();
        Ok((action, payload))
    }

    /// Returns the channel-type name a `subscribe` command targets.
    ///
    /// Looked up in the identifier first (when it is a JSON object), then in
    /// `data`.
    #[must_use]
    pub fn channel_name(&self) -> Option<String> {
        let from_identifier = self
            .identifier_object()
            .and_then(|obj| obj.get("channel").and_then(Value::as_str).map(str::to_string));

        from_identifier.or_else(|| {
            self.payload()
                .ok()
                .flatten()
                .and_then(|data| data.get("channel").and_then(Value::as_str).map(str::to_string))
        })
    }

    /// Returns the identifier's parameters: every key except `channel` when
    /// the identifier is a JSON object, empty otherwise.
    #[must_use]
    pub fn params(&self) -> Map<String, Value> {
        let mut params = self.identifier_object().unwrap_or_default();
        params.remove("channel");
        params
    }

    fn identifier_object(&self) -> Option<Map<String, Value>> {
        match from_str::<Value>(&self.identifier) {
            Ok(Value::Object(obj)) => Some(obj),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_subscribe() {
        let text = r#"{"command":"subscribe","identifier":"{\"channel\":\"Chat\",\"room\":5}"}"#;
        let envelope = Envelope::decode(text).expect("parse");

        assert_eq!(envelope.command, CommandKind::Subscribe);
        assert_eq!(envelope.channel_name().as_deref(), Some("Chat"));
        assert_eq!(envelope.params().get("room"), Some(&json!(5)));
        assert!(!envelope.params().contains_key("channel"));
    }

    #[test]
    fn test_channel_name_from_data() {
        let envelope = Envelope::subscribe_to("chat-1", "Chat");
        assert_eq!(envelope.channel_name().as_deref(), Some("Chat"));
        assert!(envelope.params().is_empty());
    }

    #[test]
    fn test_channel_name_missing() {
        let envelope = Envelope::subscribe("chat-1");
        assert_eq!(envelope.channel_name(), None);
    }

    #[test]
    fn test_decode_message_action() {
        let text = r#"{"command":"message","identifier":"chat-1","data":"{\"action\":\"speak\",\"text\":\"hi\"}"}"#;
        let envelope = Envelope::decode(text).expect("parse");
        let (action, payload) = envelope.action().expect("action");

        assert_eq!(action, "speak");
        assert_eq!(payload["text"], "hi");
    }

    #[test]
    fn test_object_data_is_accepted() {
        let envelope = Envelope {
            command: CommandKind::Message,
            identifier: "x".into(),
            data: Some(json!({ "action": "ping" })),
        };
        assert_eq!(envelope.action().expect("action").0, "ping");
    }

    #[test]
    fn test_message_without_action() {
        let envelope = Envelope::message("chat-1", &json!({ "text": "hi" }));
        assert!(matches!(envelope.action(), Err(Error::Protocol { .. })));

        let bare = Envelope::unsubscribe("chat-1");
        assert!(bare.action().is_err());
    }

    #[test]
    fn test_invalid_data_string() {
        let envelope = Envelope {
            command: CommandKind::Message,
            identifier: "x".into(),
            data: Some(Value::String("{not json".into())),
        };
        assert!(matches!(envelope.payload(), Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_decode_rejects_unknown_command() {
        let text = r#"{"command":"explode","identifier":"x"}"#;
        assert!(matches!(Envelope::decode(text), Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_encode_matches_wire_format() {
        let envelope = Envelope::message("chat-1", &json!({ "action": "speak" }));
        let value: Value = serde_json::from_str(&envelope.encode()).expect("json");

        assert_eq!(value["command"], "message");
        assert_eq!(value["identifier"], "chat-1");
        assert!(value["data"].is_string());
    }
}
