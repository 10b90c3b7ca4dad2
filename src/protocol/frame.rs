//! Outbound frames.
//!
//! # Formats
//!
//! | Frame | JSON |
//! |-------|------|
//! | Welcome | `{"type":"welcome"}` |
//! | Confirm | `{"identifier":"...","type":"confirm_subscription"}` |
//! | Reject | `{"identifier":"...","type":"reject_subscription"}` |
//! | Message | `{"identifier":"...","message":<payload>}` |
//! | Disconnect | `{"type":"disconnect","reason":"...","reconnect":true}` |

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, json};

// ============================================================================
// Frame
// ============================================================================

/// A frame written to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Connect acknowledgment, always the first frame on a connection.
    Welcome,

    /// Subscription created.
    ConfirmSubscription {
        /// Subscription identifier.
        identifier: String,
    },

    /// Subscription refused.
    RejectSubscription {
        /// Subscription identifier.
        identifier: String,
    },

    /// Broadcast delivery or direct transmission.
    Message {
        /// Subscription identifier.
        identifier: String,
        /// Opaque payload.
        message: Value,
    },

    /// Server is closing the connection.
    Disconnect {
        /// Human-readable reason.
        reason: String,
        /// Whether the client should reconnect.
        reconnect: bool,
    },
}

impl Frame {
    /// Creates a confirmation frame.
    #[inline]
    #[must_use]
    pub fn confirm(identifier: impl Into<String>) -> Self {
        Self::ConfirmSubscription {
            identifier: identifier.into(),
        }
    }

    /// Creates a rejection frame.
    #[inline]
    #[must_use]
    pub fn reject(identifier: impl Into<String>) -> Self {
        Self::RejectSubscription {
            identifier: identifier.into(),
        }
    }

    /// Creates a message frame.
    #[inline]
    #[must_use]
    pub fn message(identifier: impl Into<String>, message: Value) -> Self {
        Self::Message {
            identifier: identifier.into(),
            message,
        }
    }

    /// Returns the subscription identifier this frame concerns, if any.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::ConfirmSubscription { identifier }
            | Self::RejectSubscription { identifier }
            | Self::Message { identifier, .. } => Some(identifier),
            Self::Welcome | Self::Disconnect { .. } => None,
        }
    }

    /// Converts the frame to its JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Welcome => json!({ "type": "welcome" }),
            Self::ConfirmSubscription { identifier } => json!({
                "identifier": identifier,
                "type": "confirm_subscription",
            }),
            Self::RejectSubscription { identifier } => json!({
                "identifier": identifier,
                "type": "reject_subscription",
            }),
            Self::Message {
                identifier,
                message,
            } => json!({
                "identifier": identifier,
                "message": message,
            }),
            Self::Disconnect { reason, reconnect } => json!({
                "type": "disconnect",
                "reason": reason,
                "reconnect": reconnect,
            }),
        }
    }

    /// Encodes the frame as JSON text.
    #[inline]
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
