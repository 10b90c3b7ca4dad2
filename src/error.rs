//! Error types for cable-mux.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use cable_mux::{Error, Result};
//!
//! fn speak(ctx: &mut ChannelContext, data: &Value) -> Result<()> {
//!     let text = data.get("text").ok_or_else(|| Error::handler("missing text"))?;
//!     ctx.broadcast("room_5", json!({ "text": text }));
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Rejected`], [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`] |
//! | Channels | [`Error::ChannelNotFound`], [`Error::ChannelAlreadyRegistered`], [`Error::ActionNotFound`] |
//! | Subscriptions | [`Error::SubscriptionNotFound`], [`Error::SubscriptionRejected`] |
//! | Execution | [`Error::Handler`], [`Error::PoolClosed`] |
//! | Broadcasting | [`Error::Backend`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when server configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Identity resolution rejected the connection.
    #[error("Connection rejected: {reason}")]
    Rejected {
        /// Why the resolver refused the credentials.
        reason: String,
    },

    /// Transport-level connection failure.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection is closed or closing; no new work is admitted.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed inbound envelope or payload.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// No channel registered under this name.
    #[error("Channel not found: {channel}")]
    ChannelNotFound {
        /// The requested channel-type name.
        channel: String,
    },

    /// A channel with this name is already registered.
    #[error("Channel already registered: {channel}")]
    ChannelAlreadyRegistered {
        /// The duplicate channel-type name.
        channel: String,
    },

    /// The channel does not declare this action.
    #[error("Action not found: {channel}#{action}")]
    ActionNotFound {
        /// Channel the action was invoked on.
        channel: String,
        /// The undeclared action name.
        action: String,
    },

    // ========================================================================
    // Subscription Errors
    // ========================================================================
    /// No live subscription with this identifier on the connection.
    #[error("Subscription not found: {identifier}")]
    SubscriptionNotFound {
        /// Client-supplied subscription identifier.
        identifier: String,
    },

    /// The channel refused the subscription.
    #[error("Subscription rejected: {identifier}")]
    SubscriptionRejected {
        /// Client-supplied subscription identifier.
        identifier: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// A channel action or hook failed.
    #[error("Handler error: {message}")]
    Handler {
        /// Description of the failure.
        message: String,
    },

    /// Worker pool is shut down.
    #[error("Worker pool closed")]
    PoolClosed,

    // ========================================================================
    // Broadcasting Errors
    // ========================================================================
    /// Pub/sub backend failure.
    #[error("Backend error on {stream}: {message}")]
    Backend {
        /// Stream the operation targeted.
        stream: String,
        /// Description of the backend failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a rejected connection error.
    #[inline]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a channel not found error.
    #[inline]
    pub fn channel_not_found(channel: impl Into<String>) -> Self {
        Self::ChannelNotFound {
            channel: channel.into(),
        }
    }

    /// Creates a duplicate channel registration error.
    #[inline]
    pub fn channel_already_registered(channel: impl Into<String>) -> Self {
        Self::ChannelAlreadyRegistered {
            channel: channel.into(),
        }
    }

    /// Creates an action not found error.
    #[inline]
    pub fn action_not_found(channel: impl Into<String>, action: impl Into<String>) -> Self {
        Self::ActionNotFound {
            channel: channel.into(),
            action: action.into(),
        }
    }

    /// Creates a subscription not found error.
    #[inline]
    pub fn subscription_not_found(identifier: impl Into<String>) -> Self {
        Self::SubscriptionNotFound {
            identifier: identifier.into(),
        }
    }

    /// Creates a subscription rejected error.
    #[inline]
    pub fn subscription_rejected(identifier: impl Into<String>) -> Self {
        Self::SubscriptionRejected {
            identifier: identifier.into(),
        }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Creates a backend error.
    #[inline]
    pub fn backend(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            stream: stream.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. }
                | Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the error was caused by what the client sent.
    ///
    /// Client errors are reported on the existing connection and never
    /// terminate it.
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::ChannelNotFound { .. }
                | Self::ActionNotFound { .. }
                | Self::SubscriptionNotFound { .. }
                | Self::SubscriptionRejected { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Handler { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
