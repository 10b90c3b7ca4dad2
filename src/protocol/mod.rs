//! Client wire protocol.
//!
//! This module defines the JSON messages exchanged with clients over a
//! connection's transport.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Envelope`] | Client → Server | `subscribe`, `unsubscribe`, `message` commands |
//! | [`Frame`] | Server → Client | Welcome, confirmations, deliveries, disconnect |
//!
//! # Identifiers
//!
//! Every command carries an opaque `identifier` chosen by the client. It
//! names one subscription on the connection and is echoed back on every
//! frame that concerns that subscription.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Inbound command envelope |
//! | `frame` | Outbound frames |

// ============================================================================
// Submodules
// ============================================================================

/// Inbound command envelope.
pub mod envelope;

/// Outbound frames.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{CommandKind, Envelope};
pub use frame::Frame;
