//! Broadcasting.
//!
//! Payloads published to a named stream reach every subscription streaming
//! it, on every server instance sharing the same [`PubSubBackend`].
//!
//! # Architecture
//!
//! ```text
//! ctx.broadcast("room_5", payload)
//!        │
//!        ▼
//! ┌──────────────┐  publish   ┌──────────────┐  one subscription  ┌──────────────┐
//! │    Relay     │───────────►│ PubSubBackend│───────────────────►│  fan-in task │
//! └──────────────┘            └──────────────┘     per stream     └──────┬───────┘
//!                                                                        │ deliver
//!                                                        ┌───────────────┼───────────────┐
//!                                                        ▼               ▼               ▼
//!                                                  Subscription    Subscription    Subscription
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `backend` | [`PubSubBackend`] trait and the in-process [`MemoryPubSub`] |
//! | `relay` | Per-stream fan-in and local fan-out |

// ============================================================================
// Submodules
// ============================================================================

/// Pub/sub backend abstraction.
pub mod backend;

/// Stream relay.
pub mod relay;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{MemoryPubSub, PayloadStream, PubSubBackend};
pub use relay::{Backoff, Relay};
