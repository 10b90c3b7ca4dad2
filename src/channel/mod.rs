//! Channels and subscriptions.
//!
//! A channel is a named behavior template: a set of actions clients may
//! invoke plus `on_subscribed` / `on_unsubscribed` hooks. A subscription is
//! one connection's live instance of a channel.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ChannelDescriptor`] | Actions and hooks of one channel type |
//! | [`ChannelRegistry`] | Channel-type name → descriptor |
//! | [`Subscription`] | One connection's binding to one channel |
//! | [`ChannelContext`] | Capabilities handed to actions and hooks |
//!
//! # Example
//!
//! ```ignore
//! use cable_mux::ChannelDescriptor;
//! use serde_json::json;
//!
//! let chat = ChannelDescriptor::builder("Chat")
//!     .on_subscribed(|ctx| {
//!         let room = ctx.param("room").cloned().unwrap_or_default();
//!         ctx.stream_from(format!("room_{room}"));
//!         Ok(())
//!     })
//!     .action("speak", |ctx, data| {
//!         let room = ctx.param("room").cloned().unwrap_or_default();
//!         ctx.broadcast(format!("room_{room}"), json!({ "text": data["text"] }));
//!         Ok(())
//!     })
//!     .build();
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Handler capability object.
pub mod context;

/// Channel descriptors and handler types.
pub mod descriptor;

/// Channel registry.
pub mod registry;

/// Subscription state machine.
pub mod subscription;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::ChannelContext;
pub use descriptor::{ActionHandler, ChannelBuilder, ChannelDescriptor, Hook};
pub use registry::ChannelRegistry;
pub use subscription::{Subscription, SubscriptionKey, SubscriptionState};
