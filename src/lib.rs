//! Cable Mux - Real-time channel multiplexing over WebSocket.
//!
//! One client connection carries many logical channel subscriptions. The
//! server resolves an identity for every connection, routes client commands
//! to channel handlers and relays pub/sub broadcasts to every subscription
//! streaming from a named stream.
//!
//! # Architecture
//!
//! The server follows a connection/channel/stream model:
//!
//! - **Connection**: one transport, one identity, many subscriptions
//! - **Subscription**: one channel instance, bound to a client-chosen identifier
//! - **Stream**: a named pub/sub topic a subscription listens on
//!
//! Key design principles:
//!
//! - Channel code runs on a bounded worker pool, FIFO per connection
//! - Handler effects are recorded and applied only when the handler succeeds
//! - One backend subscription per stream per server, fanned out locally
//! - Backend failures are retried with exponential backoff
//!
//! # Quick Start
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! use cable_mux::{ChannelDescriptor, ConnectRequest, Error, Identity, Result, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let chat = ChannelDescriptor::builder("Chat")
//!         .on_subscribed(|ctx| {
//!             ctx.stream_from("lobby");
//!             Ok(())
//!         })
//!         .action("speak", |ctx, data| {
//!             ctx.broadcast("lobby", data.clone());
//!             Ok(())
//!         })
//!         .build();
//!
//!     let server = Server::builder()
//!         .resolver(|request: &ConnectRequest| -> Result<Identity> {
//!             let user = request
//!                 .query_param("user")
//!                 .ok_or_else(|| Error::rejected("missing user"))?;
//!             Ok(Identity::new().with("current_user", user))
//!         })
//!         .channel(chat)
//!         .build()?;
//!
//!     let listener = server.listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080).await?;
//!     println!("Listening on {}", listener.ws_url());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`broadcast`] | Pub/sub backends and the stream relay |
//! | [`channel`] | Channel descriptors, subscriptions, handler context |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`identity`] | Connection identity and resolution |
//! | [`protocol`] | Wire envelopes and frames |
//! | [`server`] | Server, connections and the connection manager |
//! | [`transport`] | WebSocket and in-memory transports |
//! | [`worker`] | Bounded worker pool |

// ============================================================================
// Modules
// ============================================================================

/// Pub/sub backends and the stream relay.
///
/// - [`PubSubBackend`] - Backend seam
/// - [`MemoryPubSub`] - In-process backend
/// - [`Relay`] - Fans backend streams out to local subscriptions
pub mod broadcast;

/// Channel types and their per-subscription runtime.
pub mod channel;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Connection identity.
pub mod identity;

/// Wire protocol types.
pub mod protocol;

/// Server coordinator.
///
/// Use [`Server::builder()`] to create a configured server instance.
pub mod server;

/// Transport layer.
pub mod transport;

/// Bounded worker pool for channel code.
pub mod worker;

// ============================================================================
// Re-exports
// ============================================================================

// Broadcast types
pub use broadcast::{Backoff, MemoryPubSub, PubSubBackend, Relay};

// Channel types
pub use channel::{
    ChannelBuilder, ChannelContext, ChannelDescriptor, ChannelRegistry, Subscription,
    SubscriptionState,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ConnectionId;

// Identity types
pub use identity::{ConnectRequest, Identity, IdentityResolver};

// Protocol types
pub use protocol::{Envelope, Frame};

// Server types
pub use server::{Connection, ConnectionManager, Server, ServerBuilder, ServerConfig};

// Transport types
pub use transport::{Listener, Peer, Transport};

// Worker types
pub use worker::WorkerPool;
