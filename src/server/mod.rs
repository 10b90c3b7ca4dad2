//! Server module.
//!
//! This module provides the entry point for serving channels.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Server`] | Shared registry, relay, worker pool and connections |
//! | [`ServerBuilder`] | Fluent configuration builder |
//! | [`ServerConfig`] | Server tunables |
//! | [`Connection`] | One client connection |
//! | [`ConnectionManager`] | Live connections indexed by identity |
//!
//! # Example
//!
//! ```ignore
//! use cable_mux::{ConnectRequest, Envelope, Identity, Server};
//! use cable_mux::transport::memory;
//!
//! let server = Server::builder()
//!     .resolver(|_: &ConnectRequest| -> cable_mux::Result<Identity> {
//!         Ok(Identity::new().with("current_user", "1"))
//!     })
//!     .channel(chat)
//!     .build()?;
//!
//! let (transport, mut peer) = memory::pair();
//! server.accept(ConnectRequest::new("/cable"), transport).await?;
//! peer.send_envelope(&Envelope::subscribe_to("chat-1", "Chat"))?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for server configuration.
pub mod builder;

/// Server tunables.
pub mod config;

/// One client connection.
pub mod connection;

/// Core server implementation.
pub mod core;

/// Registry of live connections.
pub mod manager;


// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ServerBuilder;
pub use config::ServerConfig;
pub use connection::Connection;
pub use core::Server;
pub use manager::ConnectionManager;
