//! Builder pattern for server configuration.
//!
//! # Example
//!
//! ```ignore
//! use cable_mux::{ChannelDescriptor, Identity, Server};
//!
//! let server = Server::builder()
//!     .resolver(|request: &cable_mux::ConnectRequest| -> cable_mux::Result<Identity> {
//!         let user = request
//!             .query_param("user")
//!             .ok_or_else(|| cable_mux::Error::rejected("missing user"))?;
//!         Ok(Identity::new().with("current_user", user))
//!     })
//!     .channel(ChannelDescriptor::builder("Chat").build())
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::broadcast::{MemoryPubSub, PubSubBackend};
use crate::channel::ChannelDescriptor;
use crate::error::{Error, Result};
use crate::identity::IdentityResolver;

use super::config::ServerConfig;
use super::core::Server;

// ============================================================================
// ServerBuilder
// ============================================================================

/// Builder for configuring a [`Server`] instance.
///
/// Use [`Server::builder()`] to create a new builder.
#[derive(Default)]
pub struct ServerBuilder {
    /// Server tunables.
    config: ServerConfig,
    /// Connection identity resolver.
    resolver: Option<Arc<dyn IdentityResolver>>,
    /// Pub/sub backend. Defaults to [`MemoryPubSub`].
    backend: Option<Arc<dyn PubSubBackend>>,
    /// Channels registered at build time.
    channels: Vec<ChannelDescriptor>,
}

// ============================================================================
// ServerBuilder Implementation
// ============================================================================

impl ServerBuilder {
    /// Creates a new server builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the number of concurrent worker slots.
    #[inline]
    #[must_use]
    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.config.worker_pool_size = Some(size);
        self
    }

    /// Sets the identity resolver. Required.
    #[inline]
    #[must_use]
    pub fn resolver(mut self, resolver: impl IdentityResolver) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Sets the pub/sub backend.
    #[inline]
    #[must_use]
    pub fn backend(mut self, backend: impl PubSubBackend) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Sets a pub/sub backend shared with other servers.
    #[inline]
    #[must_use]
    pub fn shared_backend(mut self, backend: Arc<dyn PubSubBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Registers a channel.
    #[inline]
    #[must_use]
    pub fn channel(mut self, descriptor: ChannelDescriptor) -> Self {
        self.channels.push(descriptor);
        self
    }

    /// Builds the server with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no resolver is set or the configuration is invalid
    /// - [`Error::ChannelAlreadyRegistered`] if two channels share a name
    pub fn build(self) -> Result<Server> {
        self.config.validate().map_err(Error::config)?;

        let resolver = self.resolver.ok_or_else(|| {
            Error::config("Identity resolver is required. Use .resolver() to set it.")
        })?;

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryPubSub::new()));

        let server = Server::new(self.config, resolver, backend);
        for descriptor in self.channels {
            server.register_channel(descriptor)?;
        }

        Ok(server)
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("resolver", &self.resolver.is_some())
            .field("backend", &self.backend.is_some())
            .field(
                "channels",
                &self.channels.iter().map(ChannelDescriptor::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identity::{ConnectRequest, Identity};

    fn anonymous(_: &ConnectRequest) -> Result<Identity> {
        Ok(Identity::anonymous())
    }

    #[test]
    fn test_build_requires_resolver() {
        let err = ServerBuilder::new().build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_build_rejects_zero_pool() {
        let err = ServerBuilder::new()
            .resolver(anonymous)
            .worker_pool_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_build_rejects_duplicate_channel() {
        let err = ServerBuilder::new()
            .resolver(anonymous)
            .channel(ChannelDescriptor::builder("Chat").build())
            .channel(ChannelDescriptor::builder("Chat").build())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::ChannelAlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn test_build_registers_channels() {
        let server = ServerBuilder::new()
            .resolver(anonymous)
            .worker_pool_size(2)
            .channel(ChannelDescriptor::builder("Chat").build())
            .channel(ChannelDescriptor::builder("Presence").build())
            .build()
            .expect("build");

        assert_eq!(server.registry().names(), vec!["Chat", "Presence"]);
        assert_eq!(server.pool().size(), 2);
    }
}
