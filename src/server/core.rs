//! Server coordinator.
//!
//! The [`Server`] owns everything the connections of one deployment share:
//! the channel registry, the relay, the worker pool and the connection
//! manager. Several independent servers can live in one process.
//!
//! # Example
//!
//! ```ignore
//! use std::net::{IpAddr, Ipv4Addr};
//! use cable_mux::{ConnectRequest, Identity, Server};
//!
//! let server = Server::builder()
//!     .resolver(|_: &ConnectRequest| -> cable_mux::Result<Identity> { Ok(Identity::anonymous()) })
//!     .build()?;
//!
//! let listener = server.listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
//! println!("Listening on {}", listener.ws_url());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::broadcast::{PubSubBackend, Relay};
use crate::channel::{ChannelDescriptor, ChannelRegistry};
use crate::error::Result;
use crate::identity::{ConnectRequest, IdentityResolver};
use crate::transport::{Listener, Transport};
use crate::worker::WorkerPool;

use super::builder::ServerBuilder;
use super::config::ServerConfig;
use super::connection::Connection;
use super::manager::ConnectionManager;

// ============================================================================
// Types
// ============================================================================

/// State shared by a server and all of its connections.
pub(crate) struct ServerContext {
    /// Server tunables.
    pub config: ServerConfig,

    /// Connection identity resolver.
    pub resolver: Arc<dyn IdentityResolver>,

    /// Registered channel types.
    pub registry: ChannelRegistry,

    /// Backend streams to local subscriptions.
    pub relay: Relay,

    /// Executes channel code.
    pub pool: WorkerPool,

    /// Live connections.
    pub manager: ConnectionManager,
}

// ============================================================================
// Server
// ============================================================================

/// Channel multiplexing server.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Server {
    /// Shared state.
    pub(crate) context: Arc<ServerContext>,
}

// ============================================================================
// Server - Display
// ============================================================================

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("channels", &self.context.registry.names())
            .field("connection_count", &self.connection_count())
            .field("stream_count", &self.context.relay.stream_count())
            .field("pool_size", &self.context.pool.size())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Server - Public API
// ============================================================================

impl Server {
    /// Creates a configuration builder for the server.
    #[inline]
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Accepts a connection over `transport`.
    ///
    /// Resolves the identity from `request`, sends `welcome` and starts the
    /// connection's I/O task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`](crate::Error::Rejected) if the resolver
    /// refused; the transport has then been closed without any frame.
    pub async fn accept(
        &self,
        request: ConnectRequest,
        transport: Transport,
    ) -> Result<Arc<Connection>> {
        Connection::accept(Arc::clone(&self.context), request, transport).await
    }

    /// Publishes `payload` to `stream` through the backend.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn broadcast(&self, stream: &str, payload: Value) -> Result<()> {
        self.context.relay.publish(stream, payload).await
    }

    /// Registers a channel type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelAlreadyRegistered`](crate::Error::ChannelAlreadyRegistered)
    /// if the name is taken.
    #[inline]
    pub fn register_channel(&self, descriptor: ChannelDescriptor) -> Result<()> {
        self.context.registry.register(descriptor)
    }

    /// Disconnects every connection whose identity has `name` set to
    /// `value`, on this server only. Returns how many were disconnected.
    pub async fn disconnect(
        &self,
        name: &str,
        value: &str,
        reason: &str,
        reconnect: bool,
    ) -> usize {
        self.context
            .manager
            .disconnect(name, value, reason, reconnect)
            .await
    }

    /// Binds a WebSocket listener and serves this server on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn listen(&self, ip: IpAddr, port: u16) -> Result<Arc<Listener>> {
        let listener = Listener::bind(ip, port).await?;
        listener.serve(self.clone())?;
        Ok(listener)
    }

    /// Disconnects every client, then stops the worker pool and the relay.
    pub async fn shutdown(&self) {
        let config = &self.context.config;
        let closed = self
            .context
            .manager
            .close_all(&config.shutdown_reason, config.reconnect_on_shutdown)
            .await;

        self.context.pool.shutdown();
        self.context.relay.shutdown();

        info!(connections = closed, "Server shut down");
    }
}

// ============================================================================
// Server - Accessors
// ============================================================================

impl Server {
    /// Returns the channel registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ChannelRegistry {
        &self.context.registry
    }

    /// Returns the relay.
    #[inline]
    #[must_use]
    pub fn relay(&self) -> &Relay {
        &self.context.relay
    }

    /// Returns the worker pool.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.context.pool
    }

    /// Returns the connection manager.
    #[inline]
    #[must_use]
    pub fn connections(&self) -> &ConnectionManager {
        &self.context.manager
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the number of live connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.context.manager.connection_count()
    }
}

// ============================================================================
// Server - Internal API
// ============================================================================

impl Server {
    /// Creates a server from validated parts.
    pub(crate) fn new(
        config: ServerConfig,
        resolver: Arc<dyn IdentityResolver>,
        backend: Arc<dyn PubSubBackend>,
    ) -> Self {
        let pool = WorkerPool::new(config.resolved_pool_size());
        let relay = Relay::new(backend, config.backoff());

        info!(pool_size = pool.size(), "Server initialized");

        Self {
            context: Arc::new(ServerContext {
                config,
                resolver,
                registry: ChannelRegistry::new(),
                relay,
                pool,
                manager: ConnectionManager::new(),
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
