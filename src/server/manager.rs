//! Registry of live connections.
//!
//! Connections are indexed by ID and by every `(name, value)` pair of their
//! identity, so an administrator can drop all connections of one user
//! without scanning.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::identifiers::ConnectionId;

use super::connection::Connection;

// ============================================================================
// Types
// ============================================================================

/// Identity entry used as an index key.
type IdentityKey = (String, String);

#[derive(Default)]
struct ManagerInner {
    connections: FxHashMap<ConnectionId, Arc<Connection>>,
    by_identity: FxHashMap<IdentityKey, FxHashSet<ConnectionId>>,
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Live connections of one server.
#[derive(Default)]
pub struct ConnectionManager {
    inner: RwLock<ManagerInner>,
}

impl ConnectionManager {
    /// Creates an empty manager.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Adds an accepted connection.
    pub(crate) fn register(&self, connection: Arc<Connection>) {
        let id = connection.id();
        let mut inner = self.inner.write();

        for (name, value) in connection.identity().iter() {
            inner
                .by_identity
                .entry((name.to_string(), value.to_string()))
                .or_default()
                .insert(id);
        }
        inner.connections.insert(id, connection);

        debug!(connection_id = %id, total = inner.connections.len(), "Connection registered");
    }

    /// Removes a connection. Returns it if it was registered.
    pub(crate) fn deregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write();
        let connection = inner.connections.remove(&id)?;

        for (name, value) in connection.identity().iter() {
            let key = (name.to_string(), value.to_string());
            if let Some(ids) = inner.by_identity.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    inner.by_identity.remove(&key);
                }
            }
        }

        debug!(connection_id = %id, total = inner.connections.len(), "Connection deregistered");
        Some(connection)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Returns the connection with this ID.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.read().connections.get(&id).cloned()
    }

    /// Number of live connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Connections whose identity has `name` set to `value`.
    #[must_use]
    pub fn find(&self, name: &str, value: &str) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        let key = (name.to_string(), value.to_string());

        inner
            .by_identity
            .get(&key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every live connection.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner.read().connections.values().cloned().collect()
    }

    // ========================================================================
    // Administrative Disconnect
    // ========================================================================

    /// Disconnects every connection whose identity has `name` set to
    /// `value`. Returns how many were disconnected.
    pub async fn disconnect(
        &self,
        name: &str,
        value: &str,
        reason: &str,
        reconnect: bool,
    ) -> usize {
        let targets = self.find(name, value);
        let count = targets.len();

        for connection in targets {
            connection.disconnect(reason, reconnect).await;
        }

        info!(name, value, count, "Administrative disconnect");
        count
    }

    /// Disconnects every live connection. Returns how many were disconnected.
    pub async fn close_all(&self, reason: &str, reconnect: bool) -> usize {
        let targets = self.connections();
        let count = targets.len();

        for connection in targets {
            connection.disconnect(reason, reconnect).await;
        }

        count
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ConnectionManager")
            .field("connections", &inner.connections.len())
            .field("identities", &inner.by_identity.len())
            .finish()
    }
}
