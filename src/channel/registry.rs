//! Channel registry.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Error, Result};

use super::ChannelDescriptor;

// ============================================================================
// ChannelRegistry
// ============================================================================

/// Maps channel-type names to descriptors.
///
/// Populated at startup and read by every connection afterwards.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<FxHashMap<String, Arc<ChannelDescriptor>>>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel under its descriptor's name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelAlreadyRegistered`] if the name is taken.
    pub fn register(&self, descriptor: ChannelDescriptor) -> Result<()> {
        let mut channels = self.channels.write();
        let name = descriptor.name().to_string();

        if channels.contains_key(&name) {
            return Err(Error::channel_already_registered(name));
        }

        debug!(channel = %name, actions = ?descriptor.action_names(), "Channel registered");
        channels.insert(name, Arc::new(descriptor));
        Ok(())
    }

    /// Looks up a channel by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotFound`] if no channel has this name.
    pub fn resolve(&self, name: &str) -> Result<Arc<ChannelDescriptor>> {
        self.channels
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::channel_not_found(name))
    }

    /// Returns `true` if a channel has this name.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    /// Registered channel names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered channels.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let registry = ChannelRegistry::new();
        registry
            .register(ChannelDescriptor::builder("Chat").build())
            .expect("register");

        let chat = registry.resolve("Chat").expect("resolve");
        assert_eq!(chat.name(), "Chat");
        assert!(registry.contains("Chat"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = ChannelRegistry::new();
        registry
            .register(ChannelDescriptor::builder("Chat").build())
            .expect("register");

        let err = registry
            .register(ChannelDescriptor::builder("Chat").build())
            .unwrap_err();
        assert!(matches!(err, Error::ChannelAlreadyRegistered { channel } if channel == "Chat"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = ChannelRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.resolve("Ghost"),
            Err(Error::ChannelNotFound { .. })
        ));
    }

    #[test]
    fn test_names_sorted() {
        let registry = ChannelRegistry::new();
        for name in ["Presence", "Chat", "Feed"] {
            registry
                .register(ChannelDescriptor::builder(name).build())
                .expect("register");
        }
        assert_eq!(registry.names(), vec!["Chat", "Feed", "Presence"]);
    }
}
