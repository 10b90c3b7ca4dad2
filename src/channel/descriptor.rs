//! Channel descriptors and handler types.
//!
//! Actions are looked up by name in an explicit map built at registration
//! time. An action name that is not in the map is an
//! [`Error::ActionNotFound`](crate::Error::ActionNotFound), never a crash.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::Result;

use super::ChannelContext;

// ============================================================================
// Types
// ============================================================================

/// Channel action. Receives the full decoded `data` object, `action` key
/// included.
pub type ActionHandler = Arc<dyn Fn(&mut ChannelContext, &Value) -> Result<()> + Send + Sync>;

/// Lifecycle hook (`on_subscribed` / `on_unsubscribed`).
pub type Hook = Arc<dyn Fn(&mut ChannelContext) -> Result<()> + Send + Sync>;

// ============================================================================
// ChannelDescriptor
// ============================================================================

/// Immutable description of one channel type.
///
/// Built once with [`ChannelDescriptor::builder`] and shared read-only by
/// every subscription to the channel.
pub struct ChannelDescriptor {
    name: String,
    actions: FxHashMap<String, ActionHandler>,
    on_subscribed: Option<Hook>,
    on_unsubscribed: Option<Hook>,
}

impl ChannelDescriptor {
    /// Starts building a descriptor for channel type `name`.
    #[inline]
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ChannelBuilder {
        ChannelBuilder::new(name)
    }

    /// Channel-type name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up an action handler.
    #[inline]
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionHandler> {
        self.actions.get(name)
    }

    /// Returns `true` if the channel declares `name`.
    #[inline]
    #[must_use]
    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Declared action names, sorted.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Hook run when a subscription is created.
    #[inline]
    #[must_use]
    pub fn on_subscribed(&self) -> Option<&Hook> {
        self.on_subscribed.as_ref()
    }

    /// Hook run when a subscription ends.
    #[inline]
    #[must_use]
    pub fn on_unsubscribed(&self) -> Option<&Hook> {
        self.on_unsubscribed.as_ref()
    }
}

impl fmt::Debug for ChannelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDescriptor")
            .field("name", &self.name)
            .field("actions", &self.action_names())
            .field("on_subscribed", &self.on_subscribed.is_some())
            .field("on_unsubscribed", &self.on_unsubscribed.is_some())
            .finish()
    }
}

// ============================================================================
// ChannelBuilder
// ============================================================================

/// Builder for [`ChannelDescriptor`].
pub struct ChannelBuilder {
    descriptor: ChannelDescriptor,
}

impl ChannelBuilder {
    /// Creates a builder with no actions or hooks.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: ChannelDescriptor {
                name: name.into(),
                actions: FxHashMap::default(),
                on_subscribed: None,
                on_unsubscribed: None,
            },
        }
    }

    /// Declares an action. A later declaration with the same name wins.
    #[must_use]
    pub fn action<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut ChannelContext, &Value) -> Result<()> + Send + Sync + 'static,
    {
        self.descriptor
            .actions
            .insert(name.into(), Arc::new(handler));
        self
    }

    /// Sets the `on_subscribed` hook.
    ///
    /// Calling [`ChannelContext::reject`] or returning `Err` rejects the
    /// subscription.
    #[must_use]
    pub fn on_subscribed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ChannelContext) -> Result<()> + Send + Sync + 'static,
    {
        self.descriptor.on_subscribed = Some(Arc::new(hook));
        self
    }

    /// Sets the `on_unsubscribed` hook.
    #[must_use]
    pub fn on_unsubscribed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ChannelContext) -> Result<()> + Send + Sync + 'static,
    {
        self.descriptor.on_unsubscribed = Some(Arc::new(hook));
        self
    }

    /// Finishes the descriptor.
    #[inline]
    #[must_use]
    pub fn build(self) -> ChannelDescriptor {
        self.descriptor
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_actions_and_hooks() {
        let descriptor = ChannelDescriptor::builder("Chat")
            .action("speak", |_, _| Ok(()))
            .action("typing", |_, _| Ok(()))
            .on_subscribed(|_| Ok(()))
            .build();

        assert_eq!(descriptor.name(), "Chat");
        assert_eq!(descriptor.action_names(), vec!["speak", "typing"]);
        assert!(descriptor.has_action("speak"));
        assert!(!descriptor.has_action("shout"));
        assert!(descriptor.action("shout").is_none());
        assert!(descriptor.on_subscribed().is_some());
        assert!(descriptor.on_unsubscribed().is_none());
    }

    #[test]
    fn test_debug_lists_action_names() {
        let descriptor = ChannelDescriptor::builder("Feed")
            .action("refresh", |_, _| Ok(()))
            .build();
        let debug = format!("{descriptor:?}");
        assert!(debug.contains("Feed"));
        assert!(debug.contains("refresh"));
    }
}
