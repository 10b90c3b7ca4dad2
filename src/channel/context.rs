//! Handler capability object.
//!
//! Every action and hook receives a [`ChannelContext`]. Reads (identity,
//! params, channel-local state) happen immediately. Stream changes,
//! transmissions and broadcasts are recorded as effects and applied by the
//! owning connection, in request order, once the handler has returned `Ok`.
//! A handler that fails leaves no recorded effects behind. Writes through
//! [`ChannelContext::state`] are not recorded and persist either way.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::MutexGuard;
use serde_json::{Map, Value};

use crate::identity::Identity;

use super::Subscription;

// ============================================================================
// Effect
// ============================================================================

/// A deferred side effect requested by a handler.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    /// Start receiving broadcasts on a stream.
    StreamFrom(String),
    /// Stop receiving broadcasts on a stream.
    StopStreamFrom(String),
    /// Stop receiving broadcasts on every stream.
    StopAllStreams,
    /// Send a message to this subscription's client only.
    Transmit(Value),
    /// Publish a payload to a stream.
    Broadcast(String, Value),
}

impl Effect {
    /// Returns `true` for effects that change which streams are followed.
    #[inline]
    #[must_use]
    pub(crate) fn is_stream_change(&self) -> bool {
        matches!(
            self,
            Self::StreamFrom(_) | Self::StopStreamFrom(_) | Self::StopAllStreams
        )
    }
}

// ============================================================================
// ChannelContext
// ============================================================================

/// Capabilities available to channel actions and hooks.
pub struct ChannelContext {
    subscription: Arc<Subscription>,
    identity: Arc<Identity>,
    effects: Vec<Effect>,
    rejected: bool,
}

impl ChannelContext {
    /// Creates a context for one handler invocation.
    pub(crate) fn new(subscription: Arc<Subscription>, identity: Arc<Identity>) -> Self {
        Self {
            subscription,
            identity,
            effects: Vec::new(),
            rejected: false,
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Identity of the connection.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Subscription identifier.
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.subscription.identifier()
    }

    /// Channel-type name.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &str {
        self.subscription.channel_name()
    }

    /// Identifier parameters.
    #[inline]
    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        self.subscription.params()
    }

    /// One identifier parameter.
    #[inline]
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.subscription.params().get(key)
    }

    /// Channel-local state, mutable for the lifetime of the guard.
    ///
    /// Writes take effect immediately, even if the handler later fails.
    #[inline]
    pub fn state(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.subscription.local_state()
    }

    /// Streams this subscription is streaming before this handler's effects
    /// are applied.
    #[inline]
    #[must_use]
    pub fn streams(&self) -> Vec<String> {
        self.subscription.streams()
    }

    // ========================================================================
    // Effects
    // ========================================================================

    /// Starts streaming broadcasts published to `stream`.
    pub fn stream_from(&mut self, stream: impl Into<String>) {
        self.effects.push(Effect::StreamFrom(stream.into()));
    }

    /// Stops streaming `stream`.
    pub fn stop_stream_from(&mut self, stream: impl Into<String>) {
        self.effects.push(Effect::StopStreamFrom(stream.into()));
    }

    /// Stops streaming every stream.
    pub fn stop_all_streams(&mut self) {
        self.effects.push(Effect::StopAllStreams);
    }

    /// Sends `message` to this subscription's client only.
    pub fn transmit(&mut self, message: Value) {
        self.effects.push(Effect::Transmit(message));
    }

    /// Publishes `payload` to every subscriber of `stream`, on every server
    /// sharing the backend.
    pub fn broadcast(&mut self, stream: impl Into<String>, payload: Value) {
        self.effects.push(Effect::Broadcast(stream.into(), payload));
    }

    /// Rejects the subscription. Only meaningful inside `on_subscribed`.
    #[inline]
    pub fn reject(&mut self) {
        self.rejected = true;
    }

    /// Returns `true` after [`ChannelContext::reject`].
    #[inline]
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    /// Consumes the context, returning recorded effects and the reject flag.
    pub(crate) fn into_effects(self) -> (Vec<Effect>, bool) {
        (self.effects, self.rejected)
    }
}

// ============================================================================
// Tests
// ============================================================================
