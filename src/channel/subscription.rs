//! Subscription state machine.
//!
//! ```text
//!            on_subscribed ok            unsubscribe / connection close
//! Pending ─────────────────► Subscribed ────────────────────────────────► Unsubscribed
//!    │                                                                        ▲
//!    └──────────────── on_subscribed rejected or failed ─────────────────────┘
//! ```
//!
//! Only a `Subscribed` subscription receives frames. The state lock is held
//! while a delivery is enqueued, so once the transition to `Unsubscribed`
//! returns, no further frame for this subscription enters the outbox.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashSet;
use serde_json::{Map, Value};

use crate::identifiers::ConnectionId;
use crate::protocol::Frame;
use crate::transport::Outbox;

use super::ChannelDescriptor;

// ============================================================================
// SubscriptionState
// ============================================================================

/// Lifecycle state of a [`Subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Created, `on_subscribed` not yet finished.
    Pending,
    /// Live; receives broadcasts and actions.
    Subscribed,
    /// Terminal.
    Unsubscribed,
}

impl SubscriptionState {
    /// Returns `true` if `self → next` is a legal transition.
    #[inline]
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Subscribed)
                | (Self::Pending, Self::Unsubscribed)
                | (Self::Subscribed, Self::Unsubscribed)
        )
    }
}

// ============================================================================
// SubscriptionKey
// ============================================================================

/// Unique key of a subscription across the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Client identifier, unique within the connection.
    pub identifier: String,
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection_id, self.identifier)
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// One connection's live binding to one channel.
///
/// The subscription does not own its connection; it holds the connection's
/// ID and a clone of its [`Outbox`].
pub struct Subscription {
    key: SubscriptionKey,
    channel: Arc<ChannelDescriptor>,
    params: Map<String, Value>,
    outbox: Outbox,
    state: Mutex<SubscriptionState>,
    streams: Mutex<FxHashSet<String>>,
    local: Mutex<Map<String, Value>>,
}

impl Subscription {
    /// Creates a subscription in the `Pending` state.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        identifier: impl Into<String>,
        channel: Arc<ChannelDescriptor>,
        params: Map<String, Value>,
        outbox: Outbox,
    ) -> Self {
        Self {
            key: SubscriptionKey {
                connection_id,
                identifier: identifier.into(),
            },
            channel,
            params,
            outbox,
            state: Mutex::new(SubscriptionState::Pending),
            streams: Mutex::new(FxHashSet::default()),
            local: Mutex::new(Map::new()),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Process-unique key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Client identifier.
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.key.identifier
    }

    /// Owning connection.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.key.connection_id
    }

    /// Channel descriptor.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &Arc<ChannelDescriptor> {
        &self.channel
    }

    /// Channel-type name.
    #[inline]
    #[must_use]
    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    /// Parameters taken from the identifier.
    #[inline]
    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// Returns `true` while `Subscribed`.
    #[inline]
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state() == SubscriptionState::Subscribed
    }

    /// Streams currently streamed, sorted.
    #[must_use]
    pub fn streams(&self) -> Vec<String> {
        let mut streams: Vec<String> = self.streams.lock().iter().cloned().collect();
        streams.sort_unstable();
        streams
    }

    /// Channel-local state.
    #[inline]
    pub fn local_state(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.local.lock()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Moves to `next` if legal. Returns `true` if the state changed.
    pub(crate) fn transition(&self, next: SubscriptionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    /// Records a stream. Returns `true` if it was not already streamed.
    pub(crate) fn add_stream(&self, stream: &str) -> bool {
        self.streams.lock().insert(stream.to_string())
    }

    /// Forgets a stream. Returns `true` if it was streamed.
    pub(crate) fn remove_stream(&self, stream: &str) -> bool {
        self.streams.lock().remove(stream)
    }

    /// Forgets every stream and returns them.
    pub(crate) fn take_streams(&self) -> Vec<String> {
        self.streams.lock().drain().collect()
    }

    /// Drops channel-local state.
    pub(crate) fn clear_local_state(&self) {
        self.local.lock().clear();
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Enqueues a message frame on the owning connection.
    ///
    /// Returns `false` without enqueueing unless the subscription is
    /// `Subscribed` and the connection is still reading.
    pub fn deliver(&self, message: Value) -> bool {
        let state = self.state.lock();
        if *state != SubscriptionState::Subscribed {
            return false;
        }
        self.outbox
            .send(Frame::message(self.key.identifier.clone(), message))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("channel", &self.channel.name())
            .field("state", &self.state())
            .field("streams", &self.streams())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::transport::outbox::Outbound;

    fn subscription() -> (Subscription, tokio::sync::mpsc::UnboundedReceiver<Outbound>) {
        let (outbox, rx) = Outbox::channel();
        let channel = Arc::new(ChannelDescriptor::builder("Chat").build());
        let sub = Subscription::new(ConnectionId::next(), "chat-1", channel, Map::new(), outbox);
        (sub, rx)
    }

    #[test]
    fn test_legal_transitions() {
        use SubscriptionState::*;

        assert!(Pending.can_transition_to(Subscribed));
        assert!(Pending.can_transition_to(Unsubscribed));
        assert!(Subscribed.can_transition_to(Unsubscribed));
        assert!(!Unsubscribed.can_transition_to(Subscribed));
        assert!(!Unsubscribed.can_transition_to(Unsubscribed));
        assert!(!Subscribed.can_transition_to(Pending));
    }

    #[test]
    fn test_transition_is_terminal() {
        let (sub, _rx) = subscription();
        assert_eq!(sub.state(), SubscriptionState::Pending);

        assert!(sub.transition(SubscriptionState::Subscribed));
        assert!(sub.transition(SubscriptionState::Unsubscribed));
        assert!(!sub.transition(SubscriptionState::Unsubscribed));
        assert!(!sub.transition(SubscriptionState::Subscribed));
    }

    #[test]
    fn test_deliver_only_while_subscribed() {
        let (sub, mut rx) = subscription();

        assert!(!sub.deliver(json!("early")));
        sub.transition(SubscriptionState::Subscribed);
        assert!(sub.deliver(json!("on time")));
        sub.transition(SubscriptionState::Unsubscribed);
        assert!(!sub.deliver(json!("late")));

        match rx.try_recv() {
            Ok(Outbound::Frame(frame)) => {
                assert_eq!(frame, Frame::message("chat-1", json!("on time")));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stream_bookkeeping() {
        let (sub, _rx) = subscription();

        assert!(sub.add_stream("b"));
        assert!(sub.add_stream("a"));
        assert!(!sub.add_stream("a"));
        assert_eq!(sub.streams(), vec!["a", "b"]);

        assert!(sub.remove_stream("a"));
        assert!(!sub.remove_stream("a"));

        let mut rest = sub.take_streams();
        rest.sort();
        assert_eq!(rest, vec!["b"]);
        assert!(sub.streams().is_empty());
    }

    #[test]
    fn test_local_state() {
        let (sub, _rx) = subscription();
        sub.local_state().insert("count".into(), json!(1));
        assert_eq!(sub.local_state().get("count"), Some(&json!(1)));

        sub.clear_local_state();
        assert!(sub.local_state().is_empty());
    }
}
