//! Stream relay.
//!
//! The relay holds at most one backend subscription per stream name on this
//! process, regardless of how many local subscriptions stream it. The
//! backend subscription is opened on the first local interest and torn down
//! when the last one goes away.
//!
//! Each backend subscription is drained by a fan-in task. Payloads for one
//! stream are handed to local subscriptions in the order the backend
//! yielded them. When the backend subscription fails or ends while there is
//! still interest, the task resubscribes with exponential backoff.

// ============================================================================
// Imports
// ============================================================================

use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::channel::{Subscription, SubscriptionKey};
use crate::error::Result;

use super::PubSubBackend;

// ============================================================================
// Backoff
// ============================================================================

/// Exponential resubscribe delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5))
    }
}

impl Backoff {
    /// Creates a backoff policy.
    #[inline]
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

// ============================================================================
// StreamEntry
// ============================================================================

/// Local interest in one stream and the task feeding it.
struct StreamEntry {
    /// Distinguishes this entry from a later one for the same name.
    generation: u64,
    interest: FxHashMap<SubscriptionKey, Arc<Subscription>>,
    /// Flips to `true` after the first backend subscribe attempt.
    ready: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

type StreamMap = Mutex<FxHashMap<String, StreamEntry>>;

// ============================================================================
// Relay
// ============================================================================

/// Bridges backend streams to local subscriptions.
pub struct Relay {
    backend: Arc<dyn PubSubBackend>,
    backoff: Backoff,
    streams: Arc<StreamMap>,
    next_generation: AtomicU64,
}

impl Relay {
    /// Creates a relay over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn PubSubBackend>, backoff: Backoff) -> Self {
        Self {
            backend,
            backoff,
            streams: Arc::new(Mutex::new(FxHashMap::default())),
            next_generation: AtomicU64::new(1),
        }
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Publishes `payload` to `stream` through the backend.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn publish(&self, stream: &str, payload: Value) -> Result<()> {
        trace!(stream, "Publishing");
        self.backend.publish(stream, payload).await
    }

    // ========================================================================
    // Interest
    // ========================================================================

    /// Adds `subscription` to the audience of `stream`.
    ///
    /// Opens the backend subscription if this is the first local interest,
    /// and returns once the first subscribe attempt has finished, so a
    /// publish issued afterwards is not missed on a healthy backend.
    pub async fn add_interest(&self, stream: &str, subscription: &Arc<Subscription>) {
        let mut ready = {
            let mut streams = self.streams.lock();
            let entry = match streams.entry(stream.to_string()) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let (ready_tx, ready_rx) = watch::channel(false);
                    let task = self.spawn_fan_in(stream.to_string(), generation, ready_tx);
                    debug!(stream, "Stream opened");
                    vacant.insert(StreamEntry {
                        generation,
                        interest: FxHashMap::default(),
                        ready: ready_rx,
                        task,
                    })
                }
            };
            entry
                .interest
                .insert(subscription.key().clone(), Arc::clone(subscription));
            entry.ready.clone()
        };

        // Err means the task is gone, which only happens on teardown.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Removes `key` from the audience of `stream`.
    ///
    /// Tears down the backend subscription when no interest remains.
    /// Returns `true` if `key` was in the audience.
    pub fn remove_interest(&self, stream: &str, key: &SubscriptionKey) -> bool {
        let mut streams = self.streams.lock();

        let Some(entry) = streams.get_mut(stream) else {
            return false;
        };
        let removed = entry.interest.remove(key).is_some();
        let idle = entry.interest.is_empty();

        if idle && let Some(entry) = streams.remove(stream) {
            entry.task.abort();
            debug!(stream, "Stream closed");
        }

        removed
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of streams with local interest.
    #[inline]
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Number of local subscriptions streaming `stream`.
    #[must_use]
    pub fn interest_count(&self, stream: &str) -> usize {
        self.streams
            .lock()
            .get(stream)
            .map_or(0, |entry| entry.interest.len())
    }

    /// Returns `true` if `key` streams `stream`.
    #[must_use]
    pub fn is_streaming(&self, stream: &str, key: &SubscriptionKey) -> bool {
        self.streams
            .lock()
            .get(stream)
            .is_some_and(|entry| entry.interest.contains_key(key))
    }

    /// Names of streams with local interest, sorted.
    #[must_use]
    pub fn streams(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Drops all interest and stops every fan-in task.
    pub fn shutdown(&self) {
        let entries: Vec<(String, StreamEntry)> = self.streams.lock().drain().collect();
        for (stream, entry) in entries {
            entry.task.abort();
            trace!(stream = %stream, "Stream closed on shutdown");
        }
    }

    // ========================================================================
    // Fan-in
    // ========================================================================

    /// Spawns the task that drains the backend subscription for `stream`.
    fn spawn_fan_in(
        &self,
        stream: String,
        generation: u64,
        ready: watch::Sender<bool>,
    ) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let streams = Arc::downgrade(&self.streams);
        let backoff = self.backoff;

        tokio::spawn(async move {
            let mut attempt: u32 = 0;

            loop {
                match backend.subscribe(&stream).await {
                    Ok(mut payloads) => {
                        ready.send_replace(true);
                        trace!(stream = %stream, "Backend subscription open");

                        while let Some(item) = payloads.next().await {
                            match item {
                                Ok(payload) => {
                                    attempt = 0;
                                    if !fan_out(&streams, &stream, generation, &payload) {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!(stream = %stream, error = %e, "Backend subscription failed");
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        ready.send_replace(true);
                        warn!(stream = %stream, error = %e, "Backend subscribe failed");
                    }
                }

                let delay = backoff.delay(attempt);
                attempt = attempt.saturating_add(1);
                warn!(
                    stream = %stream,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Resubscribing to backend"
                );
                tokio::time::sleep(delay).await;
            }
        })
    }
}

/// Hands `payload` to every subscription currently streaming `stream`.
///
/// Returns `false` once the entry this task feeds is gone.
fn fan_out(streams: &Weak<StreamMap>, stream: &str, generation: u64, payload: &Value) -> bool {
    let Some(streams) = streams.upgrade() else {
        return false;
    };

    let targets: Vec<Arc<Subscription>> = {
        let streams = streams.lock();
        match streams.get(stream) {
            Some(entry) if entry.generation == generation => {
                entry.interest.values().cloned().collect()
            }
            _ => return false,
        }
    };

    trace!(stream, subscribers = targets.len(), "Fan-out");
    for subscription in targets {
        subscription.deliver(payload.clone());
    }
    true
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("backoff", &self.backoff)
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

    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    use crate::broadcast::{MemoryPubSub, PayloadStream};
    use crate::channel::{ChannelDescriptor, SubscriptionState};
    use crate::error::Error;
    use crate::identifiers::ConnectionId;
    use crate::protocol::Frame;
    use crate::transport::Outbox;
    use crate::transport::outbox::Outbound;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(5), Duration::from_millis(20))
    }

    fn subscription(identifier: &str) -> (Arc<Subscription>, UnboundedReceiver<Outbound>) {
        let (outbox, rx) = Outbox::channel();
        let sub = Arc::new(Subscription::new(
            ConnectionId::next(),
            identifier,
            Arc::new(ChannelDescriptor::builder("Chat").build()),
            serde_json::Map::new(),
            outbox,
        ));
        sub.transition(SubscriptionState::Subscribed);
        (sub, rx)
    }

    async fn next_message(rx: &mut UnboundedReceiver<Outbound>) -> Option<Value> {
        match timeout(WAIT, rx.recv()).await {
            Ok(Some(Outbound::Frame(Frame::Message { message, .. }))) => Some(message),
            _ => None,
        }
    }

    /// Counts subscribe calls and delegates to memory.
    #[derive(Default)]
    struct CountingBackend {
        inner: MemoryPubSub,
        subscribes: AtomicUsize,
    }

    #[async_trait]
    impl PubSubBackend for CountingBackend {
        async fn publish(&self, stream: &str, payload: Value) -> Result<()> {
            self.inner.publish(stream, payload).await
        }

        async fn subscribe(&self, stream: &str) -> Result<PayloadStream> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            self.inner.subscribe(stream).await
        }
    }

    /// Fails the first `failures` subscribe calls.
    struct FlakyBackend {
        inner: MemoryPubSub,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl PubSubBackend for FlakyBackend {
        async fn publish(&self, stream: &str, payload: Value) -> Result<()> {
            self.inner.publish(stream, payload).await
        }

        async fn subscribe(&self, stream: &str) -> Result<PayloadStream> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::backend(stream, "connection refused"));
            }
            self.inner.subscribe(stream).await
        }
    }

    /// Refuses everything.
    struct DownBackend;

    #[async_trait]
    impl PubSubBackend for DownBackend {
        async fn publish(&self, stream: &str, _payload: Value) -> Result<()> {
            Err(Error::backend(stream, "down"))
        }

        async fn subscribe(&self, stream: &str) -> Result<PayloadStream> {
            Err(Error::backend(stream, "down"))
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_fan_out_to_all_interested() {
        let relay = Relay::new(Arc::new(MemoryPubSub::new()), fast_backoff());
        let (a, mut a_rx) = subscription("a");
        let (b, mut b_rx) = subscription("b");

        relay.add_interest("room_5", &a).await;
        relay.add_interest("room_5", &b).await;
        assert_eq!(relay.interest_count("room_5"), 2);

        relay.publish("room_5", json!({ "text": "hi" })).await.expect("publish");

        assert_eq!(next_message(&mut a_rx).await, Some(json!({ "text": "hi" })));
        assert_eq!(next_message(&mut b_rx).await, Some(json!({ "text": "hi" })));
    }

    #[tokio::test]
    async fn test_one_backend_subscription_per_stream() {
        let backend = Arc::new(CountingBackend::default());
        let relay = Relay::new(Arc::clone(&backend) as Arc<dyn PubSubBackend>, fast_backoff());

        let subs: Vec<_> = (0..5).map(|i| subscription(&format!("s{i}"))).collect();
        for (sub, _) in &subs {
            relay.add_interest("room_5", sub).await;
        }

        assert_eq!(backend.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(relay.stream_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_isolation() {
        let relay = Relay::new(Arc::new(MemoryPubSub::new()), fast_backoff());
        let (five, mut five_rx) = subscription("five");
        let (six, mut six_rx) = subscription("six");

        relay.add_interest("room_5", &five).await;
        relay.add_interest("room_6", &six).await;

        relay.publish("room_6", json!("six only")).await.expect("publish");
        assert_eq!(next_message(&mut six_rx).await, Some(json!("six only")));
        assert!(five_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_payload_order_preserved() {
        let relay = Relay::new(Arc::new(MemoryPubSub::new()), fast_backoff());
        let (sub, mut rx) = subscription("ordered");
        relay.add_interest("ticks", &sub).await;

        for i in 0..50 {
            relay.publish("ticks", json!(i)).await.expect("publish");
        }
        for i in 0..50 {
            assert_eq!(next_message(&mut rx).await, Some(json!(i)));
        }
    }

    #[tokio::test]
    async fn test_last_interest_closes_stream() {
        let backend = Arc::new(MemoryPubSub::new());
        let relay = Relay::new(Arc::clone(&backend) as Arc<dyn PubSubBackend>, fast_backoff());
        let (a, _a_rx) = subscription("a");
        let (b, _b_rx) = subscription("b");

        relay.add_interest("room_5", &a).await;
        relay.add_interest("room_5", &b).await;

        assert!(relay.remove_interest("room_5", a.key()));
        assert_eq!(relay.stream_count(), 1);
        assert!(!relay.is_streaming("room_5", a.key()));
        assert!(relay.is_streaming("room_5", b.key()));

        assert!(relay.remove_interest("room_5", b.key()));
        assert_eq!(relay.stream_count(), 0);
        assert!(!relay.remove_interest("room_5", b.key()));

        // Aborted fan-in drops its receiver.
        timeout(WAIT, async {
            while backend.topic_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("backend topic released");
        assert_eq!(backend.subscriber_count("room_5"), 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_subscription_is_skipped() {
        let relay = Relay::new(Arc::new(MemoryPubSub::new()), fast_backoff());
        let (live, mut live_rx) = subscription("live");
        let (gone, mut gone_rx) = subscription("gone");

        relay.add_interest("room_5", &live).await;
        relay.add_interest("room_5", &gone).await;
        gone.transition(SubscriptionState::Unsubscribed);

        relay.publish("room_5", json!("x")).await.expect("publish");
        assert_eq!(next_message(&mut live_rx).await, Some(json!("x")));
        assert!(gone_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resubscribes_after_backend_failure() {
        let backend = Arc::new(FlakyBackend {
            inner: MemoryPubSub::new(),
            failures: AtomicUsize::new(2),
        });
        let relay = Relay::new(Arc::clone(&backend) as Arc<dyn PubSubBackend>, fast_backoff());
        let (sub, mut rx) = subscription("retry");

        relay.add_interest("room_5", &sub).await;

        let received = timeout(WAIT, async {
            loop {
                relay.publish("room_5", json!("late")).await.expect("publish");
                tokio::time::sleep(Duration::from_millis(10)).await;
                if let Ok(Outbound::Frame(Frame::Message { message, .. })) = rx.try_recv() {
                    return message;
                }
            }
        })
        .await
        .expect("delivered after resubscribe");

        assert_eq!(received, json!("late"));
        assert_eq!(backend.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_publish_error_propagates() {
        let relay = Relay::new(Arc::new(DownBackend), fast_backoff());
        let err = relay.publish("room_5", json!(1)).await.unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
    }

    #[tokio::test]
    async fn test_add_interest_returns_when_backend_down() {
        let relay = Relay::new(Arc::new(DownBackend), fast_backoff());
        let (sub, _rx) = subscription("down");

        timeout(WAIT, relay.add_interest("room_5", &sub))
            .await
            .expect("add_interest does not hang");
        assert_eq!(relay.interest_count("room_5"), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drops_everything() {
        let relay = Relay::new(Arc::new(MemoryPubSub::new()), fast_backoff());
        let (sub, _rx) = subscription("a");
        relay.add_interest("room_5", &sub).await;
        relay.add_interest("room_6", &sub).await;
        assert_eq!(relay.streams(), vec!["room_5", "room_6"]);

        relay.shutdown();
        assert_eq!(relay.stream_count(), 0);
    }
}
