//! Pub/sub backend abstraction.
//!
//! The relay talks to the outside world through [`PubSubBackend`]. A backend
//! shared between several server processes (Redis, NATS, Postgres
//! `LISTEN/NOTIFY`) makes broadcasts cross-instance; [`MemoryPubSub`] keeps
//! them inside one process.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default per-topic buffer of [`MemoryPubSub`].
const DEFAULT_CAPACITY: usize = 1024;

// ============================================================================
// Types
// ============================================================================

/// Payloads received on one backend subscription.
///
/// An `Err` item or the end of the stream tells the relay to resubscribe.
pub type PayloadStream = BoxStream<'static, Result<Value>>;

/// Topic name to its live channel.
type Topics = Mutex<FxHashMap<String, Topic>>;

// ============================================================================
// PubSubBackend
// ============================================================================

/// Cross-process publish/subscribe by stream name.
#[async_trait]
pub trait PubSubBackend: Send + Sync + 'static {
    /// Publishes `payload` to every subscriber of `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the backend refused the payload.
    async fn publish(&self, stream: &str, payload: Value) -> Result<()>;

    /// Opens a subscription to `stream`.
    ///
    /// Payloads published after this returns are yielded in publish order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the subscription could not be opened.
    async fn subscribe(&self, stream: &str) -> Result<PayloadStream>;
}

// ============================================================================
// MemoryPubSub
// ============================================================================

/// In-process backend over tokio broadcast channels.
///
/// A subscriber that falls more than `capacity` payloads behind receives an
/// [`Error::Backend`] and is expected to resubscribe.
#[derive(Debug)]
pub struct MemoryPubSub {
    capacity: usize,
    /// Topics with at least one open [`PayloadStream`].
    topics: Arc<Topics>,
    /// Source of [`Topic::id`].
    next_topic_id: AtomicU64,
}

/// One live topic channel.
#[derive(Debug)]
struct Topic {
    /// Distinguishes a recreated topic from the one a receiver belongs to.
    id: u64,
    tx: broadcast::Sender<Value>,
}

/// Receiving end of one subscription.
///
/// Dropping the last receiver of a topic removes the topic.
struct TopicReceiver {
    name: String,
    topic_id: u64,
    rx: broadcast::Receiver<Value>,
    topics: Weak<Topics>,
}

impl Drop for TopicReceiver {
    fn drop(&mut self) {
        let Some(topics) = self.topics.upgrade() else {
            return;
        };
        let mut topics = topics.lock();

        // `self.rx` is still alive here, so a count of 1 means only us.
        let last = topics
            .get(&self.name)
            .is_some_and(|topic| topic.id == self.topic_id && topic.tx.receiver_count() <= 1);
        if last {
            topics.remove(&self.name);
            trace!(stream = %self.name, "Topic dropped");
        }
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryPubSub {
    /// Creates a backend with the default per-topic buffer.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend buffering up to `capacity` payloads per topic.
    ///
    /// A `capacity` of 0 is treated as 1.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Arc::new(Mutex::new(FxHashMap::default())),
            next_topic_id: AtomicU64::new(0),
        }
    }

    /// Number of topics with at least one open subscription.
    #[inline]
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.lock().len()
    }

    /// Number of open subscriptions to `stream`.
    #[must_use]
    pub fn subscriber_count(&self, stream: &str) -> usize {
        self.topics
            .lock()
            .get(stream)
            .map_or(0, |topic| topic.tx.receiver_count())
    }
}

#[async_trait]
impl PubSubBackend for MemoryPubSub {
    async fn publish(&self, stream: &str, payload: Value) -> Result<()> {
        let mut topics = self.topics.lock();

        let Some(topic) = topics.get(stream) else {
            trace!(stream, "Publish with no subscribers");
            return Ok(());
        };

        if topic.tx.send(payload).is_err() {
            // Every receiver is gone.
            topics.remove(stream);
        }

        Ok(())
    }

    async fn subscribe(&self, stream: &str) -> Result<PayloadStream> {
        let receiver = {
            let mut topics = self.topics.lock();
            let topic = topics.entry(stream.to_string()).or_insert_with(|| Topic {
                id: self.next_topic_id.fetch_add(1, Ordering::Relaxed),
                tx: broadcast::channel(self.capacity).0,
            });

            TopicReceiver {
                name: stream.to_string(),
                topic_id: topic.id,
                rx: topic.tx.subscribe(),
                topics: Arc::downgrade(&self.topics),
            }
        };

        let payloads = stream::unfold(receiver, |mut receiver| async move {
            match receiver.rx.recv().await {
                Ok(payload) => Some((Ok(payload), receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    let error = Error::backend(
                        receiver.name.as_str(),
                        format!("subscriber lagged by {skipped}"),
                    );
                    Some((Err(error), receiver))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });

        Ok(Box::pin(payloads))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let backend = MemoryPubSub::new();
        let mut a = backend.subscribe("room_5").await.expect("subscribe");
        let mut b = backend.subscribe("room_5").await.expect("subscribe");
        assert_eq!(backend.subscriber_count("room_5"), 2);

        backend.publish("room_5", json!(1)).await.expect("publish");
        backend.publish("room_5", json!(2)).await.expect("publish");

        for payloads in [&mut a, &mut b] {
            assert_eq!(payloads.next().await.expect("item").expect("ok"), json!(1));
            assert_eq!(payloads.next().await.expect("item").expect("ok"), json!(2));
        }
    }

    #[tokio::test]
    async fn test_streams_are_isolated() {
        let backend = MemoryPubSub::new();
        let mut room = backend.subscribe("room_5").await.expect("subscribe");
        let _other = backend.subscribe("room_6").await.expect("subscribe");

        backend.publish("room_6", json!("elsewhere")).await.expect("publish");
        backend.publish("room_5", json!("here")).await.expect("publish");

        assert_eq!(room.next().await.expect("item").expect("ok"), json!("here"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let backend = MemoryPubSub::new();
        backend.publish("nobody", json!(null)).await.expect("publish");
        assert_eq!(backend.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_topic_dropped_after_last_subscriber() {
        let backend = MemoryPubSub::new();
        let payloads = backend.subscribe("room_5").await.expect("subscribe");
        assert_eq!(backend.topic_count(), 1);

        drop(payloads);
        assert_eq!(backend.topic_count(), 0);
        assert_eq!(backend.subscriber_count("room_5"), 0);
        backend.publish("room_5", json!(1)).await.expect("publish");
    }

    #[tokio::test]
    async fn test_topic_kept_while_any_subscriber_remains() {
        let backend = MemoryPubSub::new();
        let first = backend.subscribe("room_5").await.expect("subscribe");
        let mut second = backend.subscribe("room_5").await.expect("subscribe");

        drop(first);
        assert_eq!(backend.topic_count(), 1);

        backend.publish("room_5", json!("still here")).await.expect("publish");
        assert_eq!(second.next().await.expect("item").expect("ok"), json!("still here"));

        drop(second);
        assert_eq!(backend.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_per_user_topics_do_not_accumulate() {
        let backend = MemoryPubSub::new();

        for i in 0..100 {
            let payloads = backend
                .subscribe(&format!("notifications_{i}"))
                .await
                .expect("subscribe");
            drop(payloads);
        }

        assert_eq!(backend.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_gets_backend_error() {
        let backend = MemoryPubSub::with_capacity(2);
        let mut payloads = backend.subscribe("firehose").await.expect("subscribe");

        for i in 0..5 {
            backend.publish("firehose", json!(i)).await.expect("publish");
        }

        let first = payloads.next().await.expect("item");
        assert!(matches!(first, Err(Error::Backend { stream, .. }) if stream == "firehose"));
    }
}
