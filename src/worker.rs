//! Bounded worker pool with per-connection FIFO ordering.
//!
//! Every unit of work is tagged with a [`ConnectionId`]. Units sharing a key
//! run one at a time in submission order; units with different keys run in
//! parallel, up to the pool size.
//!
//! # Architecture
//!
//! ```text
//! submit(conn-1, u1) ─┐
//! submit(conn-1, u2) ─┼─► queue conn-1 ─┐
//! submit(conn-2, u3) ─┼─► queue conn-2 ─┼─► slots (Semaphore, N permits)
//! submit(conn-3, u4) ─┘─► queue conn-3 ─┘
//! ```
//!
//! Each key gets a lightweight drain task that takes one permit per unit.
//! User channel code inside a unit is expected to go through [`blocking`],
//! so a handler that blocks occupies its slot and nothing else.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::FutureExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{Semaphore, mpsc};
use tracing::{error, trace};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

// ============================================================================
// Types
// ============================================================================

/// A unit of work.
pub type Work = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

// ============================================================================
// WorkerPool
// ============================================================================

/// Executes units of work with per-key ordering and bounded concurrency.
pub struct WorkerPool {
    /// Number of concurrent slots.
    size: usize,
    /// One permit per slot.
    slots: Arc<Semaphore>,
    /// Queue sender per key with pending or future work.
    queues: Mutex<FxHashMap<ConnectionId, mpsc::UnboundedSender<Work>>>,
    /// Set by [`WorkerPool::shutdown`].
    closed: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool with `size` concurrent slots.
    ///
    /// A `size` of 0 is treated as 1.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            slots: Arc::new(Semaphore::new(size)),
            queues: Mutex::new(FxHashMap::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the number of slots.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of keys with an open queue.
    #[inline]
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    /// Returns `true` after [`WorkerPool::shutdown`].
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Submits a unit of work for `key`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolClosed`] after shutdown.
    pub fn submit<F>(&self, key: ConnectionId, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let mut work: Work = Box::pin(work);
        let mut queues = self.queues.lock();

        if let Some(tx) = queues.get(&key) {
            match tx.send(work) {
                Ok(()) => return Ok(()),
                // Drain task is gone; start a fresh queue below.
                Err(mpsc::error::SendError(returned)) => work = returned,
            }
        }

        let tx = self.spawn_queue(key);
        tx.send(work).map_err(|_| Error::PoolClosed)?;
        queues.insert(key, tx);
        Ok(())
    }

    /// Closes the queue for `key` once its submitted work has drained.
    ///
    /// Call only after the key's final unit has been submitted; a later
    /// `submit` for the same key starts a new, independent queue.
    pub fn release(&self, key: ConnectionId) {
        if self.queues.lock().remove(&key).is_some() {
            trace!(connection_id = %key, "Worker queue released");
        }
    }

    /// Rejects new submissions. Already queued work still runs.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let drained = {
            let mut queues = self.queues.lock();
            queues.drain().count()
        };
        trace!(queues = drained, "Worker pool shut down");
    }

    /// Spawns the drain task for one key.
    fn spawn_queue(&self, key: ConnectionId) -> mpsc::UnboundedSender<Work> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Work>();
        let slots = Arc::clone(&self.slots);

        tokio::spawn(async move {
            while let Some(work) = rx.recv().await {
                let Ok(_permit) = slots.acquire().await else {
                    break;
                };

                if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
                    error!(
                        connection_id = %key,
                        panic = %panic_message(panic.as_ref()),
                        "Worker unit panicked"
                    );
                }
            }

            trace!(connection_id = %key, "Worker queue drained");
        });

        tx
    }
}

// ============================================================================
// Blocking Execution
// ============================================================================

/// Runs blocking user code on the blocking thread pool.
///
/// Called from inside a pool unit, so the caller's slot stays occupied for
/// the duration.
///
/// # Errors
///
/// Returns [`Error::Handler`] if `f` panics.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        if e.is_panic() {
            Error::handler(format!("handler panicked: {}", panic_message(e.into_panic().as_ref())))
        } else {
            Error::handler("handler cancelled")
        }
    })
}

/// Extracts a readable message from a panic payload.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn key(n: u64) -> ConnectionId {
        ConnectionId::from_u64(n).expect("non-zero")
    }

    async fn flush(pool: &WorkerPool, k: ConnectionId) {
        let (tx, rx) = oneshot::channel();
        pool.submit(k, async move {
            let _ = tx.send(());
        })
        .expect("submit");
        timeout(Duration::from_secs(5), rx)
            .await
            .expect("flush timed out")
            .expect("flush dropped");
    }

    #[tokio::test]
    async fn test_same_key_runs_in_order() {
        let pool = WorkerPool::new(4);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = Arc::clone(&seen);
            pool.submit(key(1), async move {
                tokio::task::yield_now().await;
                seen.lock().push(i);
            })
            .expect("submit");
        }
        flush(&pool, key(1)).await;

        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_different_keys_run_in_parallel() {
        let pool = WorkerPool::new(2);
        let (tx, rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        // Key 1 waits for key 2; a globally serial pool would deadlock.
        pool.submit(key(1), async move {
            let _ = rx.await;
            let _ = done_tx.send(());
        })
        .expect("submit");
        pool.submit(key(2), async move {
            let _ = tx.send(());
        })
        .expect("submit");

        timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("keys did not run in parallel")
            .expect("dropped");
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(1);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for k in 1..=4 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            pool.submit(key(k), async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
            .expect("submit");
        }
        for k in 1..=4 {
            flush(&pool, key(k)).await;
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let pool = WorkerPool::new(1);
        pool.submit(key(1), async {
            if true {
                panic!("boom");
            }
        })
        .expect("submit");

        // The same queue keeps working after a panicking unit.
        flush(&pool, key(1)).await;
    }

    #[tokio::test]
    async fn test_blocking_maps_panic_to_handler_error() {
        let result = blocking(|| -> u32 { panic!("nope") }).await;
        match result {
            Err(Error::Handler { message }) => assert!(message.contains("nope")),
            other => panic!("unexpected: {other:?}"),
        }

        assert_eq!(blocking(|| 7).await.expect("value"), 7);
    }

    #[tokio::test]
    async fn test_release_and_shutdown() {
        let pool = WorkerPool::new(2);
        flush(&pool, key(1)).await;
        assert_eq!(pool.queue_count(), 1);

        pool.release(key(1));
        assert_eq!(pool.queue_count(), 0);

        pool.shutdown();
        assert!(pool.is_closed());
        assert!(matches!(pool.submit(key(2), async {}), Err(Error::PoolClosed)));
    }

    #[test]
    fn test_zero_size_becomes_one() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_per_key_order_is_preserved(keys in proptest::collection::vec(1u64..5, 1..80)) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .expect("runtime");

            let observed = rt.block_on(async {
                let pool = WorkerPool::new(3);
                let log = Arc::new(Mutex::new(Vec::new()));

                for (seq, k) in keys.iter().enumerate() {
                    let log = Arc::clone(&log);
                    let k = *k;
                    pool.submit(key(k), async move {
                        if seq % 3 == 0 {
                            tokio::task::yield_now().await;
                        }
                        log.lock().push((k, seq));
                    })
                    .expect("submit");
                }
                for k in 1..5 {
                    flush(&pool, key(k)).await;
                }

                let log = log.lock().clone();
                log
            });

            prop_assert_eq!(observed.len(), keys.len());
            for k in 1..5u64 {
                let order: Vec<usize> = observed
                    .iter()
                    .filter(|(key, _)| *key == k)
                    .map(|(_, seq)| *seq)
                    .collect();
                let mut sorted = order.clone();
                sorted.sort_unstable();
                prop_assert_eq!(order, sorted);
            }
        }
    }
}
