//! Per-connection outbound frame queue.
//!
//! Everything written to a client goes through its [`Outbox`]: frames from
//! command handling, broadcast deliveries from the relay, and the final close
//! signal. The connection's I/O loop is the only reader, so frames reach the
//! transport in enqueue order.

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::mpsc;

use crate::protocol::Frame;

// ============================================================================
// Outbound
// ============================================================================

/// Item consumed by the connection I/O loop.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Write a frame.
    Frame(Frame),
    /// Stop the I/O loop after everything queued before it is written.
    Close,
}

// ============================================================================
// Outbox
// ============================================================================

/// Cloneable handle for enqueueing frames to one connection.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Outbox {
    /// Creates an outbox and the receiver drained by the I/O loop.
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueues a frame. Returns `false` if the connection is gone.
    #[inline]
    pub fn send(&self, frame: Frame) -> bool {
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    /// Asks the I/O loop to finish.
    #[inline]
    pub(crate) fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// Returns `true` once the I/O loop has stopped reading.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_keep_order() {
        let (outbox, mut rx) = Outbox::channel();
        assert!(outbox.send(Frame::Welcome));
        assert!(outbox.send(Frame::confirm("a")));
        outbox.close();

        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(Frame::Welcome))));
        assert!(matches!(
            rx.try_recv(),
            Ok(Outbound::Frame(Frame::ConfirmSubscription { .. }))
        ));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (outbox, rx) = Outbox::channel();
        drop(rx);
        assert!(outbox.is_closed());
        assert!(!outbox.send(Frame::Welcome));
    }
}
