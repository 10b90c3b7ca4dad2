//! Transport layer.
//!
//! A [`Transport`] is one duplex text-message channel to one client: a sink
//! of outbound frames and a stream of inbound messages. The server never
//! looks below that line; WebSocket framing is handled by
//! `tokio-tungstenite`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ws://host:PORT    ┌──────────────┐   Outbox    ┌──────────────┐
//! │  Client      │◄──────────────────►│  Listener    │◄───────────│  Connection  │
//! │  (browser)   │                     │  → Transport │  frames     │  I/O loop    │
//! └──────────────┘                     └──────────────┘             └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `listener` | TCP accept loop and WebSocket upgrade |
//! | `memory` | In-process transport pair |
//! | `outbox` | Per-connection outbound frame queue |
//! | `websocket` | Adapter from a WebSocket stream to [`Transport`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::pin::Pin;

use futures_util::{Sink, SinkExt, Stream};

use crate::error::{Error, Result};

// ============================================================================
// Submodules
// ============================================================================

/// TCP accept loop and WebSocket upgrade.
pub mod listener;

/// In-process transport pair.
pub mod memory;

/// Per-connection outbound frame queue.
pub mod outbox;

/// WebSocket adapter.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use listener::Listener;
pub use memory::Peer;
pub use outbox::Outbox;

// ============================================================================
// Types
// ============================================================================

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half of a transport. Ends when the client goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

// ============================================================================
// Transport
// ============================================================================

/// One duplex message channel to a client.
pub struct Transport {
    /// Outbound text frames.
    sink: FrameSink,
    /// Inbound text messages.
    stream: FrameStream,
}

impl Transport {
    /// Creates a transport from any text sink and stream.
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<String, Error = Error> + Send + 'static,
        St: Stream<Item = Result<String>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Flushes and closes the outbound half.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await
    }

    /// Splits into outbound and inbound halves.
    #[inline]
    pub(crate) fn into_parts(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
