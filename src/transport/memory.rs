//! In-process transport pair.
//!
//! [`pair`] returns the server half as a [`Transport`] and the client half as
//! a [`Peer`]. Useful for embedding the server behind a custom socket layer
//! and for tests.
//!
//! # Example
//!
//! ```ignore
//! let (transport, mut peer) = cable_mux::transport::memory::pair();
//! let connection = server.accept(ConnectRequest::new("/cable"), transport).await?;
//!
//! assert_eq!(peer.recv_json().await, Some(json!({ "type": "welcome" })));
//! peer.send_envelope(&Envelope::subscribe_to("chat-1", "Chat"))?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use futures_util::{sink, stream};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::Envelope;

use super::Transport;

// ============================================================================
// Constructor
// ============================================================================

/// Creates a connected server transport and client peer.
#[must_use]
pub fn pair() -> (Transport, Peer) {
    let (to_server_tx, to_server_rx) = mpsc::unbounded_channel::<String>();
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel::<String>();

    let outbound = sink::unfold(to_client_tx, |tx, text: String| async move {
        tx.send(text).map_err(|_| Error::ConnectionClosed)?;
        Ok::<_, Error>(tx)
    });

    let inbound = stream::unfold(to_server_rx, |mut rx| async move {
        rx.recv().await.map(|text| (Ok::<_, Error>(text), rx))
    });

    let peer = Peer {
        tx: Some(to_server_tx),
        rx: to_client_rx,
    };

    (Transport::new(outbound, inbound), peer)
}

// ============================================================================
// Peer
// ============================================================================

/// Client end of an in-process transport.
#[derive(Debug)]
pub struct Peer {
    /// Client → server. `None` after [`Peer::disconnect`].
    tx: Option<mpsc::UnboundedSender<String>>,
    /// Server → client.
    rx: mpsc::UnboundedReceiver<String>,
}

impl Peer {
    /// Sends raw text to the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if either side has gone away.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or(Error::ConnectionClosed)?
            .send(text.into())
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Sends a command envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if either side has gone away.
    #[inline]
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.send(envelope.encode())
    }

    /// Receives the next frame. `None` once the server closed the transport.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Receives the next frame parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Returns an already-delivered frame without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Closes the client → server direction, as a client hanging up would.
    pub fn disconnect(&mut self) {
        self.tx.take();
    }
}

// ============================================================================
// Tests
// ============================================================================
