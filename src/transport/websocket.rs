//! Adapter from a `tokio-tungstenite` WebSocket stream to [`Transport`].
//!
//! Outbound frames are sent as text messages. Inbound text messages are
//! passed through; binary messages are accepted when they hold UTF-8;
//! ping, pong and close control frames are handled by tungstenite and never
//! surface here.

// ============================================================================
// Imports
// ============================================================================

use futures_util::{SinkExt, StreamExt, future};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use crate::error::Error;

use super::Transport;

// ============================================================================
// Transport::websocket
// ============================================================================

impl Transport {
    /// Wraps an upgraded WebSocket stream.
    pub fn websocket<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_write, ws_read) = ws_stream.split();

        let outbound = ws_write
            .sink_map_err(Error::from)
            .with(|text: String| future::ready(Ok::<_, Error>(Message::Text(text.into()))));

        let inbound = ws_read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        warn!(len = bytes.len(), "Dropping non-UTF-8 binary message");
                        None
                    }
                },
                // Ping, Pong, Close, raw frames
                Ok(_) => None,
                Err(e) => Some(Err(Error::from(e))),
            })
        });

        Self::new(outbound, inbound)
    }
}
