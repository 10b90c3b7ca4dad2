//! TCP accept loop and WebSocket upgrade.
//!
//! # Example
//!
//! ```ignore
//! let listener = Listener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
//! listener.serve(server.clone())?;
//! println!("WebSocket URL: {}", listener.ws_url());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identity::ConnectRequest;
use crate::server::Server;

use super::Transport;

// ============================================================================
// Types
// ============================================================================

/// Outcome of the upgrade callback.
type HandshakeResult = std::result::Result<Response, ErrorResponse>;

// ============================================================================
// Constants
// ============================================================================

/// How often the accept loop checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Listener
// ============================================================================

/// WebSocket listener feeding accepted sockets to a [`Server`].
pub struct Listener {
    /// Bound address.
    local_addr: SocketAddr,

    /// Taken by [`Listener::serve`].
    listener: Mutex<Option<TcpListener>>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

// ============================================================================
// Listener - Constructor
// ============================================================================

impl Listener {
    /// Binds to `ip:port`. Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let local_addr = listener.local_addr()?;

        debug!(addr = %local_addr, "Listener bound");

        Ok(Arc::new(Self {
            local_addr,
            listener: Mutex::new(Some(listener)),
            shutdown: AtomicBool::new(false),
        }))
    }

    /// Starts the accept loop, handing every upgraded socket to `server`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the listener is already serving.
    pub fn serve(self: &Arc<Self>, server: Server) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| Error::config("Listener is already serving"))?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.accept_loop(listener, server).await;
        });

        info!(addr = %self.local_addr, "Listener started");
        Ok(())
    }
}

// ============================================================================
// Listener - Public API
// ============================================================================

impl Listener {
    /// Returns the WebSocket URL for this listener.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new sockets. Open connections are not touched.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.listener.lock().take();
        info!(addr = %self.local_addr, "Listener shutting down");
    }
}

// ============================================================================
// Listener - Accept Loop
// ============================================================================

impl Listener {
    /// Background task that accepts new sockets.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener, server: Server) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            // Timeout lets the loop observe the shutdown flag.
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = server.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(server, stream, addr).await {
                            warn!(error = %e, ?addr, "Connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }
}

/// Upgrades one socket and hands it to the server.
async fn handle_connection(server: Server, stream: TcpStream, addr: SocketAddr) -> Result<()> {
    debug!(?addr, "New TCP connection");

    let mut request = None;
    let callback = |req: &Request, response: Response| -> HandshakeResult {
        let mut connect = ConnectRequest::new(req.uri().to_string());
        for (name, value) in req.headers() {
            if let Ok(value) = value.to_str() {
                connect = connect.with_header(name.as_str(), value);
            }
        }
        request = Some(connect);
        Ok(response)
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

    let request = request.ok_or_else(|| Error::connection("WebSocket upgrade without request"))?;
    debug!(?addr, uri = %request.uri, "WebSocket connection established");

    server
        .accept(request, Transport::websocket(ws_stream))
        .await
        .map(|_| ())
}

// ============================================================================
// Tests
// ============================================================================
