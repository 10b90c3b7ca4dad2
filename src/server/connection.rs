//! One client connection.
//!
//! A connection owns its transport (through a single I/O task), its identity
//! and its live subscriptions. Every command it receives becomes a unit of
//! work on the [`WorkerPool`](crate::WorkerPool) keyed by the connection ID,
//! so commands run strictly in arrival order and never block the I/O task.
//!
//! # Lifecycle
//!
//! ```text
//! accept ─► resolve identity ─┬─► rejected: transport closed, no frames
//!                             └─► welcome ─► dispatch* ─► close
//!                                                           │
//!                          teardown unit (last in FIFO) ◄───┘
//!                          on_unsubscribed per subscription
//!                          interest removed, outbox closed
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::channel::context::Effect;
use crate::channel::{ChannelContext, Subscription, SubscriptionState};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::identity::{ConnectRequest, Identity};
use crate::protocol::{CommandKind, Envelope, Frame};
use crate::transport::outbox::Outbound;
use crate::transport::{FrameSink, FrameStream, Outbox, Transport};
use crate::worker;

use super::core::ServerContext;

// ============================================================================
// Types
// ============================================================================

/// Effects recorded by a handler and whether it rejected.
type HandlerOutcome = (Vec<Effect>, bool);

// ============================================================================
// Connection
// ============================================================================

/// A live client connection.
///
/// Obtained from [`Server::accept`](crate::Server::accept) or the
/// [`ConnectionManager`](crate::ConnectionManager).
pub struct Connection {
    /// Process-unique ID.
    id: ConnectionId,
    /// Resolved at accept time, never changes.
    identity: Arc<Identity>,
    /// Frames to the client.
    outbox: Outbox,
    /// Subscribed subscriptions by client identifier.
    subscriptions: Mutex<FxHashMap<String, Arc<Subscription>>>,
    /// Held while admitting work, so nothing is queued behind teardown.
    admission: Mutex<()>,
    /// Set by [`Connection::close`]; no new work is admitted.
    closing: AtomicBool,
    /// Set when the teardown unit starts.
    closed: AtomicBool,
    /// Shared server state.
    context: Arc<ServerContext>,
}

// ============================================================================
// Connection - Accept
// ============================================================================

impl Connection {
    /// Resolves the identity and starts the connection.
    ///
    /// On rejection the transport is closed without any frame.
    pub(crate) async fn accept(
        context: Arc<ServerContext>,
        request: ConnectRequest,
        mut transport: Transport,
    ) -> Result<Arc<Self>> {
        let identity = match context.resolver.resolve(&request).await {
            Ok(identity) => identity,
            Err(e) => {
                info!(uri = %request.uri, error = %e, "Connection rejected");
                if let Err(close_err) = transport.close().await {
                    trace!(error = %close_err, "Transport close after rejection failed");
                }
                drop(transport);
                return Err(match e {
                    Error::Rejected { .. } => e,
                    other => Error::rejected(other.to_string()),
                });
            }
        };

        let (outbox, outbound) = Outbox::channel();
        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            identity: Arc::new(identity),
            outbox,
            subscriptions: Mutex::new(FxHashMap::default()),
            admission: Mutex::new(()),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            context,
        });

        // Queued before the I/O task exists, so nothing can overtake it.
        connection.outbox.send(Frame::Welcome);
        connection
            .context
            .manager
            .register(Arc::clone(&connection));

        let (sink, stream) = transport.into_parts();
        tokio::spawn(Arc::clone(&connection).run_io_loop(sink, stream, outbound));

        info!(
            connection_id = %connection.id,
            identity = %connection.identity,
            "Connection accepted"
        );

        Ok(connection)
    }
}

// ============================================================================
// Connection - Public API
// ============================================================================

impl Connection {
    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the resolved identity.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns `true` until [`Connection::close`] starts.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::Acquire)
    }

    /// Returns `true` once teardown has started.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of subscribed subscriptions.
    #[inline]
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Looks up a subscribed subscription.
    #[must_use]
    pub fn subscription(&self, identifier: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.lock().get(identifier).cloned()
    }

    /// Identifiers of subscribed subscriptions, sorted.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        identifiers.sort_unstable();
        identifiers
    }

    /// Queues a command behind everything already queued for this
    /// connection. Failures of the command itself are logged.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] once the connection is closing
    /// - [`Error::PoolClosed`] after server shutdown
    pub fn dispatch(self: &Arc<Self>, envelope: Envelope) -> Result<()> {
        let _admission = self.admission.lock();
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let connection = Arc::clone(self);
        self.context.pool.submit(self.id, async move {
            let command = envelope.command;
            let identifier = envelope.identifier.clone();

            if let Err(e) = connection.execute(envelope).await {
                connection.log_command_error(command, &identifier, &e);
            }
        })
    }

    /// Queues a command like [`Connection::dispatch`] and waits for its
    /// result.
    ///
    /// # Errors
    ///
    /// Returns the command's error, or the errors of
    /// [`Connection::dispatch`].
    pub async fn perform(self: &Arc<Self>, envelope: Envelope) -> Result<()> {
        let (tx, rx) = oneshot::channel();

        {
            let _admission = self.admission.lock();
            if !self.is_open() {
                return Err(Error::ConnectionClosed);
            }

            let connection = Arc::clone(self);
            self.context.pool.submit(self.id, async move {
                let _ = tx.send(connection.execute(envelope).await);
            })?;
        }

        rx.await?
    }

    /// Sends a `disconnect` frame, then closes.
    pub async fn disconnect(self: &Arc<Self>, reason: impl Into<String>, reconnect: bool) {
        if self.is_open() {
            self.outbox.send(Frame::Disconnect {
                reason: reason.into(),
                reconnect,
            });
        }
        self.close().await;
    }

    /// Closes the connection.
    ///
    /// Work already queued completes first. Then every subscription is
    /// unsubscribed, the connection leaves the manager and the transport is
    /// released. Idempotent; later calls return immediately.
    pub async fn close(self: &Arc<Self>) {
        let (tx, rx) = oneshot::channel();

        let queued = {
            let _admission = self.admission.lock();
            if self.closing.swap(true, Ordering::AcqRel) {
                return;
            }
            debug!(connection_id = %self.id, "Closing connection");

            let connection = Arc::clone(self);
            self.context.pool.submit(self.id, async move {
                connection.teardown().await;
                let _ = tx.send(());
            })
        };

        match queued {
            Ok(()) => {
                if rx.await.is_err() {
                    warn!(connection_id = %self.id, "Teardown unit did not finish");
                }
            }
            // Pool is shut down; nothing else can run for this connection.
            Err(_) => self.teardown().await,
        }

        self.context.pool.release(self.id);
        self.context.manager.deregister(self.id);
        self.outbox.close();

        info!(connection_id = %self.id, "Connection closed");
    }
}

// ============================================================================
// Connection - I/O Loop
// ============================================================================

impl Connection {
    /// Moves frames between the transport and the connection until either
    /// side finishes.
    async fn run_io_loop(
        self: Arc<Self>,
        mut sink: FrameSink,
        mut stream: FrameStream,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
    ) {
        trace!(connection_id = %self.id, "I/O loop started");

        loop {
            tokio::select! {
                // Frames for the client
                item = outbound.recv() => {
                    match item {
                        Some(Outbound::Frame(frame)) => {
                            if let Err(e) = sink.send(frame.encode()).await {
                                debug!(connection_id = %self.id, error = %e, "Transport write failed");
                                break;
                            }
                        }

                        Some(Outbound::Close) | None => {
                            debug!(connection_id = %self.id, "Outbox closed");
                            break;
                        }
                    }
                }

                // Commands from the client
                message = stream.next() => {
                    match message {
                        Some(Ok(text)) => self.receive(&text),

                        Some(Err(e)) => {
                            debug!(connection_id = %self.id, error = %e, "Transport read failed");
                            break;
                        }

                        None => {
                            debug!(connection_id = %self.id, "Client hung up");
                            break;
                        }
                    }
                }
            }
        }

        self.close().await;

        if let Err(e) = sink.close().await {
            trace!(connection_id = %self.id, error = %e, "Transport close failed");
        }
        trace!(connection_id = %self.id, "I/O loop terminated");
    }

    /// Decodes one inbound message and queues it.
    fn receive(self: &Arc<Self>, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "Malformed envelope skipped");
                return;
            }
        };

        if let Err(e) = self.dispatch(envelope) {
            debug!(connection_id = %self.id, error = %e, "Command not admitted");
        }
    }
}

// ============================================================================
// Connection - Command Execution
// ============================================================================

impl Connection {
    /// Runs one command. Always called from this connection's worker queue.
    async fn execute(&self, envelope: Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        trace!(
            connection_id = %self.id,
            command = envelope.command.as_str(),
            identifier = %envelope.identifier,
            "Executing command"
        );

        match envelope.command {
            CommandKind::Subscribe => self.subscribe(&envelope).await,
            CommandKind::Unsubscribe => self.unsubscribe(&envelope.identifier).await,
            CommandKind::Message => self.message(&envelope).await,
        }
    }

    /// Handles `subscribe`.
    async fn subscribe(&self, envelope: &Envelope) -> Result<()> {
        let identifier = envelope.identifier.as_str();

        if self.subscriptions.lock().contains_key(identifier) {
            debug!(connection_id = %self.id, identifier, "Duplicate subscribe ignored");
            return Ok(());
        }

        let Some(channel_name) = envelope.channel_name() else {
            self.outbox.send(Frame::reject(identifier));
            return Err(Error::protocol(format!(
                "subscribe without channel: {identifier}"
            )));
        };

        let descriptor = match self.context.registry.resolve(&channel_name) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.outbox.send(Frame::reject(identifier));
                return Err(e);
            }
        };

        let subscription = Arc::new(Subscription::new(
            self.id,
            identifier,
            descriptor,
            envelope.params(),
            self.outbox.clone(),
        ));

        let outcome = match subscription.channel().on_subscribed().cloned() {
            Some(hook) => self.run_handler(&subscription, move |ctx| hook(ctx)).await,
            None => Ok((Vec::new(), false)),
        };

        match outcome {
            Ok((effects, false)) => {
                subscription.transition(SubscriptionState::Subscribed);
                self.subscriptions
                    .lock()
                    .insert(identifier.to_string(), Arc::clone(&subscription));

                // Streams are live before the client hears it is subscribed.
                let (streams, rest): (Vec<Effect>, Vec<Effect>) =
                    effects.into_iter().partition(Effect::is_stream_change);
                let streamed = self.apply_effects(&subscription, streams).await;
                self.outbox.send(Frame::confirm(identifier));

                debug!(
                    connection_id = %self.id,
                    identifier,
                    channel = %channel_name,
                    "Subscribed"
                );

                let applied = self.apply_effects(&subscription, rest).await;
                streamed.and(applied)
            }

            Ok((_, true)) => {
                subscription.transition(SubscriptionState::Unsubscribed);
                self.outbox.send(Frame::reject(identifier));
                Err(Error::subscription_rejected(identifier))
            }

            Err(e) => {
                subscription.transition(SubscriptionState::Unsubscribed);
                self.outbox.send(Frame::reject(identifier));
                Err(e)
            }
        }
    }

    /// Handles `unsubscribe`. Unknown identifiers are ignored.
    async fn unsubscribe(&self, identifier: &str) -> Result<()> {
        let Some(subscription) = self.subscriptions.lock().remove(identifier) else {
            debug!(connection_id = %self.id, identifier, "Unsubscribe of unknown identifier ignored");
            return Ok(());
        };

        self.release_subscription(&subscription).await
    }

    /// Handles `message`.
    async fn message(&self, envelope: &Envelope) -> Result<()> {
        let subscription = self
            .subscription(&envelope.identifier)
            .ok_or_else(|| Error::subscription_not_found(envelope.identifier.as_str()))?;

        let (action, data) = envelope.action()?;

        let handler = subscription
            .channel()
            .action(&action)
            .cloned()
            .ok_or_else(|| Error::action_not_found(subscription.channel_name(), action.as_str()))?;

        trace!(
            connection_id = %self.id,
            identifier = %envelope.identifier,
            action = %action,
            "Running action"
        );

        let (effects, _) = self
            .run_handler(&subscription, move |ctx| handler(ctx, &data))
            .await?;

        self.apply_effects(&subscription, effects).await
    }

    /// Unsubscribes every subscription. Last unit in the connection's queue.
    async fn teardown(&self) {
        self.closed.store(true, Ordering::Release);

        let subscriptions: Vec<Arc<Subscription>> = self
            .subscriptions
            .lock()
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();

        let count = subscriptions.len();
        for subscription in subscriptions {
            if let Err(e) = self.release_subscription(&subscription).await {
                warn!(
                    connection_id = %self.id,
                    identifier = %subscription.identifier(),
                    error = %e,
                    "on_unsubscribed failed during teardown"
                );
            }
        }

        debug!(connection_id = %self.id, subscriptions = count, "Teardown complete");
    }
}

// ============================================================================
// Connection - Handlers & Effects
// ============================================================================

impl Connection {
    /// Runs user channel code on the blocking pool.
    async fn run_handler<F>(
        &self,
        subscription: &Arc<Subscription>,
        f: F,
    ) -> Result<HandlerOutcome>
    where
        F: FnOnce(&mut ChannelContext) -> Result<()> + Send + 'static,
    {
        let mut ctx = ChannelContext::new(Arc::clone(subscription), Arc::clone(&self.identity));
        worker::blocking(move || f(&mut ctx).map(|()| ctx.into_effects())).await?
    }

    /// Applies handler effects in request order.
    ///
    /// Every effect is attempted; the first publish failure is returned.
    async fn apply_effects(
        &self,
        subscription: &Arc<Subscription>,
        effects: Vec<Effect>,
    ) -> Result<()> {
        let relay = &self.context.relay;
        let mut result = Ok(());

        for effect in effects {
            match effect {
                Effect::StreamFrom(stream) => {
                    if subscription.add_stream(&stream) {
                        relay.add_interest(&stream, subscription).await;
                        trace!(key = %subscription.key(), stream = %stream, "Streaming");
                    }
                }

                Effect::StopStreamFrom(stream) => {
                    if subscription.remove_stream(&stream) {
                        relay.remove_interest(&stream, subscription.key());
                        trace!(key = %subscription.key(), stream = %stream, "Stopped streaming");
                    }
                }

                Effect::StopAllStreams => {
                    for stream in subscription.take_streams() {
                        relay.remove_interest(&stream, subscription.key());
                    }
                }

                Effect::Transmit(message) => {
                    subscription.deliver(message);
                }

                Effect::Broadcast(stream, payload) => {
                    if let Err(e) = relay.publish(&stream, payload).await {
                        warn!(stream = %stream, error = %e, "Broadcast failed");
                        if result.is_ok() {
                            result = Err(e);
                        }
                    }
                }
            }
        }

        result
    }

    /// Moves a subscription to `Unsubscribed` and releases what it holds.
    ///
    /// Only broadcasts requested by `on_unsubscribed` are applied; the
    /// client can no longer receive frames for this subscription.
    async fn release_subscription(&self, subscription: &Arc<Subscription>) -> Result<()> {
        if !subscription.transition(SubscriptionState::Unsubscribed) {
            return Ok(());
        }

        let mut result = Ok(());

        if let Some(hook) = subscription.channel().on_unsubscribed().cloned() {
            match self.run_handler(subscription, move |ctx| hook(ctx)).await {
                Ok((effects, _)) => {
                    for effect in effects {
                        if let Effect::Broadcast(stream, payload) = effect
                            && let Err(e) = self.context.relay.publish(&stream, payload).await
                            && result.is_ok()
                        {
                            result = Err(e);
                        }
                    }
                }
                Err(e) => result = Err(e),
            }
        }

        for stream in subscription.take_streams() {
            self.context.relay.remove_interest(&stream, subscription.key());
        }
        subscription.clear_local_state();

        debug!(
            connection_id = %self.id,
            identifier = %subscription.identifier(),
            "Unsubscribed"
        );

        result
    }

    /// Logs a failed command at a level matching its cause.
    fn log_command_error(&self, command: CommandKind, identifier: &str, e: &Error) {
        if e.is_client_error() || matches!(e, Error::ConnectionClosed) {
            warn!(
                connection_id = %self.id,
                command = command.as_str(),
                identifier,
                error = %e,
                "Command failed"
            );
        } else {
            error!(
                connection_id = %self.id,
                command = command.as_str(),
                identifier,
                error = %e,
                "Command failed"
            );
        }
    }
}

// ============================================================================
// Connection - Display
// ============================================================================

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("subscriptions", &self.identifiers())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
