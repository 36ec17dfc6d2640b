//! WebSocket connection and read loop.
//!
//! This module wraps one established WebSocket channel into a peer
//! connection with named-event dispatch.
//!
//! # Tasks
//!
//! Each connection is served by two tokio tasks:
//!
//! - **Writer** (spawned by the constructor): owns the sink half and writes
//!   frames queued by [`Connection::emit`] one at a time, so frames from
//!   concurrent emitters never interleave.
//! - **Read loop** ([`Connection::read_loop`]): owns the stream half, decodes
//!   each frame and invokes the handlers registered for its event name,
//!   synchronously and in registration order.
//!
//! A slow handler stalls only its own connection. Handlers that need to do
//! long work should spawn it and return.
//!
//! # Lifecycle
//!
//! `open → closed`. The connection closes when the remote end closes, on a
//! transport error, or on [`Connection::close`]. Closed is terminal.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{BoxStream, SplitSink};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, HandlerError, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{Codec, Frame, Payload};

// ============================================================================
// Types
// ============================================================================

/// Result returned by an event handler.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Event handler callback type.
///
/// Called with the connection the event arrived on and its payload.
/// Errors are logged and counted; they never close the connection.
pub type Handler = Arc<dyn Fn(&Connection, &Payload) -> HandlerResult + Send + Sync>;

/// Inbound half of the WebSocket channel.
type FrameStream = BoxStream<'static, std::result::Result<Message, WsError>>;

// ============================================================================
// HandlerTable
// ============================================================================

/// Event name to ordered handler list.
///
/// Only ever grows. Handlers for one name keep their registration order.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: FxHashMap<String, Vec<Handler>>,
}

impl HandlerTable {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler for `event`.
    pub fn add(&mut self, event: impl Into<String>, handler: Handler) {
        self.handlers.entry(event.into()).or_default().push(handler);
    }

    /// Appends every handler of `other`, preserving per-event order.
    pub fn extend_from(&mut self, other: &Self) {
        for (event, handlers) in &other.handlers {
            self.handlers
                .entry(event.clone())
                .or_default()
                .extend(handlers.iter().cloned());
        }
    }

    /// Returns the handlers registered for `event`.
    #[inline]
    #[must_use]
    pub fn get(&self, event: &str) -> &[Handler] {
        self.handlers.get(event).map_or(&[], Vec::as_slice)
    }

    /// Returns the number of handlers registered for `event`.
    #[inline]
    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.get(event).len()
    }

    /// Returns the number of distinct event names.
    #[inline]
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handler is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.handlers.iter().map(|(event, list)| (event, list.len())))
            .finish()
    }
}

// ============================================================================
// ConnectionStats
// ============================================================================

/// Snapshot of per-connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Data frames read from the socket.
    pub frames_received: u64,
    /// Frames whose handlers were invoked.
    pub frames_dispatched: u64,
    /// Frames written to the socket.
    pub frames_sent: u64,
    /// Frames dropped because they failed to decode.
    pub decode_errors: u64,
    /// Frames dropped because no handler matched.
    pub unknown_events: u64,
    /// Handler invocations that returned an error.
    pub handler_errors: u64,
}

/// Live counters behind [`ConnectionStats`].
#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_dispatched: AtomicU64,
    frames_sent: AtomicU64,
    decode_errors: AtomicU64,
    unknown_events: AtomicU64,
    handler_errors: AtomicU64,
}

impl Counters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unknown_events: self.unknown_events.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// WriterCommand
// ============================================================================

/// Commands for the writer task.
enum WriterCommand {
    /// Write one frame, optionally reporting the outcome.
    Frame {
        frame: Frame,
        ack: Option<oneshot::Sender<Result<()>>>,
    },
    /// Send a close frame and stop.
    Close,
}

// ============================================================================
// Shared
// ============================================================================

/// State shared by every clone of a connection and its tasks.
struct Shared {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    codec: Arc<dyn Codec>,
    handlers: RwLock<HandlerTable>,
    /// Taken by the read loop when it starts.
    reader: Mutex<Option<FrameStream>>,
    closed: watch::Sender<bool>,
    counters: Counters,
}

impl Shared {
    /// Marks the connection closed. Returns `false` if it already was.
    fn mark_closed(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }
}

/// Resolves once the closed flag is set.
async fn wait_closed(closed_rx: &mut watch::Receiver<bool>) {
    let _ = closed_rx.wait_for(|closed| *closed).await;
}

// ============================================================================
// Connection
// ============================================================================

/// Named-event connection over one WebSocket channel.
///
/// Used on both sides: the router wraps accepted channels in it and clients
/// wrap the channel they dialed.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone; clones share the same
/// socket, handler table and state.
#[derive(Clone)]
pub struct Connection {
    /// Queue feeding the writer task.
    outbound_tx: mpsc::UnboundedSender<WriterCommand>,
    /// State shared with the tasks.
    shared: Arc<Shared>,
}

impl Connection {
    /// Creates a connection from an established WebSocket stream.
    ///
    /// Spawns the writer task. The read loop does not start until
    /// [`read_loop`](Self::read_loop) or
    /// [`spawn_read_loop`](Self::spawn_read_loop) is called, so handlers can
    /// be registered first.
    ///
    /// Must be called within a tokio runtime.
    pub fn new<S>(ws_stream: WebSocketStream<S>, codec: Arc<dyn Codec>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_remote_addr(ws_stream, codec, None)
    }

    /// Creates a connection that remembers the peer's address.
    pub fn with_remote_addr<S>(
        ws_stream: WebSocketStream<S>,
        codec: Arc<dyn Codec>,
        remote_addr: Option<SocketAddr>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_write, ws_read) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            id: ConnectionId::next(),
            remote_addr,
            codec,
            handlers: RwLock::new(HandlerTable::new()),
            reader: Mutex::new(Some(ws_read.boxed())),
            closed,
            counters: Counters::default(),
        });

        tokio::spawn(Self::run_writer(ws_write, outbound_rx, Arc::clone(&shared)));

        debug!(connection_id = %shared.id, ?remote_addr, "Connection created");

        Self {
            outbound_tx,
            shared,
        }
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Returns the peer address, if known.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.remote_addr
    }

    /// Returns `true` once the connection is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Waits until the connection is closed.
    pub async fn closed(&self) {
        let mut closed_rx = self.shared.closed.subscribe();
        wait_closed(&mut closed_rx).await;
    }

    /// Returns a snapshot of the connection counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.shared.counters.snapshot()
    }
}

// ============================================================================
// Connection - Handlers
// ============================================================================

impl Connection {
    /// Registers a handler for `event`.
    ///
    /// Handlers accumulate: every handler registered for a name runs on each
    /// matching frame, in registration order. Takes effect for the next
    /// frame even while the read loop is running.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Connection, &Payload) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_handler(event, Arc::new(handler));
    }

    /// Registers an already shared handler for `event`.
    pub fn on_handler(&self, event: impl Into<String>, handler: Handler) {
        let event = event.into();
        trace!(connection_id = %self.shared.id, event = %event, "Handler registered");
        self.shared.handlers.write().add(event, handler);
    }

    /// Appends every handler from `table`.
    pub(crate) fn extend_handlers(&self, table: &HandlerTable) {
        self.shared.handlers.write().extend_from(table);
    }

    /// Returns the number of handlers registered for `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.shared.handlers.read().count(event)
    }
}

// ============================================================================
// Connection - Emit
// ============================================================================

impl Connection {
    /// Encodes an event and queues it for writing.
    ///
    /// Returns once the frame is queued; frames are written in queue order.
    /// Safe to call from handlers and from any number of tasks.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::Encode`] if the payload cannot be encoded; the connection
    ///   stays open
    pub fn emit(&self, event: &str, payload: impl Into<Payload>) -> Result<()> {
        let frame = self.encode(event, &payload.into())?;
        self.send_frame(frame)?;
        trace!(connection_id = %self.shared.id, event, "Event queued");
        Ok(())
    }

    /// Serializes `value` and emits it as a structured payload.
    ///
    /// # Errors
    ///
    /// Same as [`emit`](Self::emit).
    pub fn emit_serialized<T: Serialize + ?Sized>(&self, event: &str, value: &T) -> Result<()> {
        self.emit(event, Payload::from_serialize(value)?)
    }

    /// Emits an event and waits until it has been written to the socket.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::Encode`] if the payload cannot be encoded
    /// - [`Error::Connection`] if the socket write fails
    pub async fn emit_flush(&self, event: &str, payload: impl Into<Payload>) -> Result<()> {
        let frame = self.encode(event, &payload.into())?;

        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.outbound_tx
            .send(WriterCommand::Frame {
                frame,
                ack: Some(ack_tx),
            })
            .map_err(|_| Error::ConnectionClosed)?;

        ack_rx.await?
    }

    /// Queues an already encoded frame.
    pub(crate) fn send_frame(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        self.outbound_tx
            .send(WriterCommand::Frame { frame, ack: None })
            .map_err(|_| Error::ConnectionClosed)
    }

    fn encode(&self, event: &str, payload: &Payload) -> Result<Frame> {
        self.shared.codec.encode(event, payload).inspect_err(|e| {
            warn!(connection_id = %self.shared.id, event, error = %e, "Failed to encode event");
        })
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Closes the connection.
    ///
    /// Frames queued before the call are still written, followed by a close
    /// frame. A running read loop exits promptly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection was already
    /// closed, by this call or by the remote end.
    pub fn close(&self) -> Result<()> {
        if !self.shared.mark_closed() {
            return Err(Error::ConnectionClosed);
        }

        let _ = self.outbound_tx.send(WriterCommand::Close);
        debug!(connection_id = %self.shared.id, "Connection closed locally");
        Ok(())
    }

    /// Spawns [`read_loop`](Self::read_loop) on its own task.
    pub fn spawn_read_loop(&self) -> JoinHandle<Result<()>> {
        let connection = self.clone();
        tokio::spawn(async move { connection.read_loop().await })
    }

    /// Reads and dispatches frames until the connection closes.
    ///
    /// Malformed frames and unknown events are logged and dropped; only a
    /// transport error, a close frame or [`close`](Self::close) ends the
    /// loop. The connection is closed when this returns.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the loop was already started
    /// - [`Error::WebSocket`] if the transport failed
    pub async fn read_loop(&self) -> Result<()> {
        let mut reader = self
            .shared
            .reader
            .lock()
            .take()
            .ok_or_else(|| Error::connection("read loop already started"))?;

        let id = self.shared.id;
        let mut closed_rx = self.shared.closed.subscribe();
        let _guard = ReadLoopGuard { connection: self };

        debug!(connection_id = %id, "Read loop started");

        let result = loop {
            tokio::select! {
                biased;

                () = wait_closed(&mut closed_rx) => {
                    debug!(connection_id = %id, "Read loop observed close");
                    break Ok(());
                }

                message = reader.next() => {
                    match message {
                        Some(Ok(Message::Close(frame))) => {
                            debug!(connection_id = %id, ?frame, "WebSocket closed by remote");
                            break Ok(());
                        }

                        Some(Ok(message)) => {
                            // Ping, Pong and raw frames carry no event
                            if let Some(frame) = Frame::from_message(message) {
                                self.dispatch(&frame);
                            }
                        }

                        Some(Err(e)) => {
                            error!(connection_id = %id, error = %e, "WebSocket error");
                            break Err(Error::WebSocket(e));
                        }

                        None => {
                            debug!(connection_id = %id, "WebSocket stream ended");
                            break Ok(());
                        }
                    }
                }
            }
        };

        debug!(connection_id = %id, stats = ?self.stats(), "Read loop terminated");
        result
    }

    /// Decodes one frame and runs its handlers.
    fn dispatch(&self, frame: &Frame) {
        let counters = &self.shared.counters;
        Counters::bump(&counters.frames_received);

        let event = match self.shared.codec.decode(frame) {
            Ok(event) => event,
            Err(e) => {
                Counters::bump(&counters.decode_errors);
                warn!(
                    connection_id = %self.shared.id,
                    error = %e,
                    len = frame.len(),
                    "Dropping malformed frame"
                );
                return;
            }
        };

        // Snapshot so handlers may register handlers or emit without
        // holding the table lock.
        let handlers = self.shared.handlers.read().get(&event.name).to_vec();

        if handlers.is_empty() {
            Counters::bump(&counters.unknown_events);
            warn!(connection_id = %self.shared.id, event = %event.name, "Received unknown event");
            return;
        }

        trace!(
            connection_id = %self.shared.id,
            event = %event.name,
            handlers = handlers.len(),
            "Dispatching event"
        );

        Counters::bump(&counters.frames_dispatched);

        for handler in &handlers {
            if let Err(e) = handler(self, &event.payload) {
                Counters::bump(&counters.handler_errors);
                warn!(
                    connection_id = %self.shared.id,
                    event = %event.name,
                    error = %e,
                    "Handler failed"
                );
            }
        }
    }

    /// Writer task: the only place frames reach the socket.
    async fn run_writer<S>(
        mut ws_write: SplitSink<WebSocketStream<S>, Message>,
        mut outbound_rx: mpsc::UnboundedReceiver<WriterCommand>,
        shared: Arc<Shared>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        while let Some(command) = outbound_rx.recv().await {
            match command {
                WriterCommand::Frame { frame, ack } => {
                    match ws_write.send(frame.into_message()).await {
                        Ok(()) => {
                            Counters::bump(&shared.counters.frames_sent);
                            if let Some(ack) = ack {
                                let _ = ack.send(Ok(()));
                            }
                        }
                        Err(e) => {
                            error!(connection_id = %shared.id, error = %e, "Failed to write frame");
                            if let Some(ack) = ack {
                                let _ = ack.send(Err(Error::connection(e.to_string())));
                            }
                            break;
                        }
                    }
                }

                WriterCommand::Close => break,
            }
        }

        shared.mark_closed();

        // Fail emitters still waiting for an acknowledgement
        outbound_rx.close();
        while let Ok(command) = outbound_rx.try_recv() {
            if let WriterCommand::Frame { ack: Some(ack), .. } = command {
                let _ = ack.send(Err(Error::ConnectionClosed));
            }
        }

        if let Err(e) = ws_write.close().await {
            trace!(connection_id = %shared.id, error = %e, "Close frame not sent");
        }

        debug!(connection_id = %shared.id, "Writer terminated");
    }
}

// ============================================================================
// ReadLoopGuard
// ============================================================================

/// Closes the connection when the read loop ends, including when a handler
/// panics and unwinds the loop's task.
struct ReadLoopGuard<'a> {
    connection: &'a Connection,
}

impl Drop for ReadLoopGuard<'_> {
    fn drop(&mut self) {
        let shared = &self.connection.shared;

        if std::thread::panicking() {
            error!(connection_id = %shared.id, "Read loop panicked, closing connection");
        }

        shared.mark_closed();
        let _ = self.connection.outbound_tx.send(WriterCommand::Close);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("remote_addr", &self.shared.remote_addr)
            .field("codec", &self.shared.codec.kind())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
