//! Server-side event router.
//!
//! Tracks connected peers and fans handler registrations out to them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Router                      │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ one lock:                              │  │
//! │  │   global handlers  "ping" → [h1, h2]   │  │
//! │  │   peers            conn-1, conn-2      │  │
//! │  └────────────────────────────────────────┘  │
//! │         │ accept: copy table                 │
//! │         │ on:     append to table + peers    │
//! │         ▼                                    │
//! │  conn-1 handlers    conn-2 handlers          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Accepting a peer, registering a handler and removing a closed peer all
//! take the same lock, so a handler registered with [`Router::on`] reaches
//! every peer exactly once, whether the peer connected before or after.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::identifiers::ConnectionId;
use crate::options::Options;
use crate::protocol::{Codec, Payload, codec_for};
use crate::transport::connection::{Connection, Handler, HandlerResult, HandlerTable};

// ============================================================================
// RouterEvent
// ============================================================================

/// Peer lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A peer was accepted.
    Connected {
        /// The new peer.
        id: ConnectionId,
        /// The peer's address, if known.
        remote_addr: Option<SocketAddr>,
    },
    /// A peer left the peer set.
    Disconnected {
        /// The departed peer.
        id: ConnectionId,
    },
}

// ============================================================================
// Router
// ============================================================================

/// State guarded by the router lock.
#[derive(Default)]
struct RouterState {
    /// Handlers registered through the router.
    handlers: HandlerTable,
    /// Open peers by ID.
    peers: FxHashMap<ConnectionId, Connection>,
}

/// Server-side registry of peers and globally registered handlers.
///
/// Thread-safe; share it as `Arc<Router>`.
///
/// # Example
///
/// ```ignore
/// let router = Router::new();
/// router.on("echo", |conn, payload| {
///     conn.emit("echo", payload.clone())?;
///     Ok(())
/// });
///
/// // For every upgraded socket handed over by the acceptor:
/// router.accept(ws_stream, Some(remote_addr));
/// ```
pub struct Router {
    /// Router options.
    options: Options,

    /// Codec shared by every peer.
    codec: Arc<dyn Codec>,

    /// Global handlers and peer set.
    state: Mutex<RouterState>,

    /// Lifecycle notifications.
    lifecycle: broadcast::Sender<RouterEvent>,
}

// ============================================================================
// Router - Constructor
// ============================================================================

impl Router {
    /// Creates a router with default options (text codec).
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::build(Options::default())
    }

    /// Creates a router with the given options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the options are
    /// invalid.
    pub fn with_options(options: Options) -> Result<Arc<Self>> {
        options.validate()?;
        Ok(Self::build(options))
    }

    fn build(options: Options) -> Arc<Self> {
        let (lifecycle, _) = broadcast::channel(options.lifecycle_capacity);

        debug!(codec = ?options.codec, "Router created");

        Arc::new(Self {
            codec: codec_for(&options),
            options,
            state: Mutex::new(RouterState::default()),
            lifecycle,
        })
    }
}

// ============================================================================
// Router - Public API
// ============================================================================

impl Router {
    /// Returns the router options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Returns the codec used for every peer.
    #[inline]
    #[must_use]
    pub fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.codec)
    }

    /// Subscribes to peer lifecycle notifications.
    ///
    /// Slow subscribers lose the oldest notifications once the configured
    /// capacity is exceeded.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.lifecycle.subscribe()
    }

    /// Returns the number of open peers.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    /// Returns a snapshot of the open peers.
    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        self.state.lock().peers.values().cloned().collect()
    }

    /// Returns the peer with the given ID, if open.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.state.lock().peers.get(&id).cloned()
    }

    /// Emits an event to every open peer.
    ///
    /// The event is encoded once. Peers that closed concurrently are
    /// skipped.
    ///
    /// # Returns
    ///
    /// The number of peers the frame was queued for.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`](crate::Error::Encode) if the payload cannot
    /// be encoded.
    pub fn broadcast(&self, event: &str, payload: impl Into<Payload>) -> Result<usize> {
        let frame = self.codec.encode(event, &payload.into())?;
        let peers = self.connections();

        let delivered = peers
            .iter()
            .filter(|peer| peer.send_frame(frame.clone()).is_ok())
            .count();

        debug!(event, delivered, peers = peers.len(), "Broadcast event");
        Ok(delivered)
    }
}

// ============================================================================
// Router - Handlers
// ============================================================================

impl Router {
    /// Registers a handler on every current and future peer.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Connection, &Payload) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_handler(event, Arc::new(handler));
    }

    /// Registers an already shared handler on every current and future peer.
    pub fn on_handler(&self, event: impl Into<String>, handler: Handler) {
        let event = event.into();
        let mut state = self.state.lock();

        for peer in state.peers.values() {
            peer.on_handler(event.clone(), Arc::clone(&handler));
        }

        debug!(event = %event, peers = state.peers.len(), "Global handler registered");
        state.handlers.add(event, handler);
    }

    /// Returns the number of global handlers registered for `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.state.lock().handlers.count(event)
    }
}

// ============================================================================
// Router - Lifecycle
// ============================================================================

impl Router {
    /// Adopts an upgraded WebSocket channel as a new peer.
    ///
    /// Copies the global handlers onto the peer, inserts it into the peer
    /// set and spawns its read loop. Returns without waiting for the loop.
    /// The peer is removed again when its read loop ends.
    pub fn accept<S>(
        self: &Arc<Self>,
        ws_stream: WebSocketStream<S>,
        remote_addr: Option<SocketAddr>,
    ) -> Connection
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connection = Connection::with_remote_addr(ws_stream, self.codec(), remote_addr);
        let id = connection.id();

        {
            let mut state = self.state.lock();
            connection.extend_handlers(&state.handlers);
            state.peers.insert(id, connection.clone());
        }

        info!(connection_id = %id, ?remote_addr, "Peer accepted");
        let _ = self.lifecycle.send(RouterEvent::Connected { id, remote_addr });

        let guard = PeerGuard {
            router: Arc::downgrade(self),
            id,
        };
        let peer = connection.clone();

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = peer.read_loop().await {
                warn!(connection_id = %peer.id(), error = %e, "Peer read loop failed");
            }
        });

        connection
    }

    /// Removes a peer from the peer set.
    fn remove(&self, id: ConnectionId) {
        let removed = self.state.lock().peers.remove(&id);

        if removed.is_some() {
            debug!(connection_id = %id, "Peer removed");
            let _ = self.lifecycle.send(RouterEvent::Disconnected { id });
        }
    }

    /// Closes every peer and empties the peer set.
    ///
    /// Global handlers are kept; peers accepted afterwards still get them.
    pub fn shutdown(&self) {
        info!("Router shutting down");

        let peers: Vec<_> = self.state.lock().peers.drain().collect();

        for (id, peer) in peers {
            let _ = peer.close();
            let _ = self.lifecycle.send(RouterEvent::Disconnected { id });
            debug!(connection_id = %id, "Peer closed during shutdown");
        }
    }
}

// ============================================================================
// PeerGuard
// ============================================================================

/// Removes a peer from its router when the read loop task ends,
/// including when a handler panics.
struct PeerGuard {
    router: Weak<Router>,
    id: ConnectionId,
}

impl Drop for PeerGuard {
    fn drop(&mut self) {
        if let Some(router) = self.router.upgrade() {
            router.remove(self.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    use crate::transport::connection::tests::{WAIT, ws_pair};

    /// Accepts an in-memory peer and returns the client end.
    async fn connect(router: &Arc<Router>) -> (Connection, Connection) {
        let (server_ws, client_ws) = ws_pair().await;
        let server = router.accept(server_ws, None);
        let client = Connection::new(client_ws, router.codec());
        client.spawn_read_loop();
        (server, client)
    }

    async fn wait_for_count(router: &Router, expected: usize) {
        timeout(WAIT, async {
            while router.connection_count() != expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("peer count reached in time");
    }

    #[tokio::test]
    async fn test_handler_registered_before_peers_reaches_each() {
        for options in [Options::new(), Options::binary()] {
            let router = Router::with_options(options).expect("valid options");
            let (tx, mut rx) = mpsc::unbounded_channel();

            router.on("e", move |conn, _| {
                let _ = tx.send(conn.id());
                Ok(())
            });

            let (server_a, client_a) = connect(&router).await;
            let (server_b, client_b) = connect(&router).await;

            for _ in 0..2 {
                client_a.emit("e", ()).expect("emit a");
                client_b.emit("e", ()).expect("emit b");
            }

            let mut seen = Vec::new();
            for _ in 0..4 {
                seen.push(timeout(WAIT, rx.recv()).await.expect("in time").expect("id"));
            }

            let from_a = seen.iter().filter(|id| **id == server_a.id()).count();
            let from_b = seen.iter().filter(|id| **id == server_b.id()).count();
            assert_eq!((from_a, from_b), (2, 2));

            sleep(Duration::from_millis(20)).await;
            assert!(rx.try_recv().is_err(), "handler ran more than once per emission");
        }
    }

    #[tokio::test]
    async fn test_late_registration_reaches_existing_peer() {
        let router = Router::new();
        let (server, client) = connect(&router).await;
        assert_eq!(server.handler_count("e"), 0);

        let (tx, mut rx) = mpsc::unbounded_channel();
        router.on("e", move |_, payload| {
            let _ = tx.send(payload.clone());
            Ok(())
        });
        assert_eq!(server.handler_count("e"), 1);

        client.emit("e", "late").expect("emit");
        let payload = timeout(WAIT, rx.recv()).await.expect("in time");
        assert_eq!(payload, Some(Payload::scalar("late")));
    }

    #[tokio::test]
    async fn test_accept_copies_handlers_in_order() {
        let router = Router::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for label in 1..=3 {
            let tx = tx.clone();
            router.on("e", move |_, _| {
                let _ = tx.send(label);
                Ok(())
            });
        }

        let (server, client) = connect(&router).await;
        assert_eq!(server.handler_count("e"), 3);
        assert_eq!(router.handler_count("e"), 3);

        client.emit("e", ()).expect("emit");
        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(timeout(WAIT, rx.recv()).await.expect("in time").expect("label"));
        }
        assert_eq!(order, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_remote_close_removes_peer() {
        let router = Router::new();
        let mut lifecycle = router.subscribe();
        let (server, client) = connect(&router).await;
        assert_eq!(router.connection_count(), 1);
        assert!(router.get(server.id()).is_some());

        client.close().expect("close");
        wait_for_count(&router, 0).await;
        assert!(server.is_closed());

        let connected = lifecycle.recv().await.expect("connected");
        assert_eq!(
            connected,
            RouterEvent::Connected {
                id: server.id(),
                remote_addr: None
            }
        );
        let disconnected = timeout(WAIT, lifecycle.recv()).await.expect("in time");
        assert_eq!(
            disconnected.expect("disconnected"),
            RouterEvent::Disconnected { id: server.id() }
        );
    }

    #[tokio::test]
    async fn test_local_close_removes_peer() {
        let router = Router::new();
        let (server, _client) = connect(&router).await;

        server.close().expect("close");
        wait_for_count(&router, 0).await;
        assert!(router.get(server.id()).is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_peers() {
        let router = Router::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut clients = Vec::new();
        for _ in 0..3 {
            let (_, client) = connect(&router).await;
            let tx = tx.clone();
            client.on("news", move |conn, payload| {
                let _ = tx.send((conn.id(), payload.clone()));
                Ok(())
            });
            clients.push(client);
        }

        let delivered = router.broadcast("news", "hello").expect("encodable");
        assert_eq!(delivered, 3);

        for _ in 0..3 {
            let (_, payload) = timeout(WAIT, rx.recv()).await.expect("in time").expect("msg");
            assert_eq!(payload, Payload::scalar("hello"));
        }
    }

    #[tokio::test]
    async fn test_broadcast_encode_error() {
        let router = Router::new();
        let err = router.broadcast("", ()).unwrap_err();
        assert!(err.is_encode_error());
    }

    #[tokio::test]
    async fn test_shutdown_closes_peers() {
        let router = Router::new();
        let (server_a, client_a) = connect(&router).await;
        let (server_b, _client_b) = connect(&router).await;

        router.shutdown();
        assert_eq!(router.connection_count(), 0);
        assert!(server_a.is_closed());
        assert!(server_b.is_closed());

        timeout(WAIT, client_a.closed()).await.expect("client sees close");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registration_races_with_accept_and_removal() {
        const REGISTRARS: usize = 4;
        const HANDLERS_EACH: usize = 50;
        const ACCEPTORS: usize = 4;
        const PEERS_EACH: usize = 10;

        let router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let registrars: Vec<_> = (0..REGISTRARS)
            .map(|_| {
                let router = Arc::clone(&router);
                let hits = Arc::clone(&hits);
                tokio::spawn(async move {
                    for _ in 0..HANDLERS_EACH {
                        let hits = Arc::clone(&hits);
                        router.on("e", move |_, _| {
                            hits.fetch_add(1, Ordering::Relaxed);
                            Ok(())
                        });
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let acceptors: Vec<_> = (0..ACCEPTORS)
            .map(|_| {
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    let mut survivors = Vec::new();
                    for i in 0..PEERS_EACH {
                        let (server, client) = connect(&router).await;
                        if i % 2 == 0 {
                            server.close().expect("close");
                        } else {
                            survivors.push((server, client));
                        }
                        tokio::task::yield_now().await;
                    }
                    survivors
                })
            })
            .collect();

        for registrar in registrars {
            registrar.await.expect("registrar task");
        }
        let mut survivors = Vec::new();
        for acceptor in acceptors {
            survivors.extend(acceptor.await.expect("acceptor task"));
        }

        let total = REGISTRARS * HANDLERS_EACH;
        wait_for_count(&router, survivors.len()).await;
        assert_eq!(router.handler_count("e"), total);

        for (server, _) in &survivors {
            assert!(router.get(server.id()).is_some());
            assert_eq!(server.handler_count("e"), total, "{}", server.id());
        }

        // Every handler runs exactly once per frame
        let (_, client) = &survivors[0];
        client.emit_flush("e", ()).await.expect("emit");
        timeout(WAIT, async {
            while hits.load(Ordering::Relaxed) < total {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handlers ran in time");
        sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::Relaxed), total);
    }

    #[tokio::test]
    async fn test_handler_can_register_through_router() {
        let router = Router::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let inner_router = Arc::downgrade(&router);
        router.on("subscribe", move |_, _| {
            if let Some(router) = inner_router.upgrade() {
                let tx = tx.clone();
                router.on("topic", move |_, _| {
                    let _ = tx.send(());
                    Ok(())
                });
            }
            Ok(())
        });

        let (_, client) = connect(&router).await;
        client.emit_flush("subscribe", ()).await.expect("emit");
        timeout(WAIT, async {
            while router.handler_count("topic") == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registered in time");

        client.emit("topic", ()).expect("emit");
        timeout(WAIT, rx.recv()).await.expect("in time").expect("value");
    }
}
