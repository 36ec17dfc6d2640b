//! WebSocket acceptor.
//!
//! Binds a TCP listener, performs the WebSocket upgrade on the configured
//! path and hands each upgraded channel to a [`Router`].
//!
//! # Connection Flow
//!
//! 1. `Server::bind` binds the listener and spawns the accept loop
//! 2. A peer connects and requests an upgrade on `Options::path`
//! 3. Requests for other paths are answered with `404 Not Found`
//! 4. The upgraded channel is passed to [`Router::accept`]

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

use super::router::Router;

// ============================================================================
// Server
// ============================================================================

/// A bound WebSocket acceptor feeding a [`Router`].
///
/// # Example
///
/// ```ignore
/// let router = Router::new();
/// let server = Server::bind("127.0.0.1:0", Arc::clone(&router)).await?;
/// println!("listening on {}", server.ws_url());
/// ```
pub struct Server {
    /// Address the listener is bound to.
    local_addr: SocketAddr,

    /// Router receiving accepted peers.
    router: Arc<Router>,

    /// Stops the accept loop when set.
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// Binds the acceptor and starts accepting peers.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(addr: impl ToSocketAddrs, router: Arc<Router>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(Self::accept_loop(listener, Arc::clone(&router), shutdown_rx));

        info!(%local_addr, path = %router.options().path, "WebSocket server bound");

        Ok(Self {
            local_addr,
            router,
            shutdown,
        })
    }

    /// Returns the local socket address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the WebSocket URL of the upgrade endpoint.
    ///
    /// Format: `ws://{addr}{path}`
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.router.options().path)
    }

    /// Returns the router receiving accepted peers.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Stops accepting new peers.
    ///
    /// Already accepted peers stay open; use [`Router::shutdown`] to close
    /// them.
    pub fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        info!(local_addr = %self.local_addr, "WebSocket server shutting down");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

// ============================================================================
// Server - Accept Loop
// ============================================================================

/// Resolves once shutdown is requested.
async fn wait_stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

impl Server {
    /// Background task that accepts new connections.
    async fn accept_loop(
        listener: TcpListener,
        router: Arc<Router>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        debug!("Accept loop started");

        loop {
            tokio::select! {
                () = wait_stopped(&mut shutdown_rx) => {
                    debug!("Accept loop shutting down");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let router = Arc::clone(&router);
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, addr, &router).await {
                                    warn!(error = %e, ?addr, "Connection handling failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept failed");
                        }
                    }
                }
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades one TCP connection and hands it to the router.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        router: &Arc<Router>,
    ) -> Result<()> {
        debug!(?addr, "New TCP connection");

        let path = router.options().path.clone();
        let check_path = move |request: &Request, response: Response| {
            if request.uri().path() == path {
                Ok(response)
            } else {
                let mut rejection =
                    ErrorResponse::new(Some(format!("no endpoint at {}", request.uri().path())));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };

        let ws_stream = accept_hdr_async(stream, check_path)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        router.accept(ws_stream, Some(addr));
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::options::Options;
    use crate::protocol::Payload;
    use crate::transport::client::connect_with;
    use crate::transport::connection::tests::WAIT;

    async fn bind(options: Options) -> Server {
        let router = Router::with_options(options).expect("valid options");
        Server::bind("127.0.0.1:0", router)
            .await
            .expect("bind should succeed")
    }

    #[tokio::test]
    async fn test_server_bind_random_port() {
        let server = bind(Options::new()).await;

        assert!(server.port() > 0);
        assert_eq!(server.ws_url(), format!("ws://127.0.0.1:{}/ws", server.port()));
        assert_eq!(server.local_addr().port(), server.port());
    }

    #[tokio::test]
    async fn test_ping_pong_over_tcp() {
        for options in [Options::new(), Options::binary()] {
            let server = bind(options.clone()).await;

            server.router().on("ping", |conn, payload| {
                let counter: u64 = payload.deserialize()?;
                conn.emit_serialized("pong", &(counter + 1))?;
                Ok(())
            });

            let client = connect_with(&server.ws_url(), &options)
                .await
                .expect("connect");
            let (done_tx, mut done_rx) = mpsc::unbounded_channel();

            client.on("pong", move |conn, payload| {
                let counter: u64 = payload.deserialize()?;
                if counter == 10 {
                    let _ = done_tx.send(counter);
                } else {
                    conn.emit_serialized("ping", &counter)?;
                }
                Ok(())
            });
            client.spawn_read_loop();

            client.emit_serialized("ping", &0u64).expect("emit");

            let counter = timeout(WAIT, done_rx.recv()).await.expect("in time");
            assert_eq!(counter, Some(10), "{:?}", options.codec);

            let peer = &server.router().connections()[0];
            assert_eq!(peer.stats().frames_dispatched, 10);
            assert_eq!(peer.remote_addr().map(|a| a.ip()), Some(server.local_addr().ip()));

            client.close().expect("close");
        }
    }

    #[tokio::test]
    async fn test_echo_scalar_payload() {
        let server = bind(Options::new()).await;
        server.router().on("echo", |conn, payload| {
            conn.emit("echo", payload.clone())?;
            Ok(())
        });

        let client = connect_with(&server.ws_url(), &Options::new())
            .await
            .expect("connect");
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on("echo", move |_, payload| {
            let _ = tx.send(payload.clone());
            Ok(())
        });
        client.spawn_read_loop();

        client.emit("echo", "hello").expect("emit");
        let echoed = timeout(WAIT, rx.recv()).await.expect("in time");
        assert_eq!(echoed, Some(Payload::scalar("hello")));
    }

    #[tokio::test]
    async fn test_wrong_path_rejected() {
        let server = bind(Options::new()).await;
        let url = format!("ws://{}/elsewhere", server.local_addr());

        let result = connect_with(&url, &Options::new()).await;
        assert!(matches!(result, Err(Error::Connection { .. })));
        assert_eq!(server.router().connection_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let server = bind(Options::new()).await;
        server.shutdown();
        server.shutdown();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let result = connect_with(&server.ws_url(), &Options::new()).await;
        assert!(result.is_err());
    }
}
