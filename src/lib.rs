//! Simple WebSockets - named events over WebSocket connections.
//!
//! This library lets a server and its connected peers exchange named
//! events with arbitrary payloads through an `emit` / `on` API instead of
//! raw frames.
//!
//! # Architecture
//!
//! - **Codec**: turns one `(event, payload)` pair into one WebSocket frame;
//!   a flat JSON text codec and a CBOR binary codec are provided
//! - **Connection**: one WebSocket channel with a handler table, a writer
//!   task and a read loop that dispatches frames in arrival order
//! - **Router**: server-side set of peers; handlers registered on it reach
//!   every peer, connected before or after registration
//!
//! # Quick Start
//!
//! ```no_run
//! use simple_websockets::{Router, Server, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let router = Router::new();
//!     router.on("echo", |conn, payload| {
//!         conn.emit("echo", payload.clone())?;
//!         Ok(())
//!     });
//!
//!     let server = Server::bind("127.0.0.1:51221", router).await?;
//!     println!("Listening on {}", server.ws_url());
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`options`] | Codec and acceptor configuration |
//! | [`protocol`] | Events, payloads, frames and codecs |
//! | [`transport`] | Connections, router, acceptor, client |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Codec and acceptor configuration.
pub mod options;

/// Event framing: payloads, frames and codecs.
pub mod protocol;

/// WebSocket transport layer.
///
/// Connections, the server-side router, the acceptor and client connect.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, HandlerError, Result};

// Identifier types
pub use identifiers::ConnectionId;

// Configuration
pub use options::{CodecKind, Options, TextKeys};

// Protocol types
pub use protocol::{BinaryCodec, Codec, Event, Frame, Payload, TextCodec, codec_for};

// Transport types
pub use transport::{
    Connection, ConnectionStats, Handler, HandlerResult, HandlerTable, Router, RouterEvent,
    Server, connect, connect_with,
};
