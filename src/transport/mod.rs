//! WebSocket transport layer.
//!
//! This module turns established WebSocket channels into named-event
//! connections and keeps track of them on the server side.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   upgrade    ┌──────────┐  accept   ┌──────────────┐
//! │ Server       │─────────────►│ Router   │──────────►│ Connection   │
//! │ (acceptor)   │              │ handlers │  on (fan  │ read loop +  │
//! └──────────────┘              │ + peers  │   out)    │ writer task  │
//!                               └──────────┘           └──────┬───────┘
//!                                                             │ WebSocket
//! ┌──────────────┐                                     ┌──────┴───────┐
//! │ client::     │────────────── dial ────────────────►│ Connection   │
//! │ connect      │                                     │ (client)     │
//! └──────────────┘                                     └──────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Server::bind` accepts TCP and upgrades on the configured path
//! 2. `Router::accept` wraps the channel, copies global handlers, spawns
//!    the read loop
//! 3. `Connection::emit` / `Connection::on` exchange events
//! 4. On close or transport error the read loop ends and the router drops
//!    the peer
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | Dialing a WebSocket endpoint |
//! | `connection` | Connection, handlers, read loop |
//! | `router` | Peer set and handler fan-out |
//! | `server` | TCP acceptor and upgrade |

// ============================================================================
// Submodules
// ============================================================================

/// Client-side connect.
pub mod client;

/// WebSocket connection and read loop.
pub mod connection;

/// Server-side peer registry.
pub mod router;

/// WebSocket acceptor.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{connect, connect_with};
pub use connection::{Connection, ConnectionStats, Handler, HandlerResult, HandlerTable};
pub use router::{Router, RouterEvent};
pub use server::Server;
