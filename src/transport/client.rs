//! Client-side connections.
//!
//! Dials a WebSocket endpoint and wraps the channel in a [`Connection`].
//! The client has exactly one connection and no router; handlers are
//! registered on the connection itself before starting its read loop.
//!
//! # Example
//!
//! ```ignore
//! let client = connect("ws://127.0.0.1:51221/ws").await?;
//! client.on("pong", |_, payload| {
//!     println!("pong: {:?}", payload);
//!     Ok(())
//! });
//! client.spawn_read_loop();
//! client.emit("ping", ())?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::options::Options;
use crate::protocol::codec_for;

use super::connection::Connection;

// ============================================================================
// Connect
// ============================================================================

/// Connects to `url` with default options (text codec).
///
/// # Errors
///
/// See [`connect_with`].
pub async fn connect(url: &str) -> Result<Connection> {
    connect_with(url, &Options::default()).await
}

/// Connects to `url` using the codec selected by `options`.
///
/// The returned connection's read loop is not started yet.
///
/// # Errors
///
/// - [`Error::Config`] if the URL is invalid or not `ws://`/`wss://`
/// - [`Error::Connection`] if the connection or upgrade fails
pub async fn connect_with(url: &str, options: &Options) -> Result<Connection> {
    options.validate()?;
    let url = parse_url(url)?;

    debug!(%url, codec = ?options.codec, "Connecting");

    let (ws_stream, response) = connect_async(url.as_str())
        .await
        .map_err(|e| Error::connection(format!("WebSocket connect to {url} failed: {e}")))?;

    info!(%url, status = %response.status(), "WebSocket connection established");

    Ok(Connection::new(ws_stream, codec_for(options)))
}

/// Parses and checks a WebSocket URL.
fn parse_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| Error::config(format!("invalid URL '{url}': {e}")))?;

    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(Error::config(format!(
            "unsupported URL scheme '{other}', expected ws or wss"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
