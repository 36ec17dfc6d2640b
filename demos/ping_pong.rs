//! Ping-pong between a server and a client in one process.
//!
//! The client sends `ping` with a counter, the server answers `pong` with
//! the counter incremented, until the counter reaches the limit.
//!
//! Usage:
//!   cargo run --example ping_pong
//!   cargo run --example ping_pong -- --binary

mod common;

// ============================================================================
// Imports
// ============================================================================

use common::Args;
use simple_websockets::{Options, Router, Server, connect_with};
use tokio::sync::oneshot;

// ============================================================================
// Constants
// ============================================================================

const LIMIT: u64 = 10;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    common::init_logging(args.debug);

    let options = if args.binary {
        Options::binary()
    } else {
        Options::new()
    };

    // ========================================================================
    // Server
    // ========================================================================

    let router = Router::with_options(options.clone())?;
    router.on("ping", |conn, payload| {
        let counter: u64 = payload.deserialize()?;
        println!("[server] ping {counter}");
        conn.emit_serialized("pong", &(counter + 1))?;
        Ok(())
    });

    let server = Server::bind("127.0.0.1:0", router).await?;

    // ========================================================================
    // Client
    // ========================================================================

    let client = connect_with(&server.ws_url(), &options).await?;
    let (done_tx, done_rx) = oneshot::channel();
    let done_tx = parking_lot::Mutex::new(Some(done_tx));

    client.on("pong", move |conn, payload| {
        let counter: u64 = payload.deserialize()?;
        println!("[client] pong {counter}");
        if counter >= LIMIT {
            if let Some(tx) = done_tx.lock().take() {
                let _ = tx.send(counter);
            }
        } else {
            conn.emit_serialized("ping", &counter)?;
        }
        Ok(())
    });
    client.spawn_read_loop();

    client.emit_serialized("ping", &0u64)?;

    let last = done_rx.await?;
    println!("\nDone after {last} round trips");

    client.close()?;
    server.shutdown();
    Ok(())
}
