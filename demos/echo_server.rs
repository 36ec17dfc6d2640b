//! Echo server.
//!
//! Demonstrates:
//! - Registering a handler on the router for every peer
//! - Echoing the received payload back to the sender
//! - Logging connects and disconnects from router lifecycle events
//!
//! Usage:
//!   cargo run --example echo_server
//!   cargo run --example echo_server -- --binary
//!   cargo run --example echo_server -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use common::{Args, ECHO_ADDR};
use simple_websockets::{Options, Router, RouterEvent, Server};
use tokio::sync::broadcast::error::RecvError;

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

    let router = Router::with_options(options)?;
    router.on("echo", |conn, payload| {
        conn.emit("echo", payload.clone())?;
        Ok(())
    });

    let mut lifecycle = router.subscribe();
    tokio::spawn(async move {
        loop {
            match lifecycle.recv().await {
                Ok(RouterEvent::Connected { id, remote_addr }) => {
                    println!("[+] {id} connected from {remote_addr:?}");
                }
                Ok(RouterEvent::Disconnected { id }) => {
                    println!("[-] {id} disconnected");
                }
                Err(RecvError::Lagged(missed)) => {
                    println!("[!] missed {missed} lifecycle events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let server = Server::bind(ECHO_ADDR, router).await?;
    println!("=== Echo server on {} ===", server.ws_url());
    println!("Press Ctrl+C to stop\n");

    tokio::signal::ctrl_c().await?;

    server.shutdown();
    server.router().shutdown();
    println!("\nStopped");
    Ok(())
}
