//! Echo Server - line protocol server example.
//!
//! This example demonstrates:
//! - Building a server with the builder pattern
//! - Polling for new sessions and inbound messages in one loop
//! - Replying to a single session with `send_to`
//! - Dropping sessions that went quiet
//!
//! # Running
//!
//! ```text
//! RUST_LOG=debug cargo run --example echo_server -- 7000
//! printf 'Hello!\nHow are you?\n' | nc 127.0.0.1 7000
//! ```

use std::time::Duration;

use linewire::protocol::line::{LineDecoder, TextLine};
use linewire::{CancellationToken, Envelope, LinewireError, Server, StaleMode};
use tracing_subscriber::EnvFilter;

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .map(|p| p.parse())
        .transpose()?
        .unwrap_or(7000);

    let server = Server::builder(LineDecoder::new())
        .accept_wait(Duration::from_millis(10))
        .receive_wait(Duration::from_millis(10))
        .build();
    server.start(port).await?;

    // Ctrl-C cancels whatever the loop is waiting on
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    match serve(&server, &cancel).await {
        Ok(()) | Err(LinewireError::Cancelled) => {}
        Err(e) => return Err(e.into()),
    }

    server.stop().await;
    Ok(())
}

async fn serve(server: &Server<LineDecoder>, cancel: &CancellationToken) -> linewire::Result<()> {
    loop {
        while let Some(id) = server.accept_pending(cancel).await? {
            tracing::info!("Session {} joined", id);
        }

        for msg in server.receive_all(cancel).await?.messages {
            if !msg.envelope.is_valid() {
                tracing::warn!("Dropping invalid line from {}", msg.remote_addr);
                continue;
            }
            let text = msg.envelope.as_str().unwrap_or_default();
            let reply = Envelope::new(TextLine::new(format!("echo: {}", text)));
            if let Err(e) = server.send_to(&[reply], msg.session, cancel).await {
                tracing::warn!("Reply to {} failed: {}", msg.session, e);
            }
        }

        for id in server.stale_sessions(StaleMode::LastReceived, IDLE_TIMEOUT)? {
            tracing::info!("Session {} went stale", id);
            server.disconnect(id).await?;
        }
    }
}
