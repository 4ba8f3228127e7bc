//! Line Client - send a few lines and print the replies.
//!
//! Pair it with the `echo_server` example:
//!
//! ```text
//! cargo run --example echo_server -- 7000
//! cargo run --example line_client -- 127.0.0.1 7000
//! ```

use std::time::Duration;

use linewire::protocol::line::{LineDecoder, TextLine};
use linewire::transport::ConnectionConfig;
use linewire::{CancellationToken, Connection, Envelope};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(7000);

    let config = ConnectionConfig {
        receive_wait: Duration::from_millis(100),
        connect_timeout: Some(Duration::from_secs(5)),
        ..ConnectionConfig::default()
    };
    let conn = Connection::with_config(LineDecoder::new(), config);
    let cancel = CancellationToken::new();

    conn.connect(&address, port, &cancel).await?;

    let batch = vec![
        Envelope::new(TextLine::new("Hello!")),
        Envelope::new(TextLine::new("How are you?")),
    ];
    conn.send(&batch, &cancel).await?;

    let mut replies = 0;
    for _ in 0..50 {
        for reply in conn.receive(&cancel).await? {
            println!("{}", reply.as_str().unwrap_or("<invalid utf-8>"));
            replies += 1;
        }
        if replies >= batch.len() || !conn.is_connected() {
            break;
        }
    }

    conn.disconnect().await?;
    Ok(())
}
