//! # linewire
//!
//! Message-oriented TCP networking on top of tokio.
//!
//! Raw byte streams are turned into discrete, validated messages by a
//! pluggable [`protocol::Decoder`]. Both ends speak the same protocol:
//!
//! - **[`transport::Connection`]**: one TCP channel with its own frame buffer.
//! - **[`Server`]**: a listener plus a registry of sessions, with
//!   non-blocking accept, concurrent fan-out send/receive, targeted send
//!   and staleness detection.
//!
//! ## Protocols
//!
//! - [`protocol::line`]: newline-delimited text.
//! - [`protocol::json_line`]: one JSON document per line.
//! - [`protocol::length_prefixed`]: 4-byte big-endian length + payload.
//!
//! ## Example
//!
//! ```ignore
//! use linewire::protocol::line::{LineDecoder, TextLine};
//! use linewire::{CancellationToken, Envelope, Server};
//!
//! #[tokio::main]
//! async fn main() -> linewire::Result<()> {
//!     let cancel = CancellationToken::new();
//!     let server = Server::new(LineDecoder::new());
//!     server.start(7000).await?;
//!
//!     loop {
//!         server.accept_pending(&cancel).await?;
//!         for inbound in server.receive_all(&cancel).await?.messages {
//!             let echo = Envelope::new(inbound.envelope.into_message());
//!             server.send_to(&[echo], inbound.session, &cancel).await?;
//!         }
//!     }
//! }
//! ```

pub mod cancel;
pub mod codec;
pub mod error;
pub mod message;
pub mod protocol;
pub mod server;
pub mod transport;

pub use error::{LinewireError, Result};
pub use message::{Envelope, Inbound, Message, Violation};
pub use server::{
    ReceiveOutcome, SendOutcome, Server, ServerBuilder, SessionFailure, SessionId, StaleMode,
};
pub use tokio_util::sync::CancellationToken;
pub use transport::Connection;
