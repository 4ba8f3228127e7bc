//! Server configuration and builder.
//!
//! The [`ServerBuilder`] provides a fluent API for configuring a
//! [`Server`] before it starts listening.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use linewire::protocol::line::LineDecoder;
//! use linewire::Server;
//!
//! let server = Server::builder(LineDecoder::new())
//!     .bind_address([127, 0, 0, 1].into())
//!     .accept_wait(Duration::from_millis(100))
//!     .receive_wait(Duration::from_millis(10))
//!     .build();
//!
//! assert!(!server.is_ready());
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use super::Server;
use crate::protocol::Decoder;
use crate::transport::ConnectionConfig;

/// Default time `accept_pending()` waits for a connection (zero: poll once).
pub const DEFAULT_ACCEPT_WAIT: Duration = Duration::ZERO;

/// Configuration for a server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to listen on.
    pub bind_address: IpAddr,
    /// How long `accept_pending()` waits for an inbound connection.
    pub accept_wait: Duration,
    /// Settings applied to every accepted connection.
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            accept_wait: DEFAULT_ACCEPT_WAIT,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Builder for configuring and creating a server.
pub struct ServerBuilder<D> {
    decoder: D,
    config: ServerConfig,
}

impl<D: Decoder + Clone> ServerBuilder<D> {
    /// Create a new builder; every session gets a clone of `decoder`.
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            config: ServerConfig::default(),
        }
    }

    /// Set the interface to listen on.
    ///
    /// Default: 0.0.0.0
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.config.bind_address = address;
        self
    }

    /// Set how long `accept_pending()` waits for a connection.
    ///
    /// Default: zero (never blocks)
    pub fn accept_wait(mut self, wait: Duration) -> Self {
        self.config.accept_wait = wait;
        self
    }

    /// Set how long each session's receive waits for data.
    ///
    /// Default: zero (never blocks)
    pub fn receive_wait(mut self, wait: Duration) -> Self {
        self.config.connection.receive_wait = wait;
        self
    }

    /// Set the per-read buffer size for sessions.
    ///
    /// Default: 64KB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.connection.read_buffer_size = size;
        self
    }

    /// Enable or disable Nagle's algorithm on accepted sockets.
    ///
    /// Default: nodelay on
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.connection.nodelay = nodelay;
        self
    }

    /// Build the server (not yet listening).
    pub fn build(self) -> Server<D> {
        Server::with_config(self.decoder, self.config)
    }
}
