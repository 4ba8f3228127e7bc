//! Transport module - TCP connection channels.
//!
//! Provides [`Connection`], the channel used both by clients (outbound
//! `connect`) and by the server for every accepted session.

mod connection;

pub(crate) use connection::validate_port;
pub use connection::{Connection, ConnectionConfig, DEFAULT_READ_BUFFER_SIZE, DEFAULT_RECEIVE_WAIT};
