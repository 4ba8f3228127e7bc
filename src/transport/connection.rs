//! TCP connection channel.
//!
//! A [`Connection`] wraps one live TCP stream plus the frame buffer that
//! turns its bytes into messages. The stream is split into read and write
//! halves, each behind its own lock, so one send and one receive can run at
//! the same time on the same connection.
//!
//! ```text
//!             ┌─ reader: OwnedReadHalf + FrameBuffer ─► Vec<Envelope<M>>
//! TcpStream ──┤
//!             └─ writer: OwnedWriteHalf ◄─ encoded &[Envelope<M>]
//! ```
//!
//! Lock order is reader then writer; paths that close one side after a
//! failure release their own lock before touching the other.
//!
//! # Example
//!
//! ```ignore
//! use linewire::protocol::line::{LineDecoder, TextLine};
//! use linewire::transport::Connection;
//! use linewire::Envelope;
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let conn = Connection::new(LineDecoder::new());
//! conn.connect("127.0.0.1", 7000, &cancel).await?;
//! conn.send(&[Envelope::new(TextLine::new("Hello!"))], &cancel).await?;
//! let replies = conn.receive(&cancel).await?;
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cancel::cancellable;
use crate::error::{LinewireError, Result};
use crate::message::{Envelope, Message};
use crate::protocol::{Decoder, FrameBuffer};

/// Default read buffer size (64 KB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default time `receive()` waits for data (zero: poll once).
pub const DEFAULT_RECEIVE_WAIT: Duration = Duration::ZERO;

/// Configuration for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Size of the scratch buffer used per socket read.
    pub read_buffer_size: usize,
    /// How long `receive()` waits for the socket to become readable.
    pub receive_wait: Duration,
    /// Upper bound on `connect()`; `None` leaves it to the OS.
    pub connect_timeout: Option<Duration>,
    /// Disable Nagle's algorithm on the socket.
    pub nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            receive_wait: DEFAULT_RECEIVE_WAIT,
            connect_timeout: None,
            nodelay: true,
        }
    }
}

/// Read side of the channel.
struct ReadSide<D: Decoder> {
    half: Option<OwnedReadHalf>,
    frames: FrameBuffer<D>,
    scratch: Vec<u8>,
    /// Protocol error that closed the channel, reported by the next receive.
    fault: Option<LinewireError>,
}

/// A client-side or accepted TCP channel with its own frame buffer.
///
/// State machine: `Disconnected → Connected → Disconnected`. Explicit
/// disconnects and transport failures both land on `Disconnected`; the same
/// object can be connected again.
pub struct Connection<D: Decoder> {
    reader: Mutex<ReadSide<D>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    config: ConnectionConfig,
}

impl<D: Decoder> Connection<D> {
    /// Create a disconnected channel with default configuration.
    pub fn new(decoder: D) -> Self {
        Self::with_config(decoder, ConnectionConfig::default())
    }

    /// Create a disconnected channel with custom configuration.
    pub fn with_config(decoder: D, config: ConnectionConfig) -> Self {
        Self {
            reader: Mutex::new(ReadSide {
                half: None,
                frames: FrameBuffer::new(decoder),
                scratch: vec![0u8; config.read_buffer_size.max(1)],
                fault: None,
            }),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            config,
        }
    }

    /// Wrap an already-connected stream (used for accepted connections).
    pub fn from_stream(stream: TcpStream, decoder: D, config: ConnectionConfig) -> Result<Self> {
        stream.set_nodelay(config.nodelay)?;
        let (read_half, write_half) = stream.into_split();

        let mut conn = Self::with_config(decoder, config);
        conn.reader.get_mut().half = Some(read_half);
        *conn.writer.get_mut() = Some(write_half);
        *conn.connected.get_mut() = true;
        Ok(conn)
    }

    /// Connect to `address:port`, replacing any live transport.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty address or port 0.
    /// - `Io` if the connection cannot be established (or times out).
    /// - `Cancelled` if `cancel` fires first; the channel stays disconnected.
    pub async fn connect(
        &self,
        address: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<()> {
        validate_endpoint(address, port)?;

        if let Err(e) = self.disconnect().await {
            tracing::debug!("Error closing previous transport: {}", e);
        }

        let stream = cancellable(cancel, async {
            let connect = TcpStream::connect((address, port));
            let stream = match self.config.connect_timeout {
                Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                    io::Error::new(io::ErrorKind::TimedOut, "connect timed out")
                })??,
                None => connect.await?,
            };
            Ok::<_, LinewireError>(stream)
        })
        .await?;

        stream.set_nodelay(self.config.nodelay)?;
        let (read_half, write_half) = stream.into_split();

        let mut side = self.reader.lock().await;
        let mut writer = self.writer.lock().await;
        side.half = Some(read_half);
        side.frames.clear();
        side.fault = None;
        *writer = Some(write_half);
        self.connected.store(true, Ordering::Release);

        tracing::debug!("Connected to {}:{}", address, port);
        Ok(())
    }

    /// Close the transport if open. Safe to call repeatedly.
    ///
    /// The backlog is discarded. An error is only returned if a live
    /// transport failed to shut down cleanly; it is closed regardless.
    pub async fn disconnect(&self) -> Result<()> {
        let mut side = self.reader.lock().await;
        let mut writer = self.writer.lock().await;

        self.connected.store(false, Ordering::Release);
        side.half = None;
        side.frames.clear();
        side.fault = None;

        match writer.take() {
            Some(mut half) => match half.shutdown().await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
                Err(e) => Err(e.into()),
            },
            None => Ok(()),
        }
    }

    /// Encode all messages in order and write them as one transport write.
    ///
    /// An empty slice is a no-op. Message boundaries are not preserved at
    /// the transport level; the peer's frame buffer restores them.
    ///
    /// # Errors
    ///
    /// - `NotConnected` without a live transport.
    /// - `Io` on write failure; the channel is closed.
    /// - `Cancelled` if `cancel` fires. Nothing is written when it already
    ///   fired on entry; once the write has started part of the batch may be
    ///   on the wire, so the channel is closed.
    pub async fn send<M: Message>(
        &self,
        messages: &[Envelope<M>],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let half = guard.as_mut().ok_or(LinewireError::NotConnected)?;

        if messages.is_empty() {
            return Ok(());
        }

        let mut out = BytesMut::new();
        for envelope in messages {
            envelope.message().encode(&mut out)?;
        }

        if cancel.is_cancelled() {
            return Err(LinewireError::Cancelled);
        }

        let result = cancellable(cancel, async {
            half.write_all(&out).await?;
            half.flush().await?;
            Ok::<_, LinewireError>(())
        })
        .await;

        match result {
            Err(e @ (LinewireError::Io(_) | LinewireError::Cancelled)) => {
                tracing::debug!("Write interrupted, closing connection: {}", e);
                guard.take();
                drop(guard);
                self.connected.store(false, Ordering::Release);
                self.close_read_side().await;
                Err(e)
            }
            other => other,
        }
    }

    /// Read every byte currently available and frame it.
    ///
    /// Waits at most `receive_wait` for the socket to become readable, then
    /// drains it without blocking. Returns an empty list when nothing new
    /// arrived; the backlog is left untouched in that case. If the peer
    /// closed the stream, messages completed before EOF are returned and the
    /// channel is closed.
    ///
    /// A protocol error also closes the channel. Messages completed before
    /// the offending bytes are returned first and the error comes from the
    /// following call.
    ///
    /// # Errors
    ///
    /// - `NotConnected` without a live transport.
    /// - `Protocol` if the peer broke the protocol; the channel is closed.
    /// - `Io` on read failure; the channel is closed.
    /// - `Cancelled` if `cancel` fires while waiting; nothing is read.
    pub async fn receive(&self, cancel: &CancellationToken) -> Result<Vec<Envelope<D::Item>>> {
        let mut guard = self.reader.lock().await;
        let side = &mut *guard;
        if let Some(fault) = side.fault.take() {
            return Err(fault);
        }
        let half = side.half.as_ref().ok_or(LinewireError::NotConnected)?;

        let wait = self.config.receive_wait;
        cancellable(cancel, async {
            if let Ok(ready) = tokio::time::timeout(wait, half.readable()).await {
                ready?;
            }
            Ok::<_, LinewireError>(())
        })
        .await?;

        let mut incoming = Vec::new();
        let mut eof = false;
        loop {
            match half.try_read(&mut side.scratch) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => incoming.extend_from_slice(&side.scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("Read failed, closing connection: {}", e);
                    side.half = None;
                    side.frames.clear();
                    drop(guard);
                    self.connected.store(false, Ordering::Release);
                    self.close_write_side().await;
                    return Err(e.into());
                }
            }
        }

        let (messages, fault) = if incoming.is_empty() {
            (Vec::new(), None)
        } else {
            let framed = side.frames.push(&incoming)?;
            (framed.messages, framed.fault)
        };

        if let Some(fault) = fault {
            tracing::warn!("Protocol error, closing connection: {}", fault);
            side.half = None;
            side.frames.clear();
            let result = if messages.is_empty() {
                Err(fault)
            } else {
                side.fault = Some(fault);
                Ok(messages)
            };
            drop(guard);
            self.connected.store(false, Ordering::Release);
            self.close_write_side().await;
            return result;
        }

        if eof {
            tracing::debug!("Peer closed connection");
            side.half = None;
            side.frames.clear();
            drop(guard);
            self.connected.store(false, Ordering::Release);
            self.close_write_side().await;
        }

        Ok(messages)
    }

    /// Whether a live transport is attached.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Remote address of the live transport.
    pub async fn peer_addr(&self) -> Option<SocketAddr> {
        self.writer.lock().await.as_ref().and_then(|w| w.peer_addr().ok())
    }

    /// Local address of the live transport.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.writer.lock().await.as_ref().and_then(|w| w.local_addr().ok())
    }

    /// Number of bytes waiting in the frame buffer.
    pub async fn backlog_len(&self) -> usize {
        self.reader.lock().await.frames.len()
    }

    /// The configuration in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn close_read_side(&self) {
        let mut side = self.reader.lock().await;
        side.half = None;
        side.frames.clear();
    }

    async fn close_write_side(&self) {
        self.writer.lock().await.take();
    }
}

/// Check an address/port pair before connecting.
pub(crate) fn validate_endpoint(address: &str, port: u16) -> Result<()> {
    if address.trim().is_empty() {
        return Err(LinewireError::InvalidArgument(
            "address must not be empty".to_string(),
        ));
    }
    validate_port(port)
}

/// Ports are valid in 1..=65535.
pub(crate) fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(LinewireError::InvalidArgument(
            "port must be in 1..=65535".to_string(),
        ));
    }
    Ok(())
}
