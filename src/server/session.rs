//! Remote sessions tracked by the server.
//!
//! A [`Session`] is one accepted [`Connection`] plus an opaque
//! [`SessionId`] and two activity timestamps. The timestamps are atomics
//! holding Unix milliseconds and only ever move forward (`fetch_max`), so a
//! send and a receive finishing at the same time cannot lose either update.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::protocol::Decoder;
use crate::transport::Connection;

/// Opaque identifier assigned to a session when it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random identifier.
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which activity a staleness check looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleMode {
    /// Only a dead transport makes a session stale.
    None,
    /// Stale when nothing was received within the timeout.
    LastReceived,
    /// Stale when nothing was sent within the timeout.
    LastSent,
}

/// One accepted remote connection.
pub struct Session<D: Decoder> {
    id: SessionId,
    remote_addr: SocketAddr,
    connection: Connection<D>,
    last_received: AtomicU64,
    last_sent: AtomicU64,
}

impl<D: Decoder> Session<D> {
    pub(crate) fn new(id: SessionId, remote_addr: SocketAddr, connection: Connection<D>) -> Self {
        let now = to_millis(SystemTime::now());
        Self {
            id,
            remote_addr,
            connection,
            last_received: AtomicU64::new(now),
            last_sent: AtomicU64::new(now),
        }
    }

    /// The session identifier.
    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote address captured at accept time.
    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The session's channel.
    ///
    /// Calling `send` or `receive` on it directly while a server fan-out is
    /// running on the same session is allowed but serializes on the channel.
    pub fn connection(&self) -> &Connection<D> {
        &self.connection
    }

    /// When messages were last received (accept time if never).
    pub fn last_received(&self) -> SystemTime {
        from_millis(self.last_received.load(Ordering::Acquire))
    }

    /// When messages were last sent (accept time if never).
    pub fn last_sent(&self) -> SystemTime {
        from_millis(self.last_sent.load(Ordering::Acquire))
    }

    pub(crate) fn touch_received(&self, at: SystemTime) {
        self.last_received.fetch_max(to_millis(at), Ordering::AcqRel);
    }

    pub(crate) fn touch_sent(&self, at: SystemTime) {
        self.last_sent.fetch_max(to_millis(at), Ordering::AcqRel);
    }

    /// Evaluate the staleness policy at `now`.
    ///
    /// A session whose transport is closed is always stale.
    pub fn is_stale(&self, mode: StaleMode, timeout: Duration, now: SystemTime) -> bool {
        if !self.connection.is_connected() {
            return true;
        }

        let last = match mode {
            StaleMode::None => return false,
            StaleMode::LastReceived => self.last_received(),
            StaleMode::LastSent => self.last_sent(),
        };

        now.duration_since(last).unwrap_or(Duration::ZERO) > timeout
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, received: SystemTime, sent: SystemTime) {
        self.last_received.store(to_millis(received), Ordering::Release);
        self.last_sent.store(to_millis(sent), Ordering::Release);
    }
}

fn to_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn from_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::line::LineDecoder;
    use crate::transport::ConnectionConfig;
    use tokio::net::{TcpListener, TcpStream};

    async fn live_session() -> (Session<LineDecoder>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (stream, remote) = accepted.unwrap();

        let conn =
            Connection::from_stream(stream, LineDecoder::new(), ConnectionConfig::default())
                .unwrap();
        (Session::new(SessionId::generate(), remote, conn), client.unwrap())
    }

    #[test]
    fn test_session_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| SessionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn test_staleness_boundaries() {
        let (session, _client) = live_session().await;
        let timeout = Duration::from_secs(10);
        let now = SystemTime::now();

        session.backdate(now - Duration::from_secs(11), now);
        assert!(session.is_stale(StaleMode::LastReceived, timeout, now));
        assert!(!session.is_stale(StaleMode::LastSent, timeout, now));
        assert!(!session.is_stale(StaleMode::None, timeout, now));

        session.backdate(now - Duration::from_secs(9), now - Duration::from_secs(11));
        assert!(!session.is_stale(StaleMode::LastReceived, timeout, now));
        assert!(session.is_stale(StaleMode::LastSent, timeout, now));
    }

    #[tokio::test]
    async fn test_closed_transport_is_always_stale() {
        let (session, _client) = live_session().await;
        let now = SystemTime::now();

        session.connection().disconnect().await.unwrap();

        assert!(session.is_stale(StaleMode::None, Duration::from_secs(3600), now));
        assert!(session.is_stale(StaleMode::LastReceived, Duration::from_secs(3600), now));
    }

    #[tokio::test]
    async fn test_touch_never_moves_backwards() {
        let (session, _client) = live_session().await;
        let now = SystemTime::now();
        let later = now + Duration::from_secs(5);

        session.touch_sent(later);
        session.touch_sent(now);
        assert_eq!(to_millis(session.last_sent()), to_millis(later));

        // receive and send timestamps are independent
        assert!(session.last_received() < later);
    }
}
