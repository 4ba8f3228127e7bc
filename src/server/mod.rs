//! Multi-session server.
//!
//! The [`Server`] owns the listening socket and a concurrent registry of
//! [`Session`]s. It accepts without blocking and fans send/receive out across
//! every session at once:
//!
//! ```text
//!                    ┌─► session A: receive ─┐
//! receive_all() ─────┼─► session B: receive ─┼─► ReceiveOutcome { messages, failures }
//!   (snapshot)       └─► session C: receive ─┘
//! ```
//!
//! Fan-out is best-effort. One session failing never stops the others; each
//! failure is reported in the outcome next to the results that did succeed,
//! and the application decides whether to drop the session.
//!
//! # Example
//!
//! ```ignore
//! use linewire::protocol::line::{LineDecoder, TextLine};
//! use linewire::{Envelope, Server, StaleMode};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let server = Server::new(LineDecoder::new());
//! server.start(7000).await?;
//!
//! loop {
//!     while let Some(id) = server.accept_pending(&cancel).await? {
//!         tracing::info!("session {} joined", id);
//!     }
//!     let inbound = server.receive_all(&cancel).await?;
//!     for msg in inbound.messages {
//!         let reply = Envelope::new(TextLine::new("ack"));
//!         server.send_to(&[reply], msg.session, &cancel).await?;
//!     }
//!     for id in server.stale_sessions(StaleMode::LastReceived, Duration::from_secs(60))? {
//!         server.disconnect(id).await?;
//!     }
//! }
//! ```

mod builder;
mod session;

pub use builder::{ServerBuilder, ServerConfig, DEFAULT_ACCEPT_WAIT};
pub use session::{Session, SessionId, StaleMode};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cancel::cancellable;
use crate::error::{LinewireError, Result};
use crate::message::{Envelope, Inbound, Message};
use crate::protocol::Decoder;
use crate::transport::{validate_port, Connection};

/// A per-session error collected during a fan-out call.
#[derive(Debug)]
pub struct SessionFailure {
    /// The session that failed.
    pub session: SessionId,
    /// What went wrong.
    pub error: LinewireError,
}

/// Result of [`Server::receive_all`].
#[derive(Debug)]
pub struct ReceiveOutcome<M> {
    /// Messages from every session, in arrival order within each session.
    pub messages: Vec<Inbound<M>>,
    /// Sessions whose receive failed.
    pub failures: Vec<SessionFailure>,
}

/// Result of [`Server::send_to_all`].
#[derive(Debug, Default)]
pub struct SendOutcome {
    /// Sessions the batch was written to.
    pub delivered: Vec<SessionId>,
    /// Sessions whose send failed.
    pub failures: Vec<SessionFailure>,
}

/// A TCP server multiplexing many remote sessions.
///
/// State machine: `NotReady → Ready` on [`start`](Self::start), back to
/// `NotReady` on [`stop`](Self::stop). Every operation other than `start`
/// and `stop` fails with `ServerNotReady` while not ready. All methods take
/// `&self`; share the server with `Arc` to drive it from several tasks.
pub struct Server<D: Decoder + Clone> {
    config: ServerConfig,
    decoder: D,
    listener: Mutex<Option<TcpListener>>,
    ready: AtomicBool,
    sessions: DashMap<SessionId, Arc<Session<D>>>,
}

impl<D: Decoder + Clone> Server<D> {
    /// Create a server with default configuration.
    pub fn new(decoder: D) -> Self {
        Self::with_config(decoder, ServerConfig::default())
    }

    /// Create a server with custom configuration.
    pub fn with_config(decoder: D, config: ServerConfig) -> Self {
        Self {
            config,
            decoder,
            listener: Mutex::new(None),
            ready: AtomicBool::new(false),
            sessions: DashMap::new(),
        }
    }

    /// Create a new server builder.
    pub fn builder(decoder: D) -> ServerBuilder<D> {
        ServerBuilder::new(decoder)
    }

    /// Start listening on `port`, stopping any previous listener first.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for port 0.
    /// - `Io` if the port cannot be bound; the server is left not ready.
    pub async fn start(&self, port: u16) -> Result<()> {
        validate_port(port)?;

        let mut slot = self.listener.lock().await;
        if slot.take().is_some() {
            self.ready.store(false, Ordering::Release);
            self.close_all_sessions().await;
        }

        let listener = TcpListener::bind((self.config.bind_address, port)).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        *slot = Some(listener);
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop listening and drop every session. Safe to call when stopped.
    pub async fn stop(&self) {
        let mut slot = self.listener.lock().await;
        let was_listening = slot.take().is_some();
        self.ready.store(false, Ordering::Release);
        self.close_all_sessions().await;

        if was_listening {
            tracing::info!("Server stopped");
        }
    }

    /// Accept one waiting connection, if any.
    ///
    /// Waits at most `accept_wait` and returns `Ok(None)` when nobody is
    /// waiting, so it can be polled in a loop.
    ///
    /// # Errors
    ///
    /// - `ServerNotReady` before `start()`.
    /// - `Io` if accepting fails.
    /// - `Cancelled` if `cancel` fires; no session is inserted.
    pub async fn accept_pending(&self, cancel: &CancellationToken) -> Result<Option<SessionId>> {
        self.ensure_ready()?;

        // Held until the session is registered so stop() cannot run in between.
        let slot = self.listener.lock().await;
        let listener = slot.as_ref().ok_or(LinewireError::ServerNotReady)?;
        let wait = self.config.accept_wait;

        let accepted = cancellable(cancel, async {
            match tokio::time::timeout(wait, listener.accept()).await {
                Ok(res) => Ok(Some(res?)),
                Err(_) => Ok::<_, LinewireError>(None),
            }
        })
        .await?;

        let Some((stream, remote_addr)) = accepted else {
            return Ok(None);
        };

        let connection =
            Connection::from_stream(stream, self.decoder.clone(), self.config.connection.clone())?;
        let id = SessionId::generate();
        self.sessions
            .insert(id, Arc::new(Session::new(id, remote_addr, connection)));
        drop(slot);

        tracing::debug!("Accepted session {} from {}", id, remote_addr);
        Ok(Some(id))
    }

    /// Remove a session and close its channel.
    ///
    /// # Errors
    ///
    /// - `ServerNotReady` before `start()`.
    /// - `SessionNotFound` if `id` is not registered.
    /// - `Io` if the channel did not shut down cleanly; the session is
    ///   removed regardless.
    pub async fn disconnect(&self, id: SessionId) -> Result<()> {
        self.ensure_ready()?;

        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or(LinewireError::SessionNotFound(id))?;

        tracing::debug!("Disconnecting session {}", id);
        session.connection().disconnect().await
    }

    /// Close every session, ignoring individual close failures.
    pub async fn disconnect_all(&self) -> Result<()> {
        self.ensure_ready()?;
        self.close_all_sessions().await;
        Ok(())
    }

    /// Receive from every session concurrently.
    ///
    /// Works on a snapshot of the registry taken at call start. Sessions
    /// that produced messages get their last-received timestamp refreshed.
    pub async fn receive_all(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome<D::Item>> {
        self.ensure_ready()?;

        let sessions = self.snapshot();
        let results = join_all(sessions.iter().map(|s| s.connection().receive(cancel))).await;

        let now = SystemTime::now();
        let mut outcome = ReceiveOutcome {
            messages: Vec::new(),
            failures: Vec::new(),
        };

        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(envelopes) if envelopes.is_empty() => {}
                Ok(envelopes) => {
                    session.touch_received(now);
                    outcome
                        .messages
                        .extend(envelopes.into_iter().map(|envelope| Inbound {
                            session: session.id(),
                            remote_addr: session.remote_addr(),
                            envelope,
                        }));
                }
                Err(error) => {
                    tracing::warn!("Receive failed for session {}: {}", session.id(), error);
                    outcome.failures.push(SessionFailure {
                        session: session.id(),
                        error,
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Send the same batch to every session concurrently.
    ///
    /// Best-effort: failures are collected per session and never stop
    /// delivery to the rest.
    pub async fn send_to_all<M: Message>(
        &self,
        messages: &[Envelope<M>],
        cancel: &CancellationToken,
    ) -> Result<SendOutcome> {
        self.ensure_ready()?;

        let sessions = self.snapshot();
        let results = join_all(
            sessions
                .iter()
                .map(|s| s.connection().send(messages, cancel)),
        )
        .await;

        let now = SystemTime::now();
        let mut outcome = SendOutcome::default();

        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(()) => {
                    if !messages.is_empty() {
                        session.touch_sent(now);
                    }
                    outcome.delivered.push(session.id());
                }
                Err(error) => {
                    tracing::warn!("Send failed for session {}: {}", session.id(), error);
                    outcome.failures.push(SessionFailure {
                        session: session.id(),
                        error,
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Send a batch to one session.
    ///
    /// # Errors
    ///
    /// - `ServerNotReady` before `start()`.
    /// - `SessionNotFound` if `id` is not registered.
    /// - Any send error of the session's channel; the timestamp is not
    ///   updated in that case.
    pub async fn send_to<M: Message>(
        &self,
        messages: &[Envelope<M>],
        id: SessionId,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_ready()?;

        let session = self.session(id).ok_or(LinewireError::SessionNotFound(id))?;
        session.connection().send(messages, cancel).await?;

        if !messages.is_empty() {
            session.touch_sent(SystemTime::now());
        }
        Ok(())
    }

    /// Sessions that qualify as stale under `mode` and `timeout`.
    ///
    /// Never mutates the registry; pass the result to
    /// [`disconnect`](Self::disconnect) to drop them.
    pub fn stale_sessions(&self, mode: StaleMode, timeout: Duration) -> Result<Vec<SessionId>> {
        self.ensure_ready()?;

        let now = SystemTime::now();
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_stale(mode, timeout, now))
            .map(|entry| *entry.key())
            .collect())
    }

    /// Look up a session.
    pub fn session(&self, id: SessionId) -> Option<Arc<Session<D>>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Identifiers of all registered sessions.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the server is listening.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Address the listener is bound to.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .await
            .as_ref()
            .and_then(|l| l.local_addr().ok())
    }

    /// The configuration in use.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(LinewireError::ServerNotReady)
        }
    }

    fn snapshot(&self) -> Vec<Arc<Session<D>>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    async fn close_all_sessions(&self) {
        let ids = self.session_ids();
        let removed: Vec<_> = ids
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id).map(|(_, s)| s))
            .collect();

        let results = join_all(removed.iter().map(|s| s.connection().disconnect())).await;
        for (session, result) in removed.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("Error closing session {}: {}", session.id(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::line::{LineDecoder, TextLine};
    use std::net::{IpAddr, Ipv4Addr};

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn test_server() -> Server<LineDecoder> {
        Server::builder(LineDecoder::new())
            .bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .accept_wait(Duration::from_secs(2))
            .receive_wait(Duration::from_millis(20))
            .build()
    }

    async fn started() -> (Server<LineDecoder>, u16) {
        let server = test_server();
        let port = free_port();
        server.start(port).await.unwrap();
        (server, port)
    }

    async fn join(server: &Server<LineDecoder>, port: u16) -> (Connection<LineDecoder>, SessionId) {
        let cancel = CancellationToken::new();
        let client = Connection::new(LineDecoder::new());
        client.connect("127.0.0.1", port, &cancel).await.unwrap();
        let id = server.accept_pending(&cancel).await.unwrap().unwrap();
        (client, id)
    }

    fn line(text: &str) -> Envelope<TextLine> {
        Envelope::new(TextLine::new(text))
    }

    #[tokio::test]
    async fn test_start_rejects_port_zero() {
        let server = test_server();
        let err = server.start(0).await.unwrap_err();
        assert!(matches!(err, LinewireError::InvalidArgument(_)));
        assert!(!server.is_ready());
    }

    #[tokio::test]
    async fn test_operations_require_start() {
        let server = test_server();
        let cancel = CancellationToken::new();

        assert!(matches!(
            server.accept_pending(&cancel).await,
            Err(LinewireError::ServerNotReady)
        ));
        assert!(matches!(
            server.receive_all(&cancel).await,
            Err(LinewireError::ServerNotReady)
        ));
        assert!(matches!(
            server.send_to_all(&[line("x")], &cancel).await,
            Err(LinewireError::ServerNotReady)
        ));
        assert!(matches!(
            server.stale_sessions(StaleMode::None, Duration::ZERO),
            Err(LinewireError::ServerNotReady)
        ));
        assert!(matches!(
            server.disconnect_all().await,
            Err(LinewireError::ServerNotReady)
        ));

        // stopping a server that never started is fine
        server.stop().await;
    }

    #[tokio::test]
    async fn test_accept_pending_without_clients() {
        let server = Server::builder(LineDecoder::new())
            .bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .build();
        server.start(free_port()).await.unwrap();
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            assert_eq!(server.accept_pending(&cancel).await.unwrap(), None);
        }
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_accept_registers_session() {
        let (server, port) = started().await;
        let (client, id) = join(&server, port).await;

        assert_eq!(server.session_ids(), vec![id]);
        let session = server.session(id).unwrap();
        assert_eq!(Some(session.remote_addr()), client.local_addr().await);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_session() {
        let (server, port) = started().await;
        let (_client, id) = join(&server, port).await;

        server.disconnect(id).await.unwrap();
        assert_eq!(server.session_count(), 0);

        let err = server.disconnect(id).await.unwrap_err();
        assert!(matches!(err, LinewireError::SessionNotFound(missing) if missing == id));

        let cancel = CancellationToken::new();
        let err = server.send_to(&[line("x")], id, &cancel).await.unwrap_err();
        assert!(matches!(err, LinewireError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_stop_drops_sessions() {
        let (server, port) = started().await;
        let (_a, _) = join(&server, port).await;
        let (_b, _) = join(&server, port).await;
        assert_eq!(server.session_count(), 2);

        server.stop().await;

        assert!(!server.is_ready());
        assert_eq!(server.session_count(), 0);
        assert!(server.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_restart_drops_previous_sessions() {
        let (server, port) = started().await;
        let (_a, _) = join(&server, port).await;

        server.start(free_port()).await.unwrap();

        assert!(server.is_ready());
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_receive_all_tags_and_touches() {
        let (server, port) = started().await;
        let (client, id) = join(&server, port).await;
        let (_quiet, quiet_id) = join(&server, port).await;
        let cancel = CancellationToken::new();

        let old = SystemTime::now() - Duration::from_secs(60);
        server.session(id).unwrap().backdate(old, old);
        server.session(quiet_id).unwrap().backdate(old, old);

        client.send(&[line("ping")], &cancel).await.unwrap();

        let mut inbound = Vec::new();
        for _ in 0..100 {
            let outcome = server.receive_all(&cancel).await.unwrap();
            assert!(outcome.failures.is_empty());
            inbound.extend(outcome.messages);
            if !inbound.is_empty() {
                break;
            }
        }

        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].session, id);
        assert_eq!(inbound[0].envelope.as_str(), Some("ping"));

        let session = server.session(id).unwrap();
        assert!(session.last_received() > old);
        // receiving never touches the sent timestamp
        assert!(session.last_sent() <= old + Duration::from_millis(1));
        assert!(server.session(quiet_id).unwrap().last_received() <= old + Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_send_to_all_isolates_failures() {
        let (server, port) = started().await;
        let (healthy, healthy_id) = join(&server, port).await;
        let (_broken, broken_id) = join(&server, port).await;
        let cancel = CancellationToken::new();

        let old = SystemTime::now() - Duration::from_secs(60);
        let healthy_session = server.session(healthy_id).unwrap();
        healthy_session.backdate(old, old);

        // close the transport but leave the session registered
        server
            .session(broken_id)
            .unwrap()
            .connection()
            .disconnect()
            .await
            .unwrap();

        let outcome = server.send_to_all(&[line("news")], &cancel).await.unwrap();

        assert_eq!(outcome.delivered, vec![healthy_id]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].session, broken_id);
        assert!(matches!(outcome.failures[0].error, LinewireError::NotConnected));
        assert!(healthy_session.last_sent() > old);

        let mut got = Vec::new();
        for _ in 0..100 {
            got.extend(healthy.receive(&cancel).await.unwrap());
            if !got.is_empty() {
                break;
            }
        }
        assert_eq!(got[0].as_str(), Some("news"));
    }

    #[tokio::test]
    async fn test_stale_sessions() {
        let (server, port) = started().await;
        let (_a, idle_id) = join(&server, port).await;
        let (_b, active_id) = join(&server, port).await;
        let (_c, dead_id) = join(&server, port).await;

        let timeout = Duration::from_secs(30);
        let now = SystemTime::now();
        server
            .session(idle_id)
            .unwrap()
            .backdate(now - Duration::from_secs(31), now);
        server
            .session(active_id)
            .unwrap()
            .backdate(now - Duration::from_secs(29), now);
        server
            .session(dead_id)
            .unwrap()
            .connection()
            .disconnect()
            .await
            .unwrap();

        let mut stale = server.stale_sessions(StaleMode::LastReceived, timeout).unwrap();
        stale.sort();
        let mut expected = vec![idle_id, dead_id];
        expected.sort();
        assert_eq!(stale, expected);

        assert_eq!(
            server.stale_sessions(StaleMode::None, timeout).unwrap(),
            vec![dead_id]
        );

        // evaluation never removes anything
        assert_eq!(server.session_count(), 3);
    }

    #[tokio::test]
    async fn test_stop_during_accept_leaves_no_session() {
        let (server, port) = started().await;
        let cancel = CancellationToken::new();
        let client = Connection::new(LineDecoder::new());

        let (accepted, ()) = tokio::join!(server.accept_pending(&cancel), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.connect("127.0.0.1", port, &cancel).await.unwrap();
            server.stop().await;
        });

        assert!(accepted.unwrap().is_some());
        assert!(!server.is_ready());
        assert_eq!(server.session_count(), 0);

        // a restart starts from an empty registry
        server.start(free_port()).await.unwrap();
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_accept_inserts_nothing() {
        let (server, port) = started().await;
        let cancel = CancellationToken::new();

        let client = Connection::new(LineDecoder::new());
        client.connect("127.0.0.1", port, &cancel).await.unwrap();

        cancel.cancel();
        let err = server.accept_pending(&cancel).await.unwrap_err();
        assert!(matches!(err, LinewireError::Cancelled));
        assert_eq!(server.session_count(), 0);
    }
}
