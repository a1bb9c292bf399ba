//! Session registry and SSE transport for the MCP HTTP+SSE binding
//!
//! - GET /sse → opens a session; the first event (`endpoint`) carries the
//!   relay URL `/messages?sessionId=<id>`
//! - POST /messages?sessionId=<id> → relayed into the bound session; replies
//!   are written to that session's stream as `message` events
//!
//! Each session moves `Open → Closing → Closed` exactly once. The map entry
//! is removed before the transport is closed, so routing never reaches a
//! closing session. Once [`SessionRegistry::close_all`] has run the registry
//! refuses new sessions.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use futures::Stream;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StreamingConfig;
use crate::protocol::MessageHandler;
use crate::{Error, Result};

/// Response header carrying the id of a freshly opened session
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Transport bound to one session
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Deliver a relayed message
    async fn handle_message(&self, message: Value) -> Result<()>;

    /// Close the transport; the peer's stream ends
    async fn close(&self) -> Result<()>;
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Accepting relayed messages
    Open,
    /// Removed from the registry, transport close in progress
    Closing,
    /// Transport closed
    Closed,
}

/// Event queued for a session's SSE stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEvent {
    /// SSE event name
    pub event: String,
    /// SSE data line
    pub data: String,
}

impl OutboundEvent {
    fn into_sse(self) -> Event {
        Event::default().event(self.event).data(self.data)
    }
}

/// Sending half of a streaming connection, handed to [`SessionRegistry::create_session`]
#[derive(Debug)]
pub struct SseConnection {
    tx: mpsc::Sender<OutboundEvent>,
    cancel: CancellationToken,
}

/// Receiving half of a streaming connection, drained into the HTTP response
#[derive(Debug)]
pub struct SseStream {
    rx: mpsc::Receiver<OutboundEvent>,
    cancel: CancellationToken,
}

impl SseConnection {
    /// Create a connected pair with room for `buffer` queued events
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, SseStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        (
            Self {
                tx,
                cancel: cancel.clone(),
            },
            SseStream { rx, cancel },
        )
    }
}

impl SseStream {
    /// Next queued event, or `None` once the transport closed and the queue is drained
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        // Queued events win over cancellation, so replies sent before close still arrive
        tokio::select! {
            biased;
            event = self.rx.recv() => event,
            () = self.cancel.cancelled() => None,
        }
    }
}

/// SSE-backed session transport
pub struct SseTransport {
    session_id: String,
    tx: mpsc::Sender<OutboundEvent>,
    cancel: CancellationToken,
    handler: Arc<dyn MessageHandler>,
}

impl SseTransport {
    /// Bind a transport to `connection` and announce the relay endpoint
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the peer already went away.
    pub fn new(
        session_id: &str,
        endpoint: String,
        connection: SseConnection,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self> {
        connection
            .tx
            .try_send(OutboundEvent {
                event: "endpoint".to_string(),
                data: endpoint,
            })
            .map_err(|e| Error::Transport(format!("failed to announce endpoint: {e}")))?;

        Ok(Self {
            session_id: session_id.to_string(),
            tx: connection.tx,
            cancel: connection.cancel,
            handler,
        })
    }
}

#[async_trait]
impl SessionTransport for SseTransport {
    async fn handle_message(&self, message: Value) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::RelayFailure("stream closed".to_string()));
        }

        let Some(reply) = self.handler.handle(&self.session_id, message).await else {
            return Ok(());
        };

        // A peer that stops reading must not stall relays into its session
        let data = serde_json::to_string(&reply)?;
        self.tx
            .try_send(OutboundEvent {
                event: "message".to_string(),
                data,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    Error::RelayFailure("stream buffer full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    Error::RelayFailure("stream closed".to_string())
                }
            })
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

/// A live session
struct Session {
    id: String,
    client_id: Option<String>,
    created_at: DateTime<Utc>,
    transport: Arc<dyn SessionTransport>,
    state: Mutex<SessionState>,
    /// Serializes relays so replies are written in acquisition order
    writer: tokio::sync::Mutex<()>,
}

impl Session {
    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            client_id: self.client_id.clone(),
            created_at: self.created_at,
            state: self.state(),
        }
    }

    async fn close(&self) -> Result<()> {
        self.set_state(SessionState::Closing);
        let result = self.transport.close().await;
        self.set_state(SessionState::Closed);
        result
    }
}

/// Snapshot of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session id
    pub id: String,
    /// Client the session was opened by
    pub client_id: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Current state
    pub state: SessionState,
}

/// Outcome of [`SessionRegistry::close_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CloseSummary {
    /// Sessions whose transport closed cleanly
    pub closed: usize,
    /// Sessions whose transport close failed (still removed)
    pub failed: usize,
}

struct Inner {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Set by `close_all` while it holds the `sessions` write lock
    shutting_down: AtomicBool,
    relay_path: String,
    buffer_size: usize,
    handler: Arc<dyn MessageHandler>,
}

/// Registry of live sessions, keyed by session id
///
/// Cheap to clone; clones share the same map.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new(config: &StreamingConfig, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                relay_path: config.relay_path.clone(),
                buffer_size: config.buffer_size,
                handler,
            }),
        }
    }

    /// Outbound event buffer size for new connections
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Relay URL announced to a session
    #[must_use]
    pub fn endpoint_for(&self, session_id: &str) -> String {
        format!("{}?sessionId={session_id}", self.inner.relay_path)
    }

    /// Open a session bound to `connection`
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once [`Self::close_all`] has run, or
    /// [`Error::Transport`] if the connection is already gone.
    pub fn create_session(
        &self,
        connection: SseConnection,
        client_id: Option<String>,
    ) -> Result<String> {
        let handler = Arc::clone(&self.inner.handler);
        self.create_session_with(client_id, |id| {
            let transport = SseTransport::new(id, self.endpoint_for(id), connection, handler)?;
            Ok(Arc::new(transport) as Arc<dyn SessionTransport>)
        })
    }

    /// Open a session around a transport built for the allocated id
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once [`Self::close_all`] has run.
    /// Propagates the error from `make_transport`; nothing is registered.
    pub fn create_session_with<F>(&self, client_id: Option<String>, make_transport: F) -> Result<String>
    where
        F: FnOnce(&str) -> Result<Arc<dyn SessionTransport>>,
    {
        let mut sessions = self.inner.sessions.write();
        if self.inner.shutting_down.load(Ordering::Relaxed) {
            debug!(client_id = ?client_id, "Refusing session during shutdown");
            return Err(Error::ShuttingDown);
        }
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let transport = make_transport(&id)?;
        sessions.insert(
            id.clone(),
            Arc::new(Session {
                id: id.clone(),
                client_id: client_id.clone(),
                created_at: Utc::now(),
                transport,
                state: Mutex::new(SessionState::Open),
                writer: tokio::sync::Mutex::new(()),
            }),
        );
        drop(sessions);

        info!(session_id = %id, client_id = ?client_id, "Session opened");
        Ok(id)
    }

    fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.inner.sessions.read().get(session_id).cloned()
    }

    /// Relay `message` into a session
    ///
    /// # Errors
    ///
    /// - [`Error::MissingSessionId`] if no id was supplied
    /// - [`Error::SessionNotFound`] if no live session has that id
    /// - [`Error::RelayFailure`] if the transport rejected the message
    pub async fn route_message(&self, session_id: Option<&str>, message: Value) -> Result<()> {
        let id = session_id
            .filter(|s| !s.is_empty())
            .ok_or(Error::MissingSessionId)?;
        let session = self
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        let _writer = session.writer.lock().await;
        if session.state() != SessionState::Open {
            return Err(Error::SessionNotFound(id.to_string()));
        }

        session
            .transport
            .handle_message(message)
            .await
            .map_err(|e| match e {
                Error::RelayFailure(_) => e,
                other => Error::RelayFailure(other.to_string()),
            })
    }

    /// Remove a session without closing its transport; returns whether it was present
    pub fn remove_session(&self, session_id: &str) -> bool {
        match self.inner.sessions.write().remove(session_id) {
            Some(session) => {
                session.set_state(SessionState::Closed);
                debug!(session_id = %session_id, "Session removed");
                true
            }
            None => false,
        }
    }

    /// Close one session; returns `false` if it was already gone
    ///
    /// # Errors
    ///
    /// Returns the transport's close error. The session is removed either way.
    pub async fn close_session(&self, session_id: &str) -> Result<bool> {
        let Some(session) = self.inner.sessions.write().remove(session_id) else {
            return Ok(false);
        };
        session.close().await?;
        info!(session_id = %session_id, "Session closed");
        Ok(true)
    }

    /// Stop accepting sessions, then close every live one concurrently.
    /// Failures are logged, never propagated.
    pub async fn close_all(&self) -> CloseSummary {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.inner.sessions.write();
            self.inner.shutting_down.store(true, Ordering::Relaxed);
            sessions.drain().map(|(_, s)| s).collect()
        };
        if drained.is_empty() {
            return CloseSummary::default();
        }

        info!(count = drained.len(), "Closing all sessions");
        let results = join_all(drained.iter().map(|s| s.close())).await;

        let mut summary = CloseSummary::default();
        for (session, result) in drained.iter().zip(results) {
            match result {
                Ok(()) => summary.closed += 1,
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Failed to close session");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Whether [`Self::close_all`] has started
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Relaxed)
    }

    /// Number of live sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// Whether a live session has this id
    #[must_use]
    pub fn has_session(&self, session_id: &str) -> bool {
        self.inner.sessions.read().contains_key(session_id)
    }

    /// Snapshot of a live session
    #[must_use]
    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.get(session_id).map(|s| s.info())
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }
}

/// Removes the session when the peer's stream is dropped
struct SessionGuard {
    registry: Weak<Inner>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            let registry = SessionRegistry { inner };
            if registry.remove_session(&self.session_id) {
                info!(session_id = %self.session_id, "Stream closed by peer");
            }
        }
    }
}

/// Open a session for a streaming request and build its SSE response
///
/// The stream holds only a weak handle to the registry, so it outlives the
/// borrow of `registry`.
///
/// # Errors
///
/// Returns [`Error::ShuttingDown`] during shutdown, or [`Error::Transport`]
/// if the session could not be bound.
pub fn create_sse_response(
    registry: &SessionRegistry,
    client_id: Option<String>,
    keep_alive_interval: Duration,
) -> Result<(
    String,
    Sse<impl Stream<Item = std::result::Result<Event, Infallible>> + use<>>,
)> {
    let (connection, mut events) = SseConnection::channel(registry.buffer_size());
    let session_id = registry.create_session(connection, client_id)?;
    let guard = SessionGuard {
        registry: registry.downgrade(),
        session_id: session_id.clone(),
    };

    let stream = stream! {
        let _guard = guard;
        while let Some(event) = events.recv().await {
            yield Ok(event.into_sse());
        }
    };

    Ok((
        session_id,
        Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive_interval).text("ping")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BridgeHandler;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(&StreamingConfig::default(), Arc::new(BridgeHandler::new()))
    }

    #[derive(Default)]
    struct RecordingTransport {
        messages: Mutex<Vec<Value>>,
        closes: AtomicUsize,
        fail_close: bool,
        fail_relay: bool,
    }

    #[async_trait]
    impl SessionTransport for RecordingTransport {
        async fn handle_message(&self, message: Value) -> Result<()> {
            if self.fail_relay {
                return Err(Error::Transport("peer gone".into()));
            }
            self.messages.lock().push(message);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(Error::Transport("close failed".into()));
            }
            Ok(())
        }
    }

    fn open(registry: &SessionRegistry, transport: &Arc<RecordingTransport>) -> String {
        let t = Arc::clone(transport);
        registry
            .create_session_with(None, move |_| Ok(t as Arc<dyn SessionTransport>))
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_session_is_routable_immediately() {
        let registry = registry();
        let transport = Arc::new(RecordingTransport::default());
        let id = open(&registry, &transport);

        assert!(Uuid::parse_str(&id).is_ok());
        registry
            .route_message(Some(&id), json!({"jsonrpc": "2.0", "method": "x"}))
            .await
            .unwrap();
        assert_eq!(transport.messages.lock().len(), 1);
    }

    #[tokio::test]
    async fn missing_and_unknown_ids() {
        let registry = registry();
        assert!(matches!(
            registry.route_message(None, json!({})).await,
            Err(Error::MissingSessionId)
        ));
        assert!(matches!(
            registry.route_message(Some(""), json!({})).await,
            Err(Error::MissingSessionId)
        ));
        assert!(matches!(
            registry.route_message(Some("nope"), json!({})).await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn transport_error_becomes_relay_failure() {
        let registry = registry();
        let transport = Arc::new(RecordingTransport {
            fail_relay: true,
            ..Default::default()
        });
        let id = open(&registry, &transport);

        let err = registry.route_message(Some(&id), json!({})).await.unwrap_err();
        assert!(matches!(err, Error::RelayFailure(_)));
        assert!(registry.has_session(&id));
    }

    #[tokio::test]
    async fn closed_session_is_not_found_and_double_close_is_noop() {
        let registry = registry();
        let transport = Arc::new(RecordingTransport::default());
        let id = open(&registry, &transport);

        assert!(registry.close_session(&id).await.unwrap());
        assert!(!registry.close_session(&id).await.unwrap());
        assert!(!registry.remove_session(&id));
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(
            registry.route_message(Some(&id), json!({})).await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn close_all_isolates_failures() {
        let registry = registry();
        let good = Arc::new(RecordingTransport::default());
        let bad = Arc::new(RecordingTransport {
            fail_close: true,
            ..Default::default()
        });
        open(&registry, &good);
        open(&registry, &bad);
        open(&registry, &good);

        let summary = registry.close_all().await;
        assert_eq!(summary, CloseSummary { closed: 2, failed: 1 });
        assert_eq!(registry.session_count(), 0);
        assert_eq!(good.closes.load(Ordering::SeqCst), 2);
        assert_eq!(bad.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_sessions_open_after_close_all() {
        let registry = registry();
        let transport = Arc::new(RecordingTransport::default());
        open(&registry, &transport);

        assert!(!registry.is_shutting_down());
        assert_eq!(registry.close_all().await.closed, 1);
        assert!(registry.is_shutting_down());

        let t = Arc::clone(&transport);
        let err = registry
            .create_session_with(None, move |_| Ok(t as Arc<dyn SessionTransport>))
            .unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));

        let (connection, _events) = SseConnection::channel(4);
        assert!(matches!(
            registry.create_session(connection, None),
            Err(Error::ShuttingDown)
        ));
        assert!(create_sse_response(&registry, None, Duration::from_secs(15)).is_err());
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn stalled_reader_fails_relay_instead_of_blocking() {
        let registry = registry();
        // Room for the endpoint event only
        let (connection, mut events) = SseConnection::channel(1);
        let id = registry.create_session(connection, None).unwrap();
        let ping = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});

        let err = tokio::time::timeout(
            Duration::from_secs(1),
            registry.route_message(Some(&id), ping.clone()),
        )
        .await
        .expect("relay must not block on a full stream")
        .unwrap_err();
        assert!(matches!(err, Error::RelayFailure(ref m) if m.contains("full")));

        // Once the reader catches up the session accepts relays again
        assert_eq!(events.recv().await.unwrap().event, "endpoint");
        registry.route_message(Some(&id), ping).await.unwrap();
        assert_eq!(events.recv().await.unwrap().event, "message");
    }

    #[tokio::test]
    async fn sse_transport_announces_endpoint_then_replies() {
        let registry = registry();
        let (connection, mut events) = SseConnection::channel(8);
        let id = registry
            .create_session(connection, Some("c1".to_string()))
            .unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.event, "endpoint");
        assert_eq!(first.data, format!("/messages?sessionId={id}"));

        registry
            .route_message(Some(&id), json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}))
            .await
            .unwrap();
        let reply = events.recv().await.unwrap();
        assert_eq!(reply.event, "message");
        let body: Value = serde_json::from_str(&reply.data).unwrap();
        assert_eq!(body["id"], 7);

        let info = registry.session_info(&id).unwrap();
        assert_eq!(info.client_id.as_deref(), Some("c1"));
        assert_eq!(info.state, SessionState::Open);

        registry.close_session(&id).await.unwrap();
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_stream_removes_session() {
        let registry = registry();
        let (id, sse) =
            create_sse_response(&registry, None, Duration::from_secs(15)).unwrap();
        assert!(registry.has_session(&id));

        // Nothing polled the stream; dropping it drops the guard with it
        drop(sse);
        assert!(!registry.has_session(&id));
    }

    #[tokio::test]
    async fn concurrent_opens_get_distinct_ids() {
        let registry = registry();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let (connection, _events) = SseConnection::channel(4);
                    registry.create_session(connection, None).unwrap()
                })
            })
            .collect();

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 16);
        assert_eq!(registry.session_count(), 16);
    }
}
