//! Connection and session lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use listforge_compiler::{
    CancelToken, CompileRequest, EventSink, Orchestrator,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::frames::{ClientFrame, ServerFrame};

/// Session manager tuning.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Concurrent compilations allowed per connection.
    pub max_sessions_per_connection: usize,
    /// Cadence of server pings.
    pub heartbeat_interval: Duration,
    /// A connection with no traffic for this long is closed.
    pub idle_timeout: Duration,
    /// Bound of each session's event queue; a full queue pauses event
    /// emission, not computation.
    pub event_queue_bound: usize,
    /// How long a cancelled session may keep running before it is
    /// force-closed.
    pub cancel_grace: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_connection: 3,
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            event_queue_bound: 1_000,
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Builds connections around an orchestrator.
pub struct SessionManager {
    orchestrator: Orchestrator,
    config: SessionManagerConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(orchestrator: Orchestrator, config: SessionManagerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Open a connection over `writer`. Sends the `welcome` frame and
    /// starts the heartbeat task.
    pub async fn open_connection(&self, writer: mpsc::Sender<ServerFrame>) -> Connection {
        let connection = Connection {
            inner: Arc::new(ConnectionInner {
                id: uuid::Uuid::new_v4().to_string(),
                writer,
                orchestrator: self.orchestrator.clone(),
                config: self.config.clone(),
                sessions: Mutex::new(HashMap::new()),
                last_activity: Mutex::new(Instant::now()),
                closed: CancelToken::new(),
            }),
        };

        connection
            .send(ServerFrame::Welcome {
                version: self.orchestrator.config().compiler_version.clone(),
                connection_id: connection.id().to_string(),
                capabilities: vec![
                    "compile".to_string(),
                    "cancel".to_string(),
                    "events".to_string(),
                ],
            })
            .await;

        tokio::spawn(heartbeat_loop(connection.inner.clone()));
        info!(connection = connection.id(), "connection opened");
        connection
    }
}

/// One client connection with its multiplexed sessions.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: String,
    writer: mpsc::Sender<ServerFrame>,
    orchestrator: Orchestrator,
    config: SessionManagerConfig,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    last_activity: Mutex<Instant>,
    closed: CancelToken,
}

struct SessionHandle {
    cancel: CancelToken,
    task: JoinHandle<()>,
}

impl Connection {
    /// The connection id announced in `welcome`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// True once the connection has been closed (explicitly or by the
    /// idle timeout).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        let mut sessions = self.inner.lock_sessions();
        sessions.retain(|_, handle| !handle.task.is_finished());
        sessions.len()
    }

    /// Process one frame from the client.
    pub async fn handle_frame(&self, frame: ClientFrame) {
        if self.is_closed() {
            return;
        }
        self.inner.touch();

        match frame {
            ClientFrame::Ping => {
                self.send(ServerFrame::Pong {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                })
                .await;
            }
            ClientFrame::Cancel { session_id } => {
                // Idempotent: cancelling an unknown or finished session is
                // a no-op.
                let cancel = {
                    let sessions = self.inner.lock_sessions();
                    sessions.get(&session_id).map(|h| h.cancel.clone())
                };
                if let Some(cancel) = cancel {
                    debug!(connection = self.id(), session = session_id.as_str(), "cancel requested");
                    let already_cancelled = cancel.is_cancelled();
                    cancel.cancel();
                    if !already_cancelled {
                        // Cancellation is observed at checkpoints; if the
                        // session outlives the grace window, force-close it.
                        tokio::spawn(force_close_after_grace(
                            self.inner.clone(),
                            session_id,
                            self.inner.config.cancel_grace,
                        ));
                    }
                }
            }
            ClientFrame::Compile {
                session_id,
                configuration,
                platform,
                pre_fetched_content,
                benchmark,
            } => {
                self.start_session(
                    session_id,
                    CompileRequest {
                        configuration,
                        platform,
                        pre_fetched_content,
                        benchmark,
                    },
                )
                .await;
            }
        }
    }

    /// Close the connection: cancel every session and stop the heartbeat.
    pub fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        info!(connection = self.id(), "connection closing");
        let sessions = self.inner.lock_sessions();
        for handle in sessions.values() {
            handle.cancel.cancel();
        }
        drop(sessions);
        self.inner.closed.cancel();
    }

    async fn start_session(&self, session_id: String, request: CompileRequest) {
        {
            let mut sessions = self.inner.lock_sessions();
            sessions.retain(|_, handle| !handle.task.is_finished());
            if sessions.len() >= self.inner.config.max_sessions_per_connection {
                drop(sessions);
                self.send(ServerFrame::Error {
                    message: format!(
                        "too many concurrent compilations (limit {})",
                        self.inner.config.max_sessions_per_connection
                    ),
                })
                .await;
                return;
            }
            if sessions.contains_key(&session_id) {
                drop(sessions);
                self.send(ServerFrame::Error {
                    message: format!("session '{session_id}' is already active"),
                })
                .await;
                return;
            }
        }

        self.send(ServerFrame::CompileStarted {
            session_id: session_id.clone(),
        })
        .await;

        let cancel = CancelToken::new();
        let inner = self.inner.clone();
        let task_session_id = session_id.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_session(inner, task_session_id, request, task_cancel).await;
        });

        // A session that finished before this insert leaves a dead handle
        // behind; the retain() above prunes those.
        self.inner
            .lock_sessions()
            .insert(session_id, SessionHandle { cancel, task });
    }

    async fn send(&self, frame: ServerFrame) {
        self.inner.send(frame).await;
    }
}

impl ConnectionInner {
    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    async fn send(&self, frame: ServerFrame) {
        // Outbound frames count as traffic for the idle timeout, except
        // the heartbeat itself, which must not keep a dead connection
        // alive.
        if !matches!(frame, ServerFrame::Ping { .. }) {
            self.touch();
        }
        // A failed send means the client is gone; the idle timeout will
        // reap the connection.
        if self.writer.send(frame).await.is_err() {
            debug!(connection = self.id.as_str(), "frame dropped, writer closed");
        }
    }
}

/// Abort a cancelled session that failed to wind down within the grace
/// window and emit its terminal frame.
async fn force_close_after_grace(
    inner: Arc<ConnectionInner>,
    session_id: String,
    grace: Duration,
) {
    tokio::time::sleep(grace).await;
    let handle = inner.lock_sessions().remove(&session_id);
    if let Some(handle) = handle {
        if handle.task.is_finished() {
            return;
        }
        warn!(
            session = session_id.as_str(),
            "cancelled session exceeded grace window, aborting"
        );
        handle.task.abort();
        inner
            .send(ServerFrame::CompileCancelled { session_id })
            .await;
    }
}

async fn run_session(
    inner: Arc<ConnectionInner>,
    session_id: String,
    request: CompileRequest,
    cancel: CancelToken,
) {
    let (events, mut event_rx) = EventSink::channel(inner.config.event_queue_bound);

    // Bridge orchestrator events onto the connection writer. Events for a
    // session stay in emission order; frames of different sessions
    // interleave arbitrarily.
    let bridge_inner = inner.clone();
    let bridge_session = session_id.clone();
    let bridge = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            bridge_inner
                .send(ServerFrame::Event {
                    session_id: bridge_session.clone(),
                    event_type: event.tag().to_string(),
                    data: event.payload(),
                })
                .await;
        }
    });

    let outcome = inner
        .orchestrator
        .compile(request, events, cancel)
        .await;

    // The sink is dropped once compile returns, so the bridge drains and
    // exits before the terminal frame goes out.
    if bridge.await.is_err() {
        warn!(session = session_id.as_str(), "event bridge panicked");
    }

    let frame = match outcome {
        Ok(result) => ServerFrame::CompileComplete {
            session_id: session_id.clone(),
            result: Box::new(result),
        },
        Err(err) if err.is_cancelled() => ServerFrame::CompileCancelled {
            session_id: session_id.clone(),
        },
        Err(err) => ServerFrame::CompileError {
            session_id: session_id.clone(),
            message: err.to_string(),
        },
    };
    inner.send(frame).await;

    inner.lock_sessions().remove(&session_id);
    debug!(session = session_id.as_str(), "session finished");
}

async fn heartbeat_loop(inner: Arc<ConnectionInner>) {
    let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so the welcome frame is
    // not chased by an instant ping.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = inner.closed.cancelled() => break,
        }
        if inner.closed.is_cancelled() {
            break;
        }

        if inner.idle_for() >= inner.config.idle_timeout {
            info!(connection = inner.id.as_str(), "idle timeout, closing connection");
            inner
                .send(ServerFrame::Error {
                    message: "idle timeout".to_string(),
                })
                .await;
            let sessions = inner.lock_sessions();
            for handle in sessions.values() {
                handle.cancel.cancel();
            }
            drop(sessions);
            inner.closed.cancel();
            break;
        }

        inner
            .send(ServerFrame::Ping {
                timestamp: chrono::Utc::now().timestamp_millis(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listforge_config::Configuration;
    use listforge_storage::MemoryStorage;
    use listforge_compiler::OrchestratorConfig;
    use std::collections::HashMap as StdHashMap;

    fn manager(config: SessionManagerConfig) -> SessionManager {
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryStorage::new()),
            OrchestratorConfig::default(),
        );
        SessionManager::new(orchestrator, config)
    }

    fn compile_frame(session_id: &str, source_key: &str) -> ClientFrame {
        let configuration: Configuration = serde_json::from_value(serde_json::json!({
            "name": "session-test",
            "sources": [{"source": source_key}],
            "transformations": ["RemoveComments", "TrimLines"]
        }))
        .unwrap();
        let mut pre_fetched = StdHashMap::new();
        pre_fetched.insert(source_key.to_string(), "! c\n||a.example^\n".to_string());
        ClientFrame::Compile {
            session_id: session_id.to_string(),
            configuration,
            platform: None,
            pre_fetched_content: pre_fetched,
            benchmark: false,
        }
    }

    async fn drain_until<F>(rx: &mut mpsc::Receiver<ServerFrame>, mut pred: F) -> Vec<ServerFrame>
    where
        F: FnMut(&ServerFrame) -> bool,
    {
        let mut seen = Vec::new();
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("writer closed");
            let done = pred(&frame);
            seen.push(frame);
            if done {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn welcome_then_compile_to_completion() {
        let manager = manager(SessionManagerConfig::default());
        let (tx, mut rx) = mpsc::channel(256);
        let connection = manager.open_connection(tx).await;

        let welcome = rx.recv().await.unwrap();
        assert!(matches!(welcome, ServerFrame::Welcome { .. }));

        connection.handle_frame(compile_frame("s1", "mem://a")).await;
        let frames =
            drain_until(&mut rx, |f| matches!(f, ServerFrame::CompileComplete { .. })).await;

        assert!(matches!(frames.first(), Some(ServerFrame::CompileStarted { session_id }) if session_id == "s1"));
        assert!(frames
            .iter()
            .any(|f| matches!(f, ServerFrame::Event { event_type, .. } if event_type == "source:done")));
        match frames.last() {
            Some(ServerFrame::CompileComplete { session_id, result }) => {
                assert_eq!(session_id, "s1");
                assert!(result.success);
            }
            other => panic!("expected compile:complete, got {other:?}"),
        }
        assert_eq!(connection.session_count(), 0);
    }

    #[tokio::test]
    async fn ping_pong() {
        let manager = manager(SessionManagerConfig::default());
        let (tx, mut rx) = mpsc::channel(16);
        let connection = manager.open_connection(tx).await;
        let _welcome = rx.recv().await.unwrap();

        connection.handle_frame(ClientFrame::Ping).await;
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, ServerFrame::Pong { .. }));
    }

    #[tokio::test]
    async fn session_cap_is_enforced() {
        let manager = manager(SessionManagerConfig {
            max_sessions_per_connection: 1,
            ..SessionManagerConfig::default()
        });
        let (tx, mut rx) = mpsc::channel(256);
        let connection = manager.open_connection(tx).await;
        let _welcome = rx.recv().await.unwrap();

        // A source that never resolves keeps the first session busy.
        let configuration: Configuration = serde_json::from_value(serde_json::json!({
            "name": "slow",
            "sources": [{"source": "/definitely/not/here.txt"}]
        }))
        .unwrap();
        connection
            .handle_frame(ClientFrame::Compile {
                session_id: "busy".to_string(),
                configuration,
                platform: None,
                pre_fetched_content: StdHashMap::new(),
                benchmark: false,
            })
            .await;
        connection.handle_frame(compile_frame("second", "mem://b")).await;

        let frames = drain_until(&mut rx, |f| matches!(f, ServerFrame::Error { .. })).await;
        match frames.last() {
            Some(ServerFrame::Error { message }) => {
                assert!(message.contains("too many concurrent"), "{message}");
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_safe_on_unknown_sessions() {
        let manager = manager(SessionManagerConfig::default());
        let (tx, mut rx) = mpsc::channel(64);
        let connection = manager.open_connection(tx).await;
        let _welcome = rx.recv().await.unwrap();

        connection
            .handle_frame(ClientFrame::Cancel {
                session_id: "ghost".to_string(),
            })
            .await;
        connection
            .handle_frame(ClientFrame::Cancel {
                session_id: "ghost".to_string(),
            })
            .await;

        // Still alive and serving.
        connection.handle_frame(ClientFrame::Ping).await;
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, ServerFrame::Pong { .. }));
    }

    #[tokio::test]
    async fn close_cancels_sessions() {
        let manager = manager(SessionManagerConfig::default());
        let (tx, mut rx) = mpsc::channel(256);
        let connection = manager.open_connection(tx).await;
        let _welcome = rx.recv().await.unwrap();

        connection.handle_frame(compile_frame("s1", "mem://a")).await;
        connection.close();
        assert!(connection.is_closed());

        // Frames after close are ignored.
        connection.handle_frame(ClientFrame::Ping).await;
        // Drain whatever the session sent; no pong may follow the close.
        while let Ok(Some(frame)) =
            tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
        {
            assert!(!matches!(frame, ServerFrame::Pong { .. }));
        }
    }
}
