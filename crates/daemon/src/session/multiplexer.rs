//! Session multiplexer.
//!
//! A [`Session`] owns one multiplexed connection: it keeps the peer alive with
//! pings, answers control messages itself and routes every other message to
//! the handler registered for its protocol type. Handlers are created lazily,
//! at most one per protocol type, and closed when the session ends.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use protocol::control::{
    MESSAGE_TYPE_CLOSE, MESSAGE_TYPE_ERROR, MESSAGE_TYPE_OPEN, MESSAGE_TYPE_PING,
    MESSAGE_TYPE_PONG,
};
use protocol::{ErrorBody, ProtoHdr, ProtoMsg, ProtoType};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::fault::SessionFault;
use super::handler::{ProtoRoutes, ResponseWriter, SessionHandler, WriteError};

/// Identifier assigned to a session by the transport layer.
pub type SessionId = String;

/// Grace window in which a pong (or any traffic) must follow a ping.
pub const PONG_WAIT: Duration = Duration::from_secs(5);

/// Default idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default inbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Runtime configuration of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time without traffic after which the session is closed.
    pub idle_timeout: Duration,
    /// Capacity of the inbound message queue.
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, event loop not started.
    Ready,
    /// Event loop running.
    Running,
    /// Closed by the peer (close message, or error with close flag).
    ClosedNormal,
    /// Closed after a full idle timeout without traffic.
    ClosedTimeout,
    /// Closed by a write failure or a handler panic.
    ClosedError,
    /// Closed because the inbound queue was closed upstream.
    ClosedUpstream,
}

impl SessionState {
    /// Returns whether the session has terminated.
    pub fn is_closed(&self) -> bool {
        !matches!(self, SessionState::Ready | SessionState::Running)
    }

    fn from_outcome(outcome: &Result<CloseReason, SessionFault>) -> Self {
        match outcome {
            Ok(CloseReason::Closed) | Ok(CloseReason::PeerError) => SessionState::ClosedNormal,
            Ok(CloseReason::UpstreamClosed) => SessionState::ClosedUpstream,
            Err(SessionFault::IdleTimeout) => SessionState::ClosedTimeout,
            Err(_) => SessionState::ClosedError,
        }
    }
}

/// Orderly reasons for a session to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a `close` control message.
    Closed,
    /// The peer reported an error and asked to close.
    PeerError,
    /// The inbound queue was closed by the transport.
    UpstreamClosed,
}

/// One-shot completion signal of a session.
#[derive(Debug, Clone)]
pub struct DoneSignal {
    token: CancellationToken,
}

impl DoneSignal {
    /// Wait until the session has finished.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Returns whether the session has finished.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Fires the completion signal when dropped, whatever the exit path.
struct DoneGuard(CancellationToken);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Handlers instantiated by one session, in creation order.
///
/// Each handler is closed exactly once, either explicitly through
/// [`HandlerRegistry::close_all`] or when the registry is dropped.
struct HandlerRegistry {
    session_id: SessionId,
    handlers: Vec<(ProtoType, Box<dyn SessionHandler>)>,
}

impl HandlerRegistry {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            handlers: Vec::new(),
        }
    }

    /// Returns the handler for `proto`, creating it from `routes` on first use.
    ///
    /// Returns `None` when no route is registered for the protocol.
    fn get_or_create(
        &mut self,
        proto: ProtoType,
        routes: &ProtoRoutes,
    ) -> Option<&mut dyn SessionHandler> {
        let index = match self.handlers.iter().position(|(p, _)| *p == proto) {
            Some(index) => index,
            None => {
                let constructor = routes.get(proto)?;
                self.handlers.push((proto, constructor()));
                debug!(
                    session_id = %self.session_id,
                    proto = %proto,
                    "Created protocol handler"
                );
                self.handlers.len() - 1
            }
        };
        Some(self.handlers[index].1.as_mut())
    }

    fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Closes every handler, in creation order.
    ///
    /// A panicking `close` does not stop the remaining handlers from being
    /// closed. The payload of the first such panic is returned.
    fn close_all(&mut self) -> Option<Box<dyn Any + Send>> {
        let mut first_panic = None;
        for (proto, mut handler) in self.handlers.drain(..) {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.close())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    session_id = %self.session_id,
                    proto = %proto,
                    error = %e,
                    "Failed to close protocol handler"
                ),
                Err(payload) => {
                    warn!(
                        session_id = %self.session_id,
                        proto = %proto,
                        "Protocol handler panicked while closing"
                    );
                    first_panic.get_or_insert(payload);
                }
            }
        }
        first_panic
    }
}

impl Drop for HandlerRegistry {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}

/// A multiplexed session over a single connection.
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    routes: ProtoRoutes,
    writer: Arc<dyn ResponseWriter>,
    /// Weak so that dropping every external sender closes the queue.
    msg_tx: mpsc::WeakSender<ProtoMsg>,
    msg_rx: Option<mpsc::Receiver<ProtoMsg>>,
    done: CancellationToken,
    state: SessionState,
}

impl Session {
    /// Creates a session in the ready state.
    ///
    /// Returns the session and the sender the transport uses to feed inbound
    /// messages. Dropping every sender terminates the session cleanly.
    pub fn new(
        id: impl Into<SessionId>,
        writer: Arc<dyn ResponseWriter>,
        routes: ProtoRoutes,
        config: SessionConfig,
    ) -> (Self, mpsc::Sender<ProtoMsg>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let session = Session {
            id: id.into(),
            config,
            routes,
            writer,
            msg_tx: tx.downgrade(),
            msg_rx: Some(rx),
            done: CancellationToken::new(),
            state: SessionState::Ready,
        };
        (session, tx)
    }

    /// Returns the session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the completion signal.
    pub fn done(&self) -> DoneSignal {
        DoneSignal {
            token: self.done.clone(),
        }
    }

    /// Returns another inbound sender, or `None` once the queue has closed.
    pub fn msg_chan(&self) -> Option<mpsc::Sender<ProtoMsg>> {
        self.msg_tx.upgrade()
    }

    /// Runs the event loop until the session terminates.
    ///
    /// Handler panics, including those raised by a handler's `close`, are
    /// contained here: they are logged, reported to the peer as
    /// `internal error` and returned as [`SessionFault::Panic`].
    /// Registered handlers are closed and the completion signal fires on every
    /// exit path.
    ///
    /// # Panics
    ///
    /// Panics with "session already finished" if called more than once.
    pub async fn listen_and_serve(&mut self) -> Result<CloseReason, SessionFault> {
        let mut inbound = match (self.state, self.msg_rx.take()) {
            (SessionState::Ready, Some(rx)) => rx,
            _ => panic!("session already finished"),
        };
        self.state = SessionState::Running;
        let _done = DoneGuard(self.done.clone());
        info!(session_id = %self.id, "Session started");

        let mut handlers = HandlerRegistry::new(self.id.clone());
        let outcome = AssertUnwindSafe(self.serve(&mut inbound, &mut handlers))
            .catch_unwind()
            .await;

        debug!(
            session_id = %self.id,
            handlers = handlers.len(),
            "Closing protocol handlers"
        );
        let close_panic = handlers.close_all();
        drop(inbound);

        // A panic during teardown is a fault like one raised while serving.
        let outcome = match (outcome, close_panic) {
            (Ok(_), Some(payload)) => Err(payload),
            (outcome, _) => outcome,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let fault = SessionFault::from_panic(payload);
                if let SessionFault::Panic { message, trace } = &fault {
                    error!(session_id = %self.id, trace = %trace, "[panic] {}", message);
                }
                self.send_error(None, true, "internal error").await;
                Err(fault)
            }
        };

        self.state = SessionState::from_outcome(&result);
        match &result {
            Ok(reason) => info!(session_id = %self.id, reason = ?reason, "Session closed"),
            Err(fault) => warn!(session_id = %self.id, error = %fault, "Session terminated"),
        }
        result
    }

    /// The event loop proper.
    async fn serve(
        &self,
        inbound: &mut mpsc::Receiver<ProtoMsg>,
        handlers: &mut HandlerRegistry,
    ) -> Result<CloseReason, SessionFault> {
        let idle_timeout = self.config.idle_timeout;
        let keepalive = time::sleep(idle_timeout.saturating_sub(PONG_WAIT));
        tokio::pin!(keepalive);
        let mut idle = false;

        loop {
            let msg = tokio::select! {
                biased;

                msg = inbound.recv() => match msg {
                    Some(msg) => msg,
                    None => {
                        debug!(session_id = %self.id, "Inbound queue closed");
                        return Ok(CloseReason::UpstreamClosed);
                    }
                },
                () = &mut keepalive => {
                    if idle {
                        warn!(session_id = %self.id, "No traffic within idle timeout");
                        self.send_error(None, true, "session timeout").await;
                        return Err(SessionFault::IdleTimeout);
                    }
                    if let Err(e) = self.ping().await {
                        error!(session_id = %self.id, error = %e, "Failed to ping peer");
                        return Err(SessionFault::PingFailed(e));
                    }
                    idle = true;
                    keepalive.as_mut().reset(Instant::now() + PONG_WAIT);
                    continue;
                }
            };

            keepalive.as_mut().reset(Instant::now() + idle_timeout);
            idle = false;

            if msg.hdr.proto.is_control() {
                if let Some(reason) = self.handle_control(msg).await? {
                    return Ok(reason);
                }
                continue;
            }

            self.dispatch(msg, handlers).await;
        }
    }

    /// Handles a control message. Returns a close reason if the session should end.
    async fn handle_control(&self, msg: ProtoMsg) -> Result<Option<CloseReason>, SessionFault> {
        match msg.hdr.typ.as_str() {
            MESSAGE_TYPE_PING => {
                let pong = ProtoMsg::control(MESSAGE_TYPE_PONG, msg.hdr.sid.clone());
                self.writer.write_proto_msg(pong).await.map_err(|e| {
                    error!(session_id = %self.id, error = %e, "Failed to answer ping");
                    SessionFault::PongFailed(e)
                })?;
                Ok(None)
            }
            MESSAGE_TYPE_PONG | MESSAGE_TYPE_OPEN => Ok(None),
            MESSAGE_TYPE_CLOSE => {
                info!(session_id = %msg.hdr.sid, "session: closed");
                Ok(Some(CloseReason::Closed))
            }
            MESSAGE_TYPE_ERROR => {
                let body = ErrorBody::from_message(&msg).unwrap_or_else(|e| {
                    warn!(session_id = %self.id, error = %e, "Malformed error message from peer");
                    ErrorBody::default()
                });
                error!(
                    session_id = %self.id,
                    close = body.close,
                    "session: received error from client: {}",
                    body.error
                );
                Ok(body.close.then_some(CloseReason::PeerError))
            }
            other => {
                self.send_error(
                    Some(&msg.hdr),
                    false,
                    &format!("session: control type message not understood: '{}'", other),
                )
                .await;
                Ok(None)
            }
        }
    }

    /// Routes an application message to its protocol handler.
    async fn dispatch(&self, msg: ProtoMsg, handlers: &mut HandlerRegistry) {
        let proto = msg.hdr.proto;
        match handlers.get_or_create(proto, &self.routes) {
            Some(handler) => handler.serve_proto_msg(msg, self.writer.as_ref()).await,
            None => {
                warn!(
                    session_id = %self.id,
                    proto = %proto,
                    msg_type = %msg.hdr.typ,
                    "No handler registered for protocol"
                );
                self.send_error(
                    Some(&msg.hdr),
                    false,
                    &format!("no handler registered for protocol: {}", proto),
                )
                .await;
            }
        }
    }

    async fn ping(&self) -> Result<(), WriteError> {
        debug!(session_id = %self.id, "Sending ping");
        self.writer
            .write_proto_msg(ProtoMsg::control(MESSAGE_TYPE_PING, self.id.clone()))
            .await
    }

    /// Sends an error frame to the peer. Failures are logged, not returned.
    async fn send_error(&self, cause: Option<&ProtoHdr>, close: bool, text: &str) {
        let msg = match ErrorBody::new(text, cause, close).into_message(self.id.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                error!(session_id = %self.id, error = %e, "Failed to encode error message");
                return;
            }
        };
        if let Err(e) = self.writer.write_proto_msg(msg).await {
            error!(
                session_id = %self.id,
                error = %e,
                "failed to write response to client"
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("routes", &self.routes)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::session::handler::ChannelResponseWriter;

    /// Handler that records its lifecycle into a shared log.
    struct LoggingHandler {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_close: bool,
    }

    #[async_trait]
    impl SessionHandler for LoggingHandler {
        async fn serve_proto_msg(&mut self, msg: ProtoMsg, _w: &dyn ResponseWriter) {
            self.log
                .lock()
                .unwrap()
                .push(format!("serve:{}:{}", self.name, msg.hdr.typ));
        }

        fn close(&mut self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("close:{}", self.name));
            if self.fail_close {
                anyhow::bail!("close failed");
            }
            Ok(())
        }
    }

    fn logging_routes(log: &Arc<Mutex<Vec<String>>>) -> ProtoRoutes {
        let shell_log = Arc::clone(log);
        let ft_log = Arc::clone(log);
        ProtoRoutes::new()
            .route(ProtoType::SHELL, move || LoggingHandler {
                name: "shell",
                log: Arc::clone(&shell_log),
                fail_close: true,
            })
            .route(ProtoType::FILE_TRANSFER, move || LoggingHandler {
                name: "ft",
                log: Arc::clone(&ft_log),
                fail_close: false,
            })
    }

    #[test]
    fn test_registry_creates_once_and_closes_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let routes = logging_routes(&log);
        let mut registry = HandlerRegistry::new("s".to_string());

        assert!(registry.get_or_create(ProtoType::FILE_TRANSFER, &routes).is_some());
        assert!(registry.get_or_create(ProtoType::SHELL, &routes).is_some());
        assert!(registry.get_or_create(ProtoType::FILE_TRANSFER, &routes).is_some());
        assert!(registry.get_or_create(ProtoType(0x00AA), &routes).is_none());
        assert_eq!(registry.len(), 2);

        registry.close_all();
        drop(registry);

        // A failing close does not stop the others; nothing is closed twice.
        assert_eq!(*log.lock().unwrap(), vec!["close:ft", "close:shell"]);
    }

    /// Handler whose close always panics.
    struct PanicOnClose;

    #[async_trait]
    impl SessionHandler for PanicOnClose {
        async fn serve_proto_msg(&mut self, _msg: ProtoMsg, _w: &dyn ResponseWriter) {}

        fn close(&mut self) -> anyhow::Result<()> {
            panic!("close exploded");
        }
    }

    #[test]
    fn test_registry_close_survives_panicking_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ft_log = Arc::clone(&log);
        let routes = ProtoRoutes::new()
            .route(ProtoType::SHELL, || PanicOnClose)
            .route(ProtoType::FILE_TRANSFER, move || LoggingHandler {
                name: "ft",
                log: Arc::clone(&ft_log),
                fail_close: false,
            });
        let mut registry = HandlerRegistry::new("s".to_string());
        registry.get_or_create(ProtoType::SHELL, &routes);
        registry.get_or_create(ProtoType::FILE_TRANSFER, &routes);

        let payload = registry.close_all().expect("close panic is reported");
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"close exploded"));
        assert_eq!(*log.lock().unwrap(), vec!["close:ft"]);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_registry_drop_closes_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let routes = logging_routes(&log);
        let mut registry = HandlerRegistry::new("s".to_string());
        registry.get_or_create(ProtoType::SHELL, &routes);
        drop(registry);

        assert_eq!(*log.lock().unwrap(), vec!["close:shell"]);
    }

    #[test]
    fn test_state_from_outcome() {
        assert_eq!(
            SessionState::from_outcome(&Ok(CloseReason::Closed)),
            SessionState::ClosedNormal
        );
        assert_eq!(
            SessionState::from_outcome(&Ok(CloseReason::UpstreamClosed)),
            SessionState::ClosedUpstream
        );
        assert_eq!(
            SessionState::from_outcome(&Err(SessionFault::IdleTimeout)),
            SessionState::ClosedTimeout
        );
        assert_eq!(
            SessionState::from_outcome(&Err(SessionFault::PingFailed(WriteError::Closed))),
            SessionState::ClosedError
        );
        assert!(!SessionState::Ready.is_closed());
        assert!(!SessionState::Running.is_closed());
        assert!(SessionState::ClosedUpstream.is_closed());
    }

    #[tokio::test]
    async fn test_new_session_is_ready() {
        let (writer, _rx) = ChannelResponseWriter::new(4);
        let (session, _tx) = Session::new(
            "sess-1",
            Arc::new(writer),
            ProtoRoutes::new(),
            SessionConfig::default(),
        );

        assert_eq!(session.id(), "sess-1");
        assert_eq!(session.state(), SessionState::Ready);
        assert!(!session.done().is_done());
        assert!(session.msg_chan().is_some());
    }

    #[tokio::test]
    async fn test_msg_chan_none_after_senders_dropped() {
        let (writer, _rx) = ChannelResponseWriter::new(4);
        let (session, tx) = Session::new(
            "sess-1",
            Arc::new(writer),
            ProtoRoutes::new(),
            SessionConfig::default(),
        );
        drop(tx);
        assert!(session.msg_chan().is_none());
    }

    #[tokio::test]
    async fn test_upstream_close_is_silent() {
        let (writer, mut out) = ChannelResponseWriter::new(4);
        let (mut session, tx) = Session::new(
            "sess-1",
            Arc::new(writer),
            ProtoRoutes::new(),
            SessionConfig::default(),
        );
        drop(tx);

        let result = session.listen_and_serve().await;
        assert!(matches!(result, Ok(CloseReason::UpstreamClosed)));
        assert_eq!(session.state(), SessionState::ClosedUpstream);
        assert!(session.done().is_done());
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    #[should_panic(expected = "session already finished")]
    async fn test_listen_and_serve_twice_panics() {
        let (writer, _out) = ChannelResponseWriter::new(4);
        let (mut session, tx) = Session::new(
            "sess-1",
            Arc::new(writer),
            ProtoRoutes::new(),
            SessionConfig::default(),
        );
        drop(tx);

        let _ = session.listen_and_serve().await;
        let _ = session.listen_and_serve().await;
    }
}
