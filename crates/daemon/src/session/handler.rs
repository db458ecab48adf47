//! Sub-protocol handler contract and the response writer abstraction.
//!
//! A session routes every non-control message to the [`SessionHandler`]
//! registered for its protocol type. Handlers are created lazily from a
//! [`ProtoRoutes`] table and reply through a shared [`ResponseWriter`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use protocol::{ProtoMsg, ProtoType};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors returned by a [`ResponseWriter`].
#[derive(Debug, Error)]
pub enum WriteError {
    /// The outbound side of the connection has gone away.
    #[error("connection closed")]
    Closed,

    /// The transport failed to deliver the message.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound message sink shared by a session and its handlers.
#[async_trait]
pub trait ResponseWriter: Send + Sync {
    /// Write a message to the peer.
    async fn write_proto_msg(&self, msg: ProtoMsg) -> Result<(), WriteError>;
}

/// Per-protocol message handler.
#[async_trait]
pub trait SessionHandler: Send {
    /// Handle a single message. Must not block indefinitely.
    async fn serve_proto_msg(&mut self, msg: ProtoMsg, w: &dyn ResponseWriter);

    /// Release resources when the session closes.
    ///
    /// Called exactly once. Errors are logged by the session and not retried.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// Factory producing a fresh handler instance.
pub type HandlerConstructor = Arc<dyn Fn() -> Box<dyn SessionHandler> + Send + Sync>;

/// Routing table from protocol type to handler constructor.
#[derive(Clone, Default)]
pub struct ProtoRoutes {
    routes: HashMap<ProtoType, HandlerConstructor>,
}

impl ProtoRoutes {
    /// Create an empty routing table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a protocol type, replacing any previous one.
    pub fn route<F, H>(mut self, proto: ProtoType, constructor: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: SessionHandler + 'static,
    {
        self.routes.insert(
            proto,
            Arc::new(move || Box::new(constructor()) as Box<dyn SessionHandler>),
        );
        self
    }

    /// Look up the constructor for a protocol type.
    pub fn get(&self, proto: ProtoType) -> Option<&HandlerConstructor> {
        self.routes.get(&proto)
    }

    /// Returns whether a route exists for the protocol type.
    pub fn contains(&self, proto: ProtoType) -> bool {
        self.routes.contains_key(&proto)
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for ProtoRoutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut protos: Vec<_> = self.routes.keys().map(ToString::to_string).collect();
        protos.sort();
        f.debug_struct("ProtoRoutes").field("routes", &protos).finish()
    }
}

/// [`ResponseWriter`] that forwards messages into a tokio channel.
///
/// The transport drains the receiving end and encodes messages onto the wire.
#[derive(Debug, Clone)]
pub struct ChannelResponseWriter {
    tx: mpsc::Sender<ProtoMsg>,
}

impl ChannelResponseWriter {
    /// Creates a writer and the receiver the transport should drain.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProtoMsg>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Wraps an existing sender.
    pub fn from_sender(tx: mpsc::Sender<ProtoMsg>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ResponseWriter for ChannelResponseWriter {
    async fn write_proto_msg(&self, msg: ProtoMsg) -> Result<(), WriteError> {
        self.tx.send(msg).await.map_err(|_| WriteError::Closed)
    }
}
