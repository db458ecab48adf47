//! Session multiplexing.
//!
//! A session receives framed messages from one connection, answers the
//! control plane itself (keepalive, close, error reports) and hands every
//! other message to a lazily created per-protocol handler.

pub mod fault;
pub mod handler;
pub mod multiplexer;

pub use fault::{SessionFault, MAX_TRACEBACK};
pub use handler::{
    ChannelResponseWriter, HandlerConstructor, ProtoRoutes, ResponseWriter, SessionHandler,
    WriteError,
};
pub use multiplexer::{
    CloseReason, DoneSignal, Session, SessionConfig, SessionId, SessionState,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_QUEUE_CAPACITY, PONG_WAIT,
};
