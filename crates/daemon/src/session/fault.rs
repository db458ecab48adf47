//! Session-terminating faults.
//!
//! Every way a session can end abnormally is converted into a
//! [`SessionFault`] at the session boundary. Faults never propagate further:
//! the peer is notified on a best-effort basis and the session completes.

use std::any::Any;
use std::backtrace::Backtrace;

use thiserror::Error;

use super::handler::WriteError;

/// Maximum number of stack frames recorded for a panic.
pub const MAX_TRACEBACK: usize = 32;

/// Unrecovered failure that terminated a session.
#[derive(Debug, Error)]
pub enum SessionFault {
    /// No traffic was seen for a full idle timeout, pong window included.
    #[error("session timeout")]
    IdleTimeout,

    /// The keepalive ping could not be written.
    #[error("failed to ping peer: {0}")]
    PingFailed(#[source] WriteError),

    /// The answer to a peer ping could not be written.
    #[error("failed to answer ping: {0}")]
    PongFailed(#[source] WriteError),

    /// A handler panicked while serving a message.
    #[error("internal error: {message}")]
    Panic {
        /// Panic payload rendered as text.
        message: String,
        /// Stack captured at the session boundary, at most [`MAX_TRACEBACK`] frames.
        trace: String,
    },
}

impl SessionFault {
    /// Convert a caught panic payload into a fault, capturing the current stack.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        SessionFault::Panic {
            message: panic_message(payload.as_ref()),
            trace: capture_trace(MAX_TRACEBACK),
        }
    }
}

/// Render a panic payload as text.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Capture the current stack, keeping at most `max_frames` frames.
fn capture_trace(max_frames: usize) -> String {
    let rendered = Backtrace::force_capture().to_string();
    truncate_frames(&rendered, max_frames)
}

/// Keep the first `max_frames` frames of a rendered backtrace.
///
/// Frame headers look like `  12: crate::module::function`; the indented
/// `at file:line` lines that follow belong to the same frame.
fn truncate_frames(rendered: &str, max_frames: usize) -> String {
    let mut frames = 0;
    let mut kept = Vec::new();

    for line in rendered.lines() {
        if is_frame_header(line) {
            frames += 1;
            if frames > max_frames {
                break;
            }
        }
        kept.push(line);
    }

    kept.join("\n")
}

fn is_frame_header(line: &str) -> bool {
    let trimmed = line.trim_start();
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && trimmed[digits..].starts_with(':')
}
