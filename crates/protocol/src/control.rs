//! Session control plane messages.
//!
//! Control messages travel on [`ProtoType::CONTROL`] and are handled by the
//! session itself rather than by a sub-protocol handler.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::messages::{ProtoHdr, ProtoMsg, ProtoType};

/// Keepalive probe.
pub const MESSAGE_TYPE_PING: &str = "ping";
/// Keepalive answer.
pub const MESSAGE_TYPE_PONG: &str = "pong";
/// Session open request.
pub const MESSAGE_TYPE_OPEN: &str = "open";
/// Session close request.
pub const MESSAGE_TYPE_CLOSE: &str = "close";
/// Error report.
pub const MESSAGE_TYPE_ERROR: &str = "error";

/// Body of a control `error` message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error description.
    #[serde(rename = "err")]
    pub error: String,
    /// Protocol of the message that caused the error.
    #[serde(rename = "msgproto", default)]
    pub message_proto: ProtoType,
    /// Type of the message that caused the error.
    #[serde(rename = "msgtype", default, skip_serializing_if = "String::is_empty")]
    pub message_type: String,
    /// Identifier of the message that caused the error, if it had one.
    #[serde(rename = "msgid", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Whether the sender is closing the session.
    #[serde(default)]
    pub close: bool,
}

impl ErrorBody {
    /// Create an error body referring to the header of the offending message.
    ///
    /// Passing `None` produces an error that is not tied to any message.
    pub fn new(error: impl Into<String>, cause: Option<&ProtoHdr>, close: bool) -> Self {
        let (message_proto, message_type, message_id) = match cause {
            Some(hdr) => (
                hdr.proto,
                hdr.typ.clone(),
                hdr.message_id().map(str::to_string),
            ),
            None => (ProtoType::CONTROL, String::new(), None),
        };
        Self {
            error: error.into(),
            message_proto,
            message_type,
            message_id,
            close,
        }
    }

    /// Wrap the error body in a control message for the given session.
    pub fn into_message(self, sid: impl Into<String>) -> Result<ProtoMsg> {
        let body = rmp_serde::to_vec_named(&self)?;
        Ok(ProtoMsg::new(
            ProtoHdr::new(ProtoType::CONTROL, MESSAGE_TYPE_ERROR, sid),
            body,
        ))
    }

    /// Decode the error body of a control `error` message.
    pub fn from_message(msg: &ProtoMsg) -> Result<Self> {
        if msg.hdr.typ != MESSAGE_TYPE_ERROR {
            return Err(ProtocolError::UnexpectedMessageType {
                expected: MESSAGE_TYPE_ERROR.to_string(),
                got: msg.hdr.typ.clone(),
            });
        }
        Ok(rmp_serde::from_slice(&msg.body)?)
    }
}
