//! Message envelope definitions.
//!
//! Every message exchanged over a connection is a [`ProtoMsg`]: a header
//! naming the sub-protocol, message type and session, followed by an opaque
//! body owned by that sub-protocol. Envelopes are serialized using
//! MessagePack with named fields so peers written in other languages can
//! decode them as maps.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Property key carrying a peer-assigned message identifier.
pub const PROPERTY_MESSAGE_ID: &str = "msgid";

/// Sub-protocol identifier carried in every message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtoType(pub u16);

impl ProtoType {
    /// Session control plane (ping, pong, close, error, ...).
    pub const CONTROL: ProtoType = ProtoType(0x0000);
    /// Interactive shell.
    pub const SHELL: ProtoType = ProtoType(0x0001);
    /// File transfer.
    pub const FILE_TRANSFER: ProtoType = ProtoType(0x0002);
    /// Port forwarding.
    pub const PORT_FORWARD: ProtoType = ProtoType(0x0003);
    /// Local client API tunnel.
    pub const MENDER_CLIENT: ProtoType = ProtoType(0x0004);

    /// Returns whether this is the reserved session control protocol.
    pub fn is_control(&self) -> bool {
        *self == Self::CONTROL
    }
}

impl Default for ProtoType {
    fn default() -> Self {
        ProtoType::CONTROL
    }
}

impl fmt::Display for ProtoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl From<u16> for ProtoType {
    fn from(value: u16) -> Self {
        ProtoType(value)
    }
}

/// Message header.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProtoHdr {
    /// Sub-protocol this message belongs to.
    pub proto: ProtoType,
    /// Message type within the sub-protocol.
    #[serde(default)]
    pub typ: String,
    /// Session the message belongs to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sid: String,
    /// Open property bag (message id, sub-protocol metadata).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub props: HashMap<String, serde_json::Value>,
}

impl ProtoHdr {
    /// Create a header without properties.
    pub fn new(proto: ProtoType, typ: impl Into<String>, sid: impl Into<String>) -> Self {
        Self {
            proto,
            typ: typ.into(),
            sid: sid.into(),
            props: HashMap::new(),
        }
    }

    /// Returns the peer-assigned message identifier, if present and a string.
    pub fn message_id(&self) -> Option<&str> {
        self.props
            .get(PROPERTY_MESSAGE_ID)
            .and_then(serde_json::Value::as_str)
    }
}

/// A message envelope: header plus opaque body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProtoMsg {
    /// Routing header.
    pub hdr: ProtoHdr,
    /// Sub-protocol payload.
    #[serde(default, with = "serde_bytes")]
    pub body: Vec<u8>,
}

impl ProtoMsg {
    /// Create a message with the given header and body.
    pub fn new(hdr: ProtoHdr, body: Vec<u8>) -> Self {
        Self { hdr, body }
    }

    /// Create a bodiless control message of the given type.
    pub fn control(typ: &str, sid: impl Into<String>) -> Self {
        Self {
            hdr: ProtoHdr::new(ProtoType::CONTROL, typ, sid),
            body: Vec::new(),
        }
    }

    /// Attach a property to the header.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.hdr.props.insert(key.into(), value);
        self
    }

    /// Serialize the message to MessagePack bytes.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Deserialize a message from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
