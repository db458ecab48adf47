//! # connectd Protocol Library
//!
//! This crate provides the message envelope and the session control plane
//! shared by the connectd device daemon and its peers.
//!
//! ## Overview
//!
//! A single persistent connection carries many independent sub-protocols
//! (shell, file transfer, port forwarding, ...). Every message is wrapped in
//! a [`ProtoMsg`] whose header names the sub-protocol via [`ProtoType`]; the
//! body belongs to that sub-protocol and is opaque at this layer.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Sub-protocol payloads            │  owned by handlers
//! ├─────────────────────────────────────────┤
//! │     ProtoMsg envelope (hdr + body)      │  MessagePack, named fields
//! ├─────────────────────────────────────────┤
//! │    Transport (authenticated stream)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ProtoMsg, ProtoType, ErrorBody};
//! use protocol::control::MESSAGE_TYPE_PING;
//!
//! let ping = ProtoMsg::control(MESSAGE_TYPE_PING, "session-1");
//! let bytes = ping.to_msgpack().unwrap();
//! assert_eq!(ProtoMsg::from_msgpack(&bytes).unwrap(), ping);
//!
//! let err = ErrorBody::new("session timeout", None, true)
//!     .into_message("session-1")
//!     .unwrap();
//! assert_eq!(err.hdr.proto, ProtoType::CONTROL);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: envelope and protocol type
//! - [`control`]: control message types and the error body
//! - [`error`]: error types

pub mod control;
pub mod error;
pub mod messages;

pub use control::ErrorBody;
pub use error::{ProtocolError, Result};
pub use messages::{ProtoHdr, ProtoMsg, ProtoType, PROPERTY_MESSAGE_ID};
