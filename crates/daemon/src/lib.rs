//! # connectd
//!
//! Device-side endpoint of a remote management transport.
//!
//! ## Overview
//!
//! One persistent connection carries several independent sub-protocols
//! (shell, file transfer, port forwarding) tagged by a protocol type. This
//! crate provides:
//!
//! - **Session multiplexing**: keepalive, control-plane handling and routing
//!   of messages to lazily created per-protocol handlers
//! - **File transfer governance**: a policy gate for uploads and downloads
//!   with device-wide byte accounting and smoothed throughput statistics
//! - **Configuration**: TOML configuration with environment overrides
//!
//! ## Architecture
//!
//! ```text
//! transport ──► mpsc ──► Session ──► ProtoRoutes ──► SessionHandler (per proto)
//!                          │                              │
//!                          ▼                              ▼
//!                   ResponseWriter ◄──────────────────  Permit ──► DeviceCounters
//!                                                                     ▲
//!                                                                RateTracker
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use connectd::session::{ChannelResponseWriter, ProtoRoutes, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (writer, mut outbound) = ChannelResponseWriter::new(64);
//!     let (mut session, inbound) = Session::new(
//!         "session-1",
//!         Arc::new(writer),
//!         ProtoRoutes::new(),
//!         SessionConfig::default(),
//!     );
//!
//!     // The transport feeds `inbound` and drains `outbound`.
//!     tokio::spawn(async move { while outbound.recv().await.is_some() {} });
//!     drop(inbound);
//!
//!     let outcome = session.listen_and_serve().await;
//!     println!("session ended: {:?}", outcome);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Session multiplexer and handler contract
//! - [`limits`]: File transfer policy, counters and rate tracking

pub mod config;
pub mod limits;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;

pub use session::{
    CloseReason, ProtoRoutes, ResponseWriter, Session, SessionConfig, SessionFault,
    SessionHandler, SessionState,
};

pub use limits::filetransfer::{
    CounterSnapshot, DeviceCounters, FileInfo, Permit, PermitError, PolicyViolation, RateTracker,
};
