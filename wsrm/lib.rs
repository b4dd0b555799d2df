//! # wsrm-tokio: WS-ReliableMessaging client sessions on Tokio
//!
//! Client-side runtime of WS-ReliableMessaging 1.0 and 1.1: at-least-once,
//! in-order delivery of request/response exchanges over an unreliable
//! transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  wsrm-tokio  (this crate)                 │
//! │                                           │
//! │  ClientSession         ← user API         │
//! │  scheduler / resend    ← background tasks │
//! │  communicator          ← transport seam   │
//! ├───────────────────────────────────────────┤
//! │  wsrm-core  (dependency)                  │
//! │                                           │
//! │  SequenceManager  ← sequence bookkeeping  │
//! │  protocol         ← headers & codecs      │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsrm_tokio::{
//!     ClientSession, Envelope, ProtocolCommunicator, Result, RmConfig, SequenceManager,
//! };
//!
//! struct MyTransport;
//!
//! impl ProtocolCommunicator for MyTransport {
//!     async fn send(&self, envelope: Envelope, action: &str) -> Result<Option<Envelope>> {
//!         // hand the envelope to the wire, return the response
//!         # let _ = (envelope, action);
//!         Ok(None)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let sequences = Arc::new(SequenceManager::new());
//!     let session = ClientSession::new(RmConfig::rm11(), Arc::new(MyTransport), sequences)?;
//!
//!     let request = Envelope::with_body("urn:example:Echo", "hello");
//!     let response = session.invoke(request, false).await?;
//!     println!("Received: {:?}", response.map(|r| r.body));
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

// ── Layer 1: Core bookkeeping (re-exported from wsrm-core) ──────────────

/// Protocol versions, typed headers, and codecs.
pub use wsrm_core::protocol;

/// Direct access to the standalone `wsrm-core` crate.
pub use wsrm_core;

pub use wsrm_core::{Envelope, ProtocolVersion, SequenceId, SequenceManager};

// ── Layer 2: Configuration & errors ─────────────────────────────────────

pub mod config;
pub mod error;
pub use config::RmConfig;
pub use error::{Result, RmError};

// ── Layer 3: Transport seam & background machinery ──────────────────────

pub mod communicator;
pub mod resend;
pub mod scheduler;
pub use communicator::ProtocolCommunicator;
pub use resend::{ResendHandle, ResendRegistry, Resumption};
pub use scheduler::{ScheduledTaskManager, TaskHandle};

// ── Layer 4: Sessions ───────────────────────────────────────────────────

pub mod session;
pub use session::{ClientSession, SessionState, MAX_INITIATE_SESSION_ATTEMPTS};

pub mod filter;
pub mod metrics;

// ── Version info ────────────────────────────────────────────────────────

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
