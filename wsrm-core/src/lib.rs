//! Synchronous WS-ReliableMessaging bookkeeping.
//!
//! This crate holds everything about reliable sequences that does not need a
//! runtime: the per-version header codecs, the envelope model they read from
//! and write into, and the sequence records with their acknowledgement
//! ranges. It has no tokio dependency and performs no I/O.
//!
//! ```text
//! ┌─────────────────────────────────┐
//! │  wsrm-core                      │
//! │                                 │
//! │  protocol  ← versions & codecs  │
//! │  envelope  ← headers + body     │
//! │  ranges    ← ack range merging  │
//! │  sequence  ← records & manager  │
//! │  error     ← 4 variants         │
//! └─────────────────────────────────┘
//! ```

pub mod envelope;
pub mod error;
pub mod protocol;
pub mod ranges;
pub mod sequence;

pub use envelope::{Envelope, Fault, Header, HeaderSet};
pub use error::{RmCoreError, RmCoreResult};
pub use protocol::{HeaderCodec, ProtocolVersion};
pub use ranges::AckRanges;
pub use sequence::{Sequence, SequenceId, SequenceManager, SequenceState};
