//! Error types for the session runtime.
//!
//! [`RmError`] extends [`wsrm_core::RmCoreError`] with the handshake,
//! transport, and lifecycle failures a client session can surface.

use thiserror::Error;
use wsrm_core::{RmCoreError, SequenceId};

pub type Result<T> = std::result::Result<T, RmError>;

// ── Error types ─────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone)]
pub enum RmError {
    #[error("Unknown sequence: {id}")]
    UnknownSequence { id: SequenceId },

    #[error("Duplicate sequence: {id}")]
    DuplicateSequence { id: SequenceId },

    #[error("Sequence is closed: {id}")]
    SequenceClosed { id: SequenceId },

    #[error("Create sequence failed after {attempts} attempt(s): {message}")]
    CreateSequenceFailure { attempts: u32, message: String },

    #[error("Sequence identifier mismatch: expected {expected}, got {actual}")]
    SequenceIdentityMismatch {
        expected: SequenceId,
        actual: SequenceId,
    },

    #[error("Communication failure: {message}")]
    Communication { message: String },

    #[error("Reliable messaging failure: {message}")]
    ReliableMessaging { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Session is closed")]
    SessionClosed,
}

// ── Bridge: wsrm-core errors → RmError ──────────────────────────────────

impl From<RmCoreError> for RmError {
    fn from(e: RmCoreError) -> Self {
        match e {
            RmCoreError::UnknownSequence { id } => Self::UnknownSequence { id },
            RmCoreError::DuplicateSequence { id } => Self::DuplicateSequence { id },
            RmCoreError::SequenceClosed { id } => Self::SequenceClosed { id },
            RmCoreError::Protocol { message } => Self::Protocol { message },
        }
    }
}

// ── Constructors ────────────────────────────────────────────────────────

impl RmError {
    pub fn create_sequence_failure(attempts: u32, message: impl Into<String>) -> Self {
        Self::CreateSequenceFailure {
            attempts,
            message: message.into(),
        }
    }

    pub fn identity_mismatch(expected: &SequenceId, actual: &SequenceId) -> Self {
        Self::SequenceIdentityMismatch {
            expected: expected.clone(),
            actual: actual.clone(),
        }
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
        }
    }

    pub fn reliable_messaging(message: impl Into<String>) -> Self {
        Self::ReliableMessaging {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// ── Predicates ──────────────────────────────────────────────────────────

impl RmError {
    /// Transport hiccups and faulted control responses; worth another attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Communication { .. } | Self::ReliableMessaging { .. }
        )
    }

    /// The session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CreateSequenceFailure { .. }
                | Self::SequenceIdentityMismatch { .. }
                | Self::SessionClosed
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::SessionClosed | Self::SequenceClosed { .. })
    }

    pub fn is_unknown_sequence(&self) -> bool {
        matches!(self, Self::UnknownSequence { .. })
    }
}
