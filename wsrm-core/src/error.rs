//! Error types for the sequence bookkeeping and header codecs

use crate::sequence::SequenceId;
use std::fmt;

/// Result type for core operations
pub type RmCoreResult<T> = std::result::Result<T, RmCoreError>;

/// Errors produced by the sequence manager and the header codecs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RmCoreError {
    /// The referenced sequence is not (or no longer) registered
    UnknownSequence { id: SequenceId },
    /// A sequence with this identifier already exists
    DuplicateSequence { id: SequenceId },
    /// No further message numbers may be assigned or received
    SequenceClosed { id: SequenceId },
    /// Malformed or unexpected header / control message
    Protocol { message: String },
}

impl RmCoreError {
    pub fn unknown_sequence(id: &SequenceId) -> Self {
        RmCoreError::UnknownSequence { id: id.clone() }
    }

    pub fn duplicate_sequence(id: &SequenceId) -> Self {
        RmCoreError::DuplicateSequence { id: id.clone() }
    }

    pub fn sequence_closed(id: &SequenceId) -> Self {
        RmCoreError::SequenceClosed { id: id.clone() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        RmCoreError::Protocol {
            message: message.into(),
        }
    }

    /// The record is gone; callers treat the sequence as already terminated.
    pub fn is_unknown_sequence(&self) -> bool {
        matches!(self, RmCoreError::UnknownSequence { .. })
    }
}

impl fmt::Display for RmCoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RmCoreError::UnknownSequence { id } => write!(f, "Unknown sequence: {id}"),
            RmCoreError::DuplicateSequence { id } => write!(f, "Duplicate sequence: {id}"),
            RmCoreError::SequenceClosed { id } => write!(f, "Sequence is closed: {id}"),
            RmCoreError::Protocol { message } => write!(f, "Protocol error: {message}"),
        }
    }
}

impl std::error::Error for RmCoreError {}
