//! Typed protocol headers and control messages

use crate::ranges::AckRange;
use crate::sequence::SequenceId;

/// `Sequence` header: numbers an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceHeader {
    pub id: SequenceId,
    pub message_number: u64,
    /// WS-RM 1.0 only
    pub last_message: bool,
}

impl SequenceHeader {
    pub fn new(id: SequenceId, message_number: u64) -> Self {
        Self {
            id,
            message_number,
            last_message: false,
        }
    }
}

/// `AckRequested` header: asks the peer to report its acknowledgement state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRequestedHeader {
    pub id: SequenceId,
    /// WS-RM 1.0 only: highest message number sent so far
    pub message_number: Option<u64>,
}

/// `SequenceAcknowledgement` header: ranges received on a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceAcknowledgementHeader {
    pub id: SequenceId,
    pub ranges: Vec<AckRange>,
    /// WS-RM 1.1 only: no further acknowledgements will follow
    pub final_ack: bool,
}

/// Opaque reference to a security token obtained for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityTokenReference(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSequence {
    pub acks_to: String,
    /// Inbound sequence offered to the peer
    pub offer: Option<SequenceId>,
    pub security_token: Option<SecurityTokenReference>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSequenceResponse {
    pub id: SequenceId,
    pub accepted_offer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSequence {
    pub id: SequenceId,
    pub last_message_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSequenceResponse {
    pub id: SequenceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminateSequence {
    pub id: SequenceId,
    /// WS-RM 1.1 only
    pub last_message_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminateSequenceResponse {
    pub id: SequenceId,
}

/// Body of a protocol control envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    CreateSequence(CreateSequence),
    CreateSequenceResponse(CreateSequenceResponse),
    CloseSequence(CloseSequence),
    CloseSequenceResponse(CloseSequenceResponse),
    TerminateSequence(TerminateSequence),
    TerminateSequenceResponse(TerminateSequenceResponse),
}

impl ControlMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::CreateSequence(_) => "CreateSequence",
            ControlMessage::CreateSequenceResponse(_) => "CreateSequenceResponse",
            ControlMessage::CloseSequence(_) => "CloseSequence",
            ControlMessage::CloseSequenceResponse(_) => "CloseSequenceResponse",
            ControlMessage::TerminateSequence(_) => "TerminateSequence",
            ControlMessage::TerminateSequenceResponse(_) => "TerminateSequenceResponse",
        }
    }
}
