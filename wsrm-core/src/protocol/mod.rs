//! WS-ReliableMessaging versions, typed headers, and header codecs
//!
//! Each supported version has a [`HeaderCodec`] implementation that knows how
//! that version lays its headers and control messages out. A session picks
//! its codec once, from [`ProtocolVersion::codec`], and never switches.

mod headers;
mod rm10;
mod rm11;
mod wire;

pub use crate::ranges::AckRange;
pub use headers::*;
pub use rm10::Rm10Codec;
pub use rm11::Rm11Codec;

use crate::envelope::{Header, HeaderSet};
use crate::error::{RmCoreError, RmCoreResult};
use bytes::Bytes;
use std::fmt;

/// Local names of the three protocol headers
pub mod names {
    pub const SEQUENCE: &str = "Sequence";
    pub const ACK_REQUESTED: &str = "AckRequested";
    pub const SEQUENCE_ACKNOWLEDGEMENT: &str = "SequenceAcknowledgement";
}

/// WS-Addressing anonymous endpoint, the default `AcksTo`
pub const ANONYMOUS_ADDRESS: &str = "http://www.w3.org/2005/08/addressing/anonymous";

/// Action URIs of one protocol version.
#[derive(Debug)]
pub struct Actions {
    pub create_sequence: &'static str,
    pub create_sequence_response: &'static str,
    /// `LastMessage` in 1.0, `CloseSequence` in 1.1
    pub close_sequence: &'static str,
    pub close_sequence_response: Option<&'static str>,
    pub terminate_sequence: &'static str,
    pub terminate_sequence_response: Option<&'static str>,
    pub ack_requested: &'static str,
    pub sequence_acknowledgement: &'static str,
}

static RM10_ACTIONS: Actions = Actions {
    create_sequence: "http://schemas.xmlsoap.org/ws/2005/02/rm/CreateSequence",
    create_sequence_response: "http://schemas.xmlsoap.org/ws/2005/02/rm/CreateSequenceResponse",
    close_sequence: "http://schemas.xmlsoap.org/ws/2005/02/rm/LastMessage",
    close_sequence_response: None,
    terminate_sequence: "http://schemas.xmlsoap.org/ws/2005/02/rm/TerminateSequence",
    terminate_sequence_response: None,
    ack_requested: "http://schemas.xmlsoap.org/ws/2005/02/rm/AckRequested",
    sequence_acknowledgement: "http://schemas.xmlsoap.org/ws/2005/02/rm/SequenceAcknowledgement",
};

static RM11_ACTIONS: Actions = Actions {
    create_sequence: "http://docs.oasis-open.org/ws-rx/wsrm/200702/CreateSequence",
    create_sequence_response: "http://docs.oasis-open.org/ws-rx/wsrm/200702/CreateSequenceResponse",
    close_sequence: "http://docs.oasis-open.org/ws-rx/wsrm/200702/CloseSequence",
    close_sequence_response: Some(
        "http://docs.oasis-open.org/ws-rx/wsrm/200702/CloseSequenceResponse",
    ),
    terminate_sequence: "http://docs.oasis-open.org/ws-rx/wsrm/200702/TerminateSequence",
    terminate_sequence_response: Some(
        "http://docs.oasis-open.org/ws-rx/wsrm/200702/TerminateSequenceResponse",
    ),
    ack_requested: "http://docs.oasis-open.org/ws-rx/wsrm/200702/AckRequested",
    sequence_acknowledgement: "http://docs.oasis-open.org/ws-rx/wsrm/200702/SequenceAcknowledgement",
};

static RM10_CODEC: Rm10Codec = Rm10Codec;
static RM11_CODEC: Rm11Codec = Rm11Codec;

/// Supported protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    /// WS-ReliableMessaging 1.0 (February 2005 submission)
    Rm10,
    /// WS-ReliableMessaging 1.1 (OASIS, February 2007)
    #[default]
    Rm11,
}

impl ProtocolVersion {
    pub fn namespace_uri(self) -> &'static str {
        match self {
            ProtocolVersion::Rm10 => "http://schemas.xmlsoap.org/ws/2005/02/rm",
            ProtocolVersion::Rm11 => "http://docs.oasis-open.org/ws-rx/wsrm/200702",
        }
    }

    pub fn actions(self) -> &'static Actions {
        match self {
            ProtocolVersion::Rm10 => &RM10_ACTIONS,
            ProtocolVersion::Rm11 => &RM11_ACTIONS,
        }
    }

    /// The codec for this version. Codecs are stateless statics.
    pub fn codec(self) -> &'static dyn HeaderCodec {
        match self {
            ProtocolVersion::Rm10 => &RM10_CODEC,
            ProtocolVersion::Rm11 => &RM11_CODEC,
        }
    }

    /// `true` if `action` is one of this version's protocol actions.
    pub fn is_protocol_action(self, action: &str) -> bool {
        action
            .strip_prefix(self.namespace_uri())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Rm10 => write!(f, "WS-RM 1.0"),
            ProtocolVersion::Rm11 => write!(f, "WS-RM 1.1"),
        }
    }
}

/// Reads and writes the protocol headers and control-message bodies of one
/// protocol version.
///
/// Headers written by one version live under that version's namespace and
/// read as absent through the other version's codec.
pub trait HeaderCodec: Send + Sync + 'static {
    fn version(&self) -> ProtocolVersion;

    fn write_sequence(&self, headers: &mut HeaderSet, header: &SequenceHeader) -> RmCoreResult<()>;
    fn read_sequence(&self, headers: &HeaderSet) -> RmCoreResult<Option<SequenceHeader>>;

    fn write_ack_requested(
        &self,
        headers: &mut HeaderSet,
        header: &AckRequestedHeader,
    ) -> RmCoreResult<()>;
    fn read_ack_requested(&self, headers: &HeaderSet) -> RmCoreResult<Option<AckRequestedHeader>>;

    fn write_acknowledgement(
        &self,
        headers: &mut HeaderSet,
        header: &SequenceAcknowledgementHeader,
    ) -> RmCoreResult<()>;
    fn read_acknowledgement(
        &self,
        headers: &HeaderSet,
    ) -> RmCoreResult<Option<SequenceAcknowledgementHeader>>;

    /// Encode a control message into an envelope body.
    fn encode_control(&self, message: &ControlMessage) -> RmCoreResult<Bytes>;

    /// Decode the body of a control envelope carrying `action`.
    fn decode_control(&self, action: &str, body: &Bytes) -> RmCoreResult<ControlMessage>;

    /// Action URI a control message travels under.
    fn control_action(&self, message: &ControlMessage) -> RmCoreResult<&'static str> {
        let actions = self.version().actions();
        let action = match message {
            ControlMessage::CreateSequence(_) => Some(actions.create_sequence),
            ControlMessage::CreateSequenceResponse(_) => Some(actions.create_sequence_response),
            ControlMessage::CloseSequence(_) => Some(actions.close_sequence),
            ControlMessage::CloseSequenceResponse(_) => actions.close_sequence_response,
            ControlMessage::TerminateSequence(_) => Some(actions.terminate_sequence),
            ControlMessage::TerminateSequenceResponse(_) => actions.terminate_sequence_response,
        };
        action.ok_or_else(|| {
            RmCoreError::protocol(format!(
                "{} has no {} message",
                self.version(),
                message.name()
            ))
        })
    }
}

/// Insert a header under `version`'s namespace.
fn put_header(headers: &mut HeaderSet, version: ProtocolVersion, name: &str, payload: Bytes) {
    headers.insert(Header::new(version.namespace_uri(), name, payload));
}

/// Payload of the named header under `version`'s namespace, if present.
fn header_payload(headers: &HeaderSet, version: ProtocolVersion, name: &str) -> Option<Bytes> {
    headers
        .get(version.namespace_uri(), name)
        .map(|h| h.payload.clone())
}
