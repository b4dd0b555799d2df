//! WS-ReliableMessaging 1.0 codec
//!
//! 1.0 has no `CloseSequence`; the client ends a sequence by sending a
//! message whose `Sequence` header carries the `LastMessage` marker.
//! `AckRequested` may name the highest message number sent, and
//! `TerminateSequence` has no response.

use super::wire::{self, Reader, Writer};
use super::*;
use tracing::trace;

#[derive(Debug, Default, Clone, Copy)]
pub struct Rm10Codec;

const VERSION: ProtocolVersion = ProtocolVersion::Rm10;

impl HeaderCodec for Rm10Codec {
    fn version(&self) -> ProtocolVersion {
        VERSION
    }

    fn write_sequence(&self, headers: &mut HeaderSet, header: &SequenceHeader) -> RmCoreResult<()> {
        let mut w = Writer::new();
        w.id(&header.id)?
            .u64(header.message_number)
            .flag(header.last_message);
        put_header(headers, VERSION, names::SEQUENCE, w.finish());
        Ok(())
    }

    fn read_sequence(&self, headers: &HeaderSet) -> RmCoreResult<Option<SequenceHeader>> {
        let Some(payload) = header_payload(headers, VERSION, names::SEQUENCE) else {
            return Ok(None);
        };
        let mut r = Reader::new(payload, names::SEQUENCE);
        let id = r.id()?;
        let message_number = r.u64()?;
        let last_message = r.flag()?;
        r.finish()?;
        Ok(Some(SequenceHeader {
            id,
            message_number,
            last_message,
        }))
    }

    fn write_ack_requested(
        &self,
        headers: &mut HeaderSet,
        header: &AckRequestedHeader,
    ) -> RmCoreResult<()> {
        let mut w = Writer::new();
        w.id(&header.id)?.opt_u64(header.message_number);
        put_header(headers, VERSION, names::ACK_REQUESTED, w.finish());
        Ok(())
    }

    fn read_ack_requested(&self, headers: &HeaderSet) -> RmCoreResult<Option<AckRequestedHeader>> {
        let Some(payload) = header_payload(headers, VERSION, names::ACK_REQUESTED) else {
            return Ok(None);
        };
        let mut r = Reader::new(payload, names::ACK_REQUESTED);
        let id = r.id()?;
        let message_number = r.opt_u64()?;
        r.finish()?;
        Ok(Some(AckRequestedHeader { id, message_number }))
    }

    fn write_acknowledgement(
        &self,
        headers: &mut HeaderSet,
        header: &SequenceAcknowledgementHeader,
    ) -> RmCoreResult<()> {
        if header.final_ack {
            trace!(sequence = %header.id, "Final flag has no 1.0 encoding, dropping it");
        }
        let mut w = Writer::new();
        w.id(&header.id)?.ranges(&header.ranges)?;
        put_header(headers, VERSION, names::SEQUENCE_ACKNOWLEDGEMENT, w.finish());
        Ok(())
    }

    fn read_acknowledgement(
        &self,
        headers: &HeaderSet,
    ) -> RmCoreResult<Option<SequenceAcknowledgementHeader>> {
        let Some(payload) = header_payload(headers, VERSION, names::SEQUENCE_ACKNOWLEDGEMENT)
        else {
            return Ok(None);
        };
        let mut r = Reader::new(payload, names::SEQUENCE_ACKNOWLEDGEMENT);
        let id = r.id()?;
        let ranges = r.ranges()?;
        r.finish()?;
        Ok(Some(SequenceAcknowledgementHeader {
            id,
            ranges,
            final_ack: false,
        }))
    }

    fn encode_control(&self, message: &ControlMessage) -> RmCoreResult<Bytes> {
        match message {
            ControlMessage::CreateSequence(m) => wire::encode_create_sequence(m),
            ControlMessage::CreateSequenceResponse(m) => wire::encode_create_sequence_response(m),
            // The LastMessage envelope carries its identity in the Sequence header.
            ControlMessage::CloseSequence(_) => Ok(Bytes::new()),
            ControlMessage::TerminateSequence(m) => {
                let mut w = Writer::new();
                w.id(&m.id)?;
                Ok(w.finish())
            }
            ControlMessage::CloseSequenceResponse(_)
            | ControlMessage::TerminateSequenceResponse(_) => Err(RmCoreError::protocol(format!(
                "{VERSION} has no {} message",
                message.name()
            ))),
        }
    }

    fn decode_control(&self, action: &str, body: &Bytes) -> RmCoreResult<ControlMessage> {
        let actions = VERSION.actions();
        if action == actions.create_sequence {
            wire::decode_create_sequence(body).map(ControlMessage::CreateSequence)
        } else if action == actions.create_sequence_response {
            wire::decode_create_sequence_response(body).map(ControlMessage::CreateSequenceResponse)
        } else if action == actions.terminate_sequence {
            let mut r = Reader::new(body.clone(), "TerminateSequence");
            let id = r.id()?;
            r.finish()?;
            Ok(ControlMessage::TerminateSequence(TerminateSequence {
                id,
                last_message_number: None,
            }))
        } else {
            Err(RmCoreError::protocol(format!(
                "{VERSION} control action not recognised: {action}"
            )))
        }
    }
}
