//! WS-ReliableMessaging 1.1 codec

use super::wire::{self, Reader, Writer};
use super::*;
use crate::sequence::SequenceId;

#[derive(Debug, Default, Clone, Copy)]
pub struct Rm11Codec;

const VERSION: ProtocolVersion = ProtocolVersion::Rm11;

impl Rm11Codec {
    fn id_only(element: &'static str, body: &Bytes) -> RmCoreResult<SequenceId> {
        let mut r = Reader::new(body.clone(), element);
        let id = r.id()?;
        r.finish()?;
        Ok(id)
    }

    fn id_and_number(
        element: &'static str,
        body: &Bytes,
    ) -> RmCoreResult<(SequenceId, Option<u64>)> {
        let mut r = Reader::new(body.clone(), element);
        let id = r.id()?;
        let number = r.opt_u64()?;
        r.finish()?;
        Ok((id, number))
    }
}

impl HeaderCodec for Rm11Codec {
    fn version(&self) -> ProtocolVersion {
        VERSION
    }

    fn write_sequence(&self, headers: &mut HeaderSet, header: &SequenceHeader) -> RmCoreResult<()> {
        if header.last_message {
            return Err(RmCoreError::protocol(
                "LastMessage is not part of WS-RM 1.1, use CloseSequence",
            ));
        }
        let mut w = Writer::new();
        w.id(&header.id)?.u64(header.message_number);
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
        r.finish()?;
        Ok(Some(SequenceHeader::new(id, message_number)))
    }

    fn write_ack_requested(
        &self,
        headers: &mut HeaderSet,
        header: &AckRequestedHeader,
    ) -> RmCoreResult<()> {
        let mut w = Writer::new();
        w.id(&header.id)?;
        put_header(headers, VERSION, names::ACK_REQUESTED, w.finish());
        Ok(())
    }

    fn read_ack_requested(&self, headers: &HeaderSet) -> RmCoreResult<Option<AckRequestedHeader>> {
        let Some(payload) = header_payload(headers, VERSION, names::ACK_REQUESTED) else {
            return Ok(None);
        };
        let id = Self::id_only(names::ACK_REQUESTED, &payload)?;
        Ok(Some(AckRequestedHeader {
            id,
            message_number: None,
        }))
    }

    fn write_acknowledgement(
        &self,
        headers: &mut HeaderSet,
        header: &SequenceAcknowledgementHeader,
    ) -> RmCoreResult<()> {
        let mut w = Writer::new();
        w.id(&header.id)?
            .ranges(&header.ranges)?
            .flag(header.final_ack);
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
        let final_ack = r.flag()?;
        r.finish()?;
        Ok(Some(SequenceAcknowledgementHeader {
            id,
            ranges,
            final_ack,
        }))
    }

    fn encode_control(&self, message: &ControlMessage) -> RmCoreResult<Bytes> {
        let mut w = Writer::new();
        match message {
            ControlMessage::CreateSequence(m) => return wire::encode_create_sequence(m),
            ControlMessage::CreateSequenceResponse(m) => {
                return wire::encode_create_sequence_response(m)
            }
            ControlMessage::CloseSequence(m) => {
                w.id(&m.id)?.opt_u64(m.last_message_number);
            }
            ControlMessage::TerminateSequence(m) => {
                w.id(&m.id)?.opt_u64(m.last_message_number);
            }
            ControlMessage::CloseSequenceResponse(m) => {
                w.id(&m.id)?;
            }
            ControlMessage::TerminateSequenceResponse(m) => {
                w.id(&m.id)?;
            }
        }
        Ok(w.finish())
    }

    fn decode_control(&self, action: &str, body: &Bytes) -> RmCoreResult<ControlMessage> {
        let actions = VERSION.actions();
        let message = if action == actions.create_sequence {
            ControlMessage::CreateSequence(wire::decode_create_sequence(body)?)
        } else if action == actions.create_sequence_response {
            ControlMessage::CreateSequenceResponse(wire::decode_create_sequence_response(body)?)
        } else if action == actions.close_sequence {
            let (id, last_message_number) = Self::id_and_number("CloseSequence", body)?;
            ControlMessage::CloseSequence(CloseSequence {
                id,
                last_message_number,
            })
        } else if Some(action) == actions.close_sequence_response {
            let id = Self::id_only("CloseSequenceResponse", body)?;
            ControlMessage::CloseSequenceResponse(CloseSequenceResponse { id })
        } else if action == actions.terminate_sequence {
            let (id, last_message_number) = Self::id_and_number("TerminateSequence", body)?;
            ControlMessage::TerminateSequence(TerminateSequence {
                id,
                last_message_number,
            })
        } else if Some(action) == actions.terminate_sequence_response {
            let id = Self::id_only("TerminateSequenceResponse", body)?;
            ControlMessage::TerminateSequenceResponse(TerminateSequenceResponse { id })
        } else {
            return Err(RmCoreError::protocol(format!(
                "{VERSION} control action not recognised: {action}"
            )));
        };
        Ok(message)
    }
}
