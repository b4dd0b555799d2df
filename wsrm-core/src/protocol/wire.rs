//! Length-prefixed field encoding shared by both codecs

use crate::error::{RmCoreError, RmCoreResult};
use crate::ranges::AckRange;
use crate::sequence::SequenceId;
use super::headers::{CreateSequence, CreateSequenceResponse, SecurityTokenReference};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub(super) struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub(super) fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    pub(super) fn str(&mut self, value: &str) -> RmCoreResult<&mut Self> {
        let len = u16::try_from(value.len())
            .map_err(|_| RmCoreError::protocol(format!("field too long: {} bytes", value.len())))?;
        self.buf.put_u16_le(len);
        self.buf.put_slice(value.as_bytes());
        Ok(self)
    }

    pub(super) fn id(&mut self, id: &SequenceId) -> RmCoreResult<&mut Self> {
        self.str(id.as_str())
    }

    pub(super) fn opt_str(&mut self, value: Option<&str>) -> RmCoreResult<&mut Self> {
        match value {
            Some(v) => {
                self.flag(true);
                self.str(v)
            }
            None => Ok(self.flag(false)),
        }
    }

    pub(super) fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    pub(super) fn opt_u64(&mut self, value: Option<u64>) -> &mut Self {
        match value {
            Some(v) => self.flag(true).u64(v),
            None => self.flag(false),
        }
    }

    pub(super) fn flag(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(value as u8);
        self
    }

    pub(super) fn ranges(&mut self, ranges: &[AckRange]) -> RmCoreResult<&mut Self> {
        let count = u16::try_from(ranges.len())
            .map_err(|_| RmCoreError::protocol(format!("too many ranges: {}", ranges.len())))?;
        self.buf.put_u16_le(count);
        for r in ranges {
            if r.lower == 0 || r.lower > r.upper {
                return Err(RmCoreError::protocol(format!(
                    "invalid acknowledgement range {}..={}",
                    r.lower, r.upper
                )));
            }
            self.buf.put_u64_le(r.lower);
            self.buf.put_u64_le(r.upper);
        }
        Ok(self)
    }

    pub(super) fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

/// Cursor over a header payload or control body. Every read fails with a
/// protocol error naming the element being decoded.
pub(super) struct Reader {
    buf: Bytes,
    element: &'static str,
}

impl Reader {
    pub(super) fn new(buf: Bytes, element: &'static str) -> Self {
        Self { buf, element }
    }

    fn need(&self, n: usize) -> RmCoreResult<()> {
        if self.buf.remaining() < n {
            return Err(RmCoreError::protocol(format!(
                "truncated {}: need {} bytes, have {}",
                self.element,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub(super) fn str(&mut self) -> RmCoreResult<String> {
        self.need(2)?;
        let len = self.buf.get_u16_le() as usize;
        self.need(len)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|_| RmCoreError::protocol(format!("{}: field is not UTF-8", self.element)))
    }

    pub(super) fn id(&mut self) -> RmCoreResult<SequenceId> {
        let id = self.str()?;
        if id.is_empty() {
            return Err(RmCoreError::protocol(format!(
                "{}: empty sequence identifier",
                self.element
            )));
        }
        Ok(SequenceId::from(id))
    }

    pub(super) fn opt_str(&mut self) -> RmCoreResult<Option<String>> {
        if self.flag()? {
            self.str().map(Some)
        } else {
            Ok(None)
        }
    }

    pub(super) fn u64(&mut self) -> RmCoreResult<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub(super) fn opt_u64(&mut self) -> RmCoreResult<Option<u64>> {
        if self.flag()? {
            self.u64().map(Some)
        } else {
            Ok(None)
        }
    }

    pub(super) fn flag(&mut self) -> RmCoreResult<bool> {
        self.need(1)?;
        match self.buf.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RmCoreError::protocol(format!(
                "{}: invalid flag byte {:#04x}",
                self.element, other
            ))),
        }
    }

    pub(super) fn ranges(&mut self) -> RmCoreResult<Vec<AckRange>> {
        self.need(2)?;
        let count = self.buf.get_u16_le() as usize;
        self.need(count * 16)?;
        let mut ranges = Vec::with_capacity(count);
        for _ in 0..count {
            let lower = self.buf.get_u64_le();
            let upper = self.buf.get_u64_le();
            if lower == 0 || lower > upper {
                return Err(RmCoreError::protocol(format!(
                    "{}: invalid range {}..={}",
                    self.element, lower, upper
                )));
            }
            ranges.push(AckRange::new(lower, upper));
        }
        Ok(ranges)
    }

    /// Reject trailing bytes.
    pub(super) fn finish(self) -> RmCoreResult<()> {
        if self.buf.has_remaining() {
            return Err(RmCoreError::protocol(format!(
                "{}: {} trailing bytes",
                self.element,
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

/// `CreateSequence` and its response share one layout across versions.
pub(super) fn encode_create_sequence(message: &CreateSequence) -> RmCoreResult<Bytes> {
    let mut w = Writer::new();
    w.str(&message.acks_to)?
        .opt_str(message.offer.as_ref().map(|id| id.as_str()))?
        .opt_str(message.security_token.as_ref().map(|t| t.0.as_str()))?;
    Ok(w.finish())
}

pub(super) fn decode_create_sequence(body: &Bytes) -> RmCoreResult<CreateSequence> {
    let mut r = Reader::new(body.clone(), "CreateSequence");
    let acks_to = r.str()?;
    let offer = r.opt_str()?.map(SequenceId::from);
    let security_token = r.opt_str()?.map(SecurityTokenReference);
    r.finish()?;
    Ok(CreateSequence {
        acks_to,
        offer,
        security_token,
    })
}

pub(super) fn encode_create_sequence_response(
    message: &CreateSequenceResponse,
) -> RmCoreResult<Bytes> {
    let mut w = Writer::new();
    w.id(&message.id)?.flag(message.accepted_offer);
    Ok(w.finish())
}

pub(super) fn decode_create_sequence_response(
    body: &Bytes,
) -> RmCoreResult<CreateSequenceResponse> {
    let mut r = Reader::new(body.clone(), "CreateSequenceResponse");
    let id = r.id()?;
    let accepted_offer = r.flag()?;
    r.finish()?;
    Ok(CreateSequenceResponse { id, accepted_offer })
}
