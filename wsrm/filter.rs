//! Packet filters for exercising the protocol under message loss.
//!
//! A [`PacketFilter`] sees every request before it leaves the client and
//! every response before it reaches the session. Returning `Ok(None)` drops
//! the envelope, which the [`FilteredCommunicator`] reports as a
//! communication failure, exactly like a lost message.

use crate::communicator::ProtocolCommunicator;
use crate::error::{Result, RmError};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};
use wsrm_core::protocol::SecurityTokenReference;
use wsrm_core::{Envelope, ProtocolVersion, SequenceId};

pub trait PacketFilter: Send + Sync + 'static {
    /// Called before a request is sent to the service.
    fn filter_client_request(&self, request: Envelope) -> Result<Option<Envelope>>;

    /// Called before a response is handed back to the client.
    fn filter_server_response(&self, response: Envelope) -> Result<Option<Envelope>> {
        Ok(Some(response))
    }
}

/// Sequence identifier of the envelope's `Sequence` header under `version`.
///
/// A malformed header is logged and treated as absent.
pub fn sequence_id(version: ProtocolVersion, envelope: &Envelope) -> Option<SequenceId> {
    match version.codec().read_sequence(&envelope.headers) {
        Ok(header) => header.map(|h| h.id),
        Err(e) => {
            warn!(error = %e, "Unreadable Sequence header");
            None
        }
    }
}

/// Message number of the envelope's `Sequence` header under `version`.
pub fn message_number(version: ProtocolVersion, envelope: &Envelope) -> Option<u64> {
    match version.codec().read_sequence(&envelope.headers) {
        Ok(header) => header.map(|h| h.message_number),
        Err(e) => {
            warn!(error = %e, "Unreadable Sequence header");
            None
        }
    }
}

// ── FilteredCommunicator ────────────────────────────────────────────────

/// Runs filters around another communicator.
pub struct FilteredCommunicator<C> {
    inner: C,
    filters: Vec<Box<dyn PacketFilter>>,
}

impl<C: ProtocolCommunicator> FilteredCommunicator<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: impl PacketFilter) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: ProtocolCommunicator> ProtocolCommunicator for FilteredCommunicator<C> {
    async fn send(&self, envelope: Envelope, action: &str) -> Result<Option<Envelope>> {
        let mut request = envelope;
        for filter in &self.filters {
            request = match filter.filter_client_request(request)? {
                Some(request) => request,
                None => {
                    debug!(action, "Request dropped by filter");
                    return Err(RmError::communication(format!("request {action} lost")));
                }
            };
        }

        let Some(mut response) = self.inner.send(request, action).await? else {
            return Ok(None);
        };
        for filter in &self.filters {
            response = match filter.filter_server_response(response)? {
                Some(response) => response,
                None => {
                    debug!(action, "Response dropped by filter");
                    return Err(RmError::communication(format!("response to {action} lost")));
                }
            };
        }
        Ok(Some(response))
    }

    fn create_empty_control_envelope(&self, action: &str) -> Envelope {
        self.inner.create_empty_control_envelope(action)
    }

    fn register_model_request(&self, request: &Envelope) {
        self.inner.register_model_request(request);
    }

    async fn try_negotiate_secure_channel(&self) -> Result<Option<SecurityTokenReference>> {
        self.inner.try_negotiate_secure_channel().await
    }
}

// ── DropMessageFilter ───────────────────────────────────────────────────

/// Drops requests carrying chosen message numbers a chosen number of times.
#[derive(Debug)]
pub struct DropMessageFilter {
    version: ProtocolVersion,
    remaining: Mutex<HashMap<u64, u32>>,
}

impl DropMessageFilter {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            remaining: Mutex::new(HashMap::new()),
        }
    }

    /// Drop message `number` the next `times` times it is sent.
    pub fn drop_message(self, number: u64, times: u32) -> Self {
        self.remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(number, times);
        self
    }

    /// Drops still to be applied.
    pub fn pending_drops(&self) -> u32 {
        self.remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

impl PacketFilter for DropMessageFilter {
    fn filter_client_request(&self, request: Envelope) -> Result<Option<Envelope>> {
        let Some(number) = message_number(self.version, &request) else {
            return Ok(Some(request));
        };
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        match remaining.get_mut(&number) {
            Some(left) if *left > 0 => {
                *left -= 1;
                debug!(
                    sequence = ?sequence_id(self.version, &request),
                    number,
                    "Dropping request"
                );
                Ok(None)
            }
            _ => Ok(Some(request)),
        }
    }
}
