//! The session's view of the transport.
//!
//! A [`ProtocolCommunicator`] sends one envelope and yields the peer's
//! response, if any. Sessions are generic over it, so any transport and any
//! test double can drive the protocol engine.

use crate::error::Result;
use std::future::Future;
use wsrm_core::protocol::SecurityTokenReference;
use wsrm_core::Envelope;

/// Request/response channel used by [`ClientSession`](crate::session::ClientSession).
///
/// `send` resolves to `Ok(None)` when the exchange has no response (one-way
/// messages, WS-RM 1.0 `TerminateSequence`). Transport failures should be
/// reported as [`RmError::Communication`](crate::RmError::Communication) so
/// that the session treats them as recoverable.
pub trait ProtocolCommunicator: Send + Sync + 'static {
    /// Send `envelope` under `action` and wait for the response.
    fn send<'a>(
        &'a self,
        envelope: Envelope,
        action: &'a str,
    ) -> impl Future<Output = Result<Option<Envelope>>> + Send + 'a;

    /// A fresh envelope for a protocol control message.
    fn create_empty_control_envelope(&self, action: &str) -> Envelope {
        let mut envelope = Envelope::new();
        envelope.set_action(action);
        envelope
    }

    /// Remember the first application request; control envelopes sent while
    /// opening the session may copy addressing details from it.
    fn register_model_request(&self, _request: &Envelope) {}

    /// Establish a secure conversation before the handshake, if configured.
    fn try_negotiate_secure_channel(
        &self,
    ) -> impl Future<Output = Result<Option<SecurityTokenReference>>> + Send {
        async { Ok(None) }
    }
}
