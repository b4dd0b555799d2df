//! Client side of one reliable channel.
//!
//! A [`ClientSession`] binds an outbound sequence (messages this client
//! sends) and, when the service accepts the offer, an inbound sequence
//! (responses the service sends back). It opens both with a CreateSequence
//! handshake on first use, numbers and decorates every outgoing envelope,
//! interprets the protocol headers of every response, and runs two
//! background tasks: resend of parked requests and ack-request polling.
//!
//! ```text
//!  invoke ──► process_outgoing_packet ──► communicator.send ──► process_incoming_packet
//!                 │  Sequence                     │ recoverable failure
//!                 │  AckRequested (throttled)     ▼
//!                 │  SequenceAcknowledgement   ResendRegistry ◄── resend task
//!                 ▼
//!          initialize_if_necessary (once, under init lock)
//! ```

mod throttle;

use crate::communicator::ProtocolCommunicator;
use crate::config::RmConfig;
use crate::error::{Result, RmError};
use crate::metrics::{global_metrics, MetricsSnapshot, SessionMetrics};
use crate::resend::{ResendHandle, ResendRegistry, Resumption};
use crate::scheduler::ScheduledTaskManager;
use throttle::AckRequestThrottle;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use wsrm_core::protocol::{
    names, AckRequestedHeader, CloseSequence, ControlMessage, CreateSequence,
    SecurityTokenReference, SequenceAcknowledgementHeader, SequenceHeader, TerminateSequence,
};
use wsrm_core::{Envelope, HeaderCodec, ProtocolVersion, RmCoreResult, SequenceId, SequenceManager};

/// CreateSequence attempts before initialization gives up
pub const MAX_INITIATE_SESSION_ATTEMPTS: u32 = 3;

/// Lifecycle of a [`ClientSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Uninitialized = 0,
    Initializing = 1,
    Initialized = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Initialized,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Initialized => write!(f, "initialized"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Reliable session over a [`ProtocolCommunicator`].
///
/// Always held in an `Arc`; background tasks keep only a weak reference, so
/// dropping the last handle stops them.
pub struct ClientSession<C: ProtocolCommunicator> {
    config: RmConfig,
    codec: &'static dyn HeaderCodec,
    communicator: Arc<C>,
    sequences: Arc<SequenceManager>,

    outbound: OnceLock<SequenceId>,
    inbound: OnceLock<SequenceId>,
    state: AtomicU8,
    init_lock: tokio::sync::Mutex<()>,

    scheduler: ScheduledTaskManager,
    resend_registry: ResendRegistry,
    throttle: AckRequestThrottle,
    ack_owed: AtomicBool,
    model_request: Mutex<Option<Envelope>>,
    metrics: SessionMetrics,

    this: Weak<Self>,
}

impl<C: ProtocolCommunicator> fmt::Debug for ClientSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("version", &self.config.version)
            .field("state", &self.state())
            .field("outbound", &self.outbound.get())
            .field("inbound", &self.inbound.get())
            .finish()
    }
}

// ── Construction & accessors ────────────────────────────────────────────

impl<C: ProtocolCommunicator> ClientSession<C> {
    /// Create an uninitialized session. No message is sent until the first
    /// outgoing envelope.
    pub fn new(
        config: RmConfig,
        communicator: Arc<C>,
        sequences: Arc<SequenceManager>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        global_metrics().session_created();
        Ok(Arc::new_cyclic(|this| Self {
            codec: config.version.codec(),
            throttle: AckRequestThrottle::new(config.ack_request_interval),
            config,
            communicator,
            sequences,
            outbound: OnceLock::new(),
            inbound: OnceLock::new(),
            state: AtomicU8::new(SessionState::Uninitialized as u8),
            init_lock: tokio::sync::Mutex::new(()),
            scheduler: ScheduledTaskManager::new(),
            resend_registry: ResendRegistry::new(),
            ack_owed: AtomicBool::new(false),
            model_request: Mutex::new(None),
            metrics: SessionMetrics::default(),
            this: this.clone(),
        }))
    }

    pub fn config(&self) -> &RmConfig {
        &self.config
    }

    pub fn version(&self) -> ProtocolVersion {
        self.config.version
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) -> SessionState {
        SessionState::from_u8(self.state.swap(state as u8, Ordering::AcqRel))
    }

    pub fn outbound_sequence_id(&self) -> Option<SequenceId> {
        self.outbound.get().cloned()
    }

    pub fn inbound_sequence_id(&self) -> Option<SequenceId> {
        self.inbound.get().cloned()
    }

    pub fn communicator(&self) -> &Arc<C> {
        &self.communicator
    }

    pub fn sequence_manager(&self) -> &Arc<SequenceManager> {
        &self.sequences
    }

    pub fn scheduler(&self) -> &ScheduledTaskManager {
        &self.scheduler
    }

    pub fn resend_registry(&self) -> &ResendRegistry {
        &self.resend_registry
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The first application request seen by this session, if any.
    pub fn model_request(&self) -> Option<Envelope> {
        self.model_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn outbound_id(&self) -> Result<&SequenceId> {
        match self.outbound.get() {
            Some(id) => Ok(id),
            None if self.state() == SessionState::Closed => Err(RmError::SessionClosed),
            None => Err(RmError::protocol("Outbound sequence is not established")),
        }
    }

    /// `true` for envelopes carrying one of this version's protocol actions.
    pub fn is_protocol_message(&self, envelope: &Envelope) -> bool {
        envelope
            .action()
            .is_some_and(|a| self.config.version.is_protocol_action(a))
    }
}

// ── Initialization & handshake ──────────────────────────────────────────

impl<C: ProtocolCommunicator> ClientSession<C> {
    /// Run the handshake and start the background tasks, once.
    ///
    /// Concurrent callers wait on the init lock and observe the finished
    /// result. A failed initialization leaves the session uninitialized, so
    /// a later call tries again.
    pub async fn initialize_if_necessary(&self, model: &Envelope) -> Result<()> {
        match self.state() {
            SessionState::Initialized => return Ok(()),
            SessionState::Closed => return Err(RmError::SessionClosed),
            _ => {}
        }

        let _guard = self.init_lock.lock().await;
        match self.state() {
            SessionState::Initialized => return Ok(()),
            SessionState::Closed => return Err(RmError::SessionClosed),
            _ => {}
        }
        self.set_state(SessionState::Initializing);

        self.communicator.register_model_request(model);
        self.model_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| model.clone());

        let result = match self.open_session_with_retry().await {
            Ok(()) => self.start_background_tasks(),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.set_state(SessionState::Initialized);
                info!(
                    version = %self.config.version,
                    outbound = ?self.outbound.get(),
                    inbound = ?self.inbound.get(),
                    "Reliable session initialized"
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Uninitialized);
                Err(e)
            }
        }
    }

    async fn open_session_with_retry(&self) -> Result<()> {
        let token = self.communicator.try_negotiate_secure_channel().await?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.metrics.handshake_attempt();
            let offer = self
                .config
                .request_response_detected
                .then(|| self.sequences.generate_id());

            let err = match self.open_session(offer, token.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if !err.is_recoverable() || attempt >= MAX_INITIATE_SESSION_ATTEMPTS {
                error!(attempt, error = %err, "Create sequence failed, giving up");
                return Err(RmError::create_sequence_failure(attempt, err.to_string()));
            }
            warn!(attempt, error = %err, "Create sequence attempt failed, retrying");
        }
    }

    /// One CreateSequence exchange. Binds the outbound sequence and, if the
    /// offer was accepted, the inbound one.
    pub async fn open_session(
        &self,
        offered_inbound: Option<SequenceId>,
        security_token: Option<SecurityTokenReference>,
    ) -> Result<()> {
        let request = ControlMessage::CreateSequence(CreateSequence {
            acks_to: self.config.acks_to.clone(),
            offer: offered_inbound.clone(),
            security_token,
        });
        let response = self.send_control(&request).await?;
        let response = match self.expect_control_response(response, request.name())? {
            ControlMessage::CreateSequenceResponse(r) => r,
            other => {
                return Err(RmError::protocol(format!(
                    "Expected CreateSequenceResponse, got {}",
                    other.name()
                )))
            }
        };

        self.sequences.create(response.id.clone())?;
        if let Some(offered) = offered_inbound.filter(|_| response.accepted_offer) {
            if let Err(e) = self.sequences.create(offered.clone()) {
                let _ = self.sequences.terminate(&response.id);
                return Err(e.into());
            }
            let _ = self.inbound.set(offered);
        }
        if self.outbound.set(response.id.clone()).is_err() {
            return Err(RmError::protocol("Outbound sequence already bound"));
        }
        debug!(
            outbound = %response.id,
            accepted_offer = response.accepted_offer,
            "Sequence created"
        );
        Ok(())
    }

    fn start_background_tasks(&self) -> Result<()> {
        let resend_session = self.this.clone();
        let ack_session = self.this.clone();
        self.scheduler.start_tasks(
            self.config.retransmission_interval,
            move || {
                let session = resend_session.upgrade();
                async move {
                    if let Some(session) = session {
                        session.resend();
                    }
                }
            },
            self.config.ack_request_interval,
            move || {
                let session = ack_session.upgrade();
                async move {
                    if let Some(session) = session {
                        if let Err(e) = session.send_ack_requested().await {
                            warn!(error = %e, "Background ack request failed");
                        }
                    }
                }
            },
        )
    }
}

// ── Outgoing & incoming header processing ───────────────────────────────

impl<C: ProtocolCommunicator> ClientSession<C> {
    /// Initialize if needed, assign the next message number, and decorate.
    pub async fn process_outgoing_packet(&self, envelope: Envelope) -> Result<Envelope> {
        self.initialize_if_necessary(&envelope).await?;
        let outbound = self.outbound_id()?;
        let number = self.sequences.next_message_number(outbound)?;
        self.decorate(envelope, outbound, number)
    }

    /// Write the protocol headers for message `number`, in order: Sequence,
    /// AckRequested (if due), SequenceAcknowledgement (if an inbound sequence
    /// is bound). Re-decorating replaces the previous headers.
    fn decorate(
        &self,
        mut envelope: Envelope,
        outbound: &SequenceId,
        number: u64,
    ) -> Result<Envelope> {
        let ns = self.config.version.namespace_uri();
        envelope.headers.remove(ns, names::ACK_REQUESTED);
        envelope.headers.remove(ns, names::SEQUENCE_ACKNOWLEDGEMENT);

        self.codec.write_sequence(
            &mut envelope.headers,
            &SequenceHeader::new(outbound.clone(), number),
        )?;
        if self.claim_ack_request(outbound) {
            self.write_ack_requested(&mut envelope, outbound)?;
        }
        if let Some(inbound) = self.inbound.get() {
            self.write_acknowledgement(&mut envelope, inbound)?;
        }
        trace!(
            sequence = %outbound,
            number,
            headers = ?envelope.headers.names(),
            "Outgoing message decorated"
        );
        Ok(envelope)
    }

    /// Ack-request due: interval elapsed and outbound has unacknowledged
    /// numbers. Claims the throttle slot on success.
    fn claim_ack_request(&self, outbound: &SequenceId) -> bool {
        let now = Instant::now();
        self.throttle.is_elapsed(now)
            && self
                .sequences
                .has_pending_acknowledgements(outbound)
                .unwrap_or(false)
            && self.throttle.try_claim(now)
    }

    fn write_ack_requested(&self, envelope: &mut Envelope, outbound: &SequenceId) -> Result<()> {
        let header = AckRequestedHeader {
            id: outbound.clone(),
            message_number: self.sequences.last_message_number(outbound).ok(),
        };
        self.codec.write_ack_requested(&mut envelope.headers, &header)?;
        self.metrics.ack_request_sent();
        Ok(())
    }

    fn write_acknowledgement(&self, envelope: &mut Envelope, inbound: &SequenceId) -> Result<()> {
        let ranges = match self.sequences.acknowledged_ranges(inbound) {
            Ok(ranges) => ranges,
            Err(e) if e.is_unknown_sequence() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let header = SequenceAcknowledgementHeader {
            id: inbound.clone(),
            ranges,
            final_ack: false,
        };
        self.codec.write_acknowledgement(&mut envelope.headers, &header)?;
        self.ack_owed.store(false, Ordering::Release);
        Ok(())
    }

    /// Interpret the protocol headers of a received envelope, in order:
    /// Sequence, SequenceAcknowledgement, AckRequested.
    ///
    /// The Sequence header is skipped for responses to one-way requests and
    /// for protocol control messages.
    pub fn process_incoming_packet(
        &self,
        envelope: &Envelope,
        one_way_response: bool,
    ) -> Result<()> {
        let headers = &envelope.headers;
        if headers.is_empty() {
            return Ok(());
        }

        if !one_way_response && !self.is_protocol_message(envelope) {
            if let Some(header) = self.codec.read_sequence(headers)? {
                let Some(inbound) = self.inbound.get() else {
                    return Err(RmError::protocol(format!(
                        "Sequence header for {} but no inbound sequence is bound",
                        header.id
                    )));
                };
                if header.id != *inbound {
                    error!(
                        expected = %inbound,
                        actual = %header.id,
                        "Inbound sequence identifier mismatch"
                    );
                    return Err(RmError::identity_mismatch(inbound, &header.id));
                }
                let fresh = self.sequences.receive(inbound, header.message_number)?;
                trace!(
                    sequence = %inbound,
                    number = header.message_number,
                    fresh,
                    "Inbound message received"
                );
            }
        }

        if let Some(ack) = self.codec.read_acknowledgement(headers)? {
            let outbound = self.outbound_id()?;
            if ack.id != *outbound {
                error!(
                    expected = %outbound,
                    actual = %ack.id,
                    "Acknowledged sequence identifier mismatch"
                );
                return Err(RmError::identity_mismatch(outbound, &ack.id));
            }
            for range in &ack.ranges {
                tolerate_unknown(
                    self.sequences
                        .acknowledge_range(outbound, range.lower..=range.upper),
                )?;
            }
            self.metrics.acknowledgement_received();
            trace!(sequence = %outbound, ranges = ack.ranges.len(), "Acknowledgement processed");
        }

        if let Some(request) = self.codec.read_ack_requested(headers)? {
            if self.inbound.get() == Some(&request.id) {
                self.ack_owed.store(true, Ordering::Release);
                trace!(sequence = %request.id, "Peer requested acknowledgement");
            } else {
                debug!(sequence = %request.id, "AckRequested for unbound sequence ignored");
            }
        }
        Ok(())
    }
}

fn tolerate_unknown(result: RmCoreResult<()>) -> Result<()> {
    match result {
        Err(e) if e.is_unknown_sequence() => {
            debug!(error = %e, "Sequence already gone");
            Ok(())
        }
        other => other.map_err(RmError::from),
    }
}

// ── Call boundary & resend ──────────────────────────────────────────────

impl<C: ProtocolCommunicator> ClientSession<C> {
    /// Send one application request reliably and return the service response.
    ///
    /// Recoverable send failures park the decorated envelope in the resend
    /// registry; when the resend task hands it back, the same message number
    /// is sent again with fresh acknowledgement headers. A one-way message
    /// acknowledged while parked completes with `Ok(None)`.
    pub async fn invoke(&self, request: Envelope, one_way: bool) -> Result<Option<Envelope>> {
        let action = request
            .action()
            .map(str::to_owned)
            .ok_or_else(|| RmError::protocol("Application request has no action"))?;

        self.initialize_if_necessary(&request).await?;
        let outbound = self.outbound_id()?.clone();
        let number = self.sequences.next_message_number(&outbound)?;
        let mut envelope = self.decorate(request, &outbound, number)?;
        let mut resends = 0;

        loop {
            self.metrics.message_sent();
            let err = match self.communicator.send(envelope.clone(), &action).await {
                Ok(response) => {
                    if let Some(response) = &response {
                        self.process_incoming_packet(response, one_way)?;
                    }
                    return Ok(response);
                }
                Err(e) => e,
            };
            if !err.is_recoverable() || resends >= self.config.max_resend_attempts {
                warn!(sequence = %outbound, number, resends, error = %err, "Send failed");
                return Err(err);
            }

            debug!(sequence = %outbound, number, error = %err, "Send failed, parking for resend");
            let handle = self.register_for_resend(envelope, number, one_way)?;
            match handle.await? {
                Resumption::Resend(stored) => {
                    resends += 1;
                    self.metrics.resend();
                    envelope = self.decorate(stored, &outbound, number)?;
                }
                Resumption::Acknowledged => {
                    debug!(sequence = %outbound, number, "Parked one-way message acknowledged");
                    return Ok(None);
                }
            }
        }
    }

    /// Park `envelope` until the resend task hands it back.
    pub fn register_for_resend(
        &self,
        envelope: Envelope,
        message_number: u64,
        one_way: bool,
    ) -> Result<ResendHandle> {
        self.resend_registry.register(envelope, message_number, one_way)
    }

    /// Resend sweep: resume parked requests older than the retransmission
    /// interval. Returns the number of callers resumed.
    pub fn resend(&self) -> usize {
        let outbound = self.outbound.get();
        self.resend_registry.resume_expired(
            Instant::now(),
            self.config.retransmission_interval,
            |number| {
                outbound
                    .is_some_and(|id| self.sequences.is_acknowledged(id, number).unwrap_or(false))
            },
        )
    }

    /// Background ack activity: send a standalone AckRequested if one is
    /// due, and settle an acknowledgement the peer asked for.
    pub async fn send_ack_requested(&self) -> Result<()> {
        let outbound = self.outbound_id()?;
        let owed = self.ack_owed.swap(false, Ordering::AcqRel);
        let request_due = self.claim_ack_request(outbound);
        if !owed && !request_due {
            return Ok(());
        }

        let actions = self.config.version.actions();
        let action = if request_due {
            actions.ack_requested
        } else {
            actions.sequence_acknowledgement
        };
        let mut envelope = self.communicator.create_empty_control_envelope(action);
        if request_due {
            self.write_ack_requested(&mut envelope, outbound)?;
        }
        if let Some(inbound) = self.inbound.get() {
            self.write_acknowledgement(&mut envelope, inbound)?;
        }

        trace!(sequence = %outbound, request_due, owed, "Sending standalone ack control message");
        let response = match self.communicator.send(envelope, action).await {
            Ok(response) => response,
            Err(e) => {
                if owed {
                    self.ack_owed.store(true, Ordering::Release);
                }
                return Err(e);
            }
        };

        match response {
            Some(response) if response.is_fault() => Err(RmError::reliable_messaging(format!(
                "AckRequested faulted: {}",
                fault_text(&response)
            ))),
            Some(response) => self.process_incoming_packet(&response, false),
            None if request_due => Err(RmError::reliable_messaging("No response to AckRequested")),
            None => Ok(()),
        }
    }
}

fn fault_text(envelope: &Envelope) -> String {
    envelope
        .fault
        .as_ref()
        .map(|f| format!("{} ({})", f.reason, f.code))
        .unwrap_or_default()
}

// ── Control messages ────────────────────────────────────────────────────

impl<C: ProtocolCommunicator> ClientSession<C> {
    async fn send_control(&self, message: &ControlMessage) -> Result<Option<Envelope>> {
        let action = self.codec.control_action(message)?;
        let mut envelope = self.communicator.create_empty_control_envelope(action);
        envelope.body = self.codec.encode_control(message)?;
        trace!(action, "Sending {}", message.name());
        self.communicator.send(envelope, action).await
    }

    /// Validate a control response and decode its body. Piggy-backed
    /// acknowledgements on the response are processed first.
    fn expect_control_response(
        &self,
        response: Option<Envelope>,
        request: &'static str,
    ) -> Result<ControlMessage> {
        let response = response
            .ok_or_else(|| RmError::reliable_messaging(format!("No response to {request}")))?;
        if response.is_fault() {
            return Err(RmError::reliable_messaging(format!(
                "{request} faulted: {}",
                fault_text(&response)
            )));
        }
        self.process_incoming_packet(&response, false)?;
        let action = response
            .action()
            .ok_or_else(|| RmError::protocol(format!("{request} response has no action")))?;
        Ok(self.codec.decode_control(action, &response.body)?)
    }

    async fn close_outbound_sequence(&self, outbound: &SequenceId) -> Result<()> {
        match self.config.version {
            ProtocolVersion::Rm10 => {
                // LastMessage consumes a message number of its own.
                let action = self.config.version.actions().close_sequence;
                let number = self.sequences.next_message_number(outbound)?;
                let mut envelope = self.communicator.create_empty_control_envelope(action);
                self.codec.write_sequence(
                    &mut envelope.headers,
                    &SequenceHeader {
                        id: outbound.clone(),
                        message_number: number,
                        last_message: true,
                    },
                )?;
                self.write_ack_requested(&mut envelope, outbound)?;
                match self.communicator.send(envelope, action).await? {
                    Some(response) if response.is_fault() => Err(RmError::reliable_messaging(
                        format!("LastMessage faulted: {}", fault_text(&response)),
                    )),
                    Some(response) => self.process_incoming_packet(&response, true),
                    None => Ok(()),
                }
            }
            ProtocolVersion::Rm11 => {
                let request = ControlMessage::CloseSequence(CloseSequence {
                    id: outbound.clone(),
                    last_message_number: Some(self.sequences.last_message_number(outbound)?),
                });
                let response = self.send_control(&request).await?;
                match self.expect_control_response(response, request.name())? {
                    ControlMessage::CloseSequenceResponse(r) if r.id == *outbound => Ok(()),
                    ControlMessage::CloseSequenceResponse(r) => {
                        Err(RmError::identity_mismatch(outbound, &r.id))
                    }
                    other => Err(RmError::protocol(format!(
                        "Expected CloseSequenceResponse, got {}",
                        other.name()
                    ))),
                }
            }
        }
    }

    async fn terminate_outbound_sequence(&self, outbound: &SequenceId) -> Result<()> {
        let last = self.sequences.last_message_number(outbound).ok();
        match self.config.version {
            ProtocolVersion::Rm10 => {
                let request = ControlMessage::TerminateSequence(TerminateSequence {
                    id: outbound.clone(),
                    last_message_number: None,
                });
                if let Some(response) = self.send_control(&request).await? {
                    self.process_incoming_packet(&response, true)?;
                }
                Ok(())
            }
            ProtocolVersion::Rm11 => {
                let request = ControlMessage::TerminateSequence(TerminateSequence {
                    id: outbound.clone(),
                    last_message_number: last,
                });
                let response = self.send_control(&request).await?;
                match self.expect_control_response(response, request.name())? {
                    ControlMessage::TerminateSequenceResponse(r) if r.id == *outbound => Ok(()),
                    ControlMessage::TerminateSequenceResponse(r) => {
                        Err(RmError::identity_mismatch(outbound, &r.id))
                    }
                    other => Err(RmError::protocol(format!(
                        "Expected TerminateSequenceResponse, got {}",
                        other.name()
                    ))),
                }
            }
        }
    }
}

// ── Shutdown ────────────────────────────────────────────────────────────

impl<C: ProtocolCommunicator> ClientSession<C> {
    /// Wait until the outbound sequence has no unacknowledged numbers, or the
    /// close timeout expires. Returns `true` if everything was acknowledged.
    pub async fn wait_until_all_requests_acked_or_timeout(&self) -> bool {
        let Some(outbound) = self.outbound.get().cloned() else {
            return true;
        };
        let done = Arc::new(Notify::new());
        let probe = {
            let done = done.clone();
            let sequences = self.sequences.clone();
            self.scheduler
                .start_task(self.config.close_poll_interval, move || {
                    if !sequences
                        .has_pending_acknowledgements(&outbound)
                        .unwrap_or(false)
                    {
                        done.notify_one();
                    }
                    std::future::ready(())
                })
        };
        let probe = match probe {
            Ok(probe) => probe,
            Err(e) => {
                warn!(error = %e, "Could not start acknowledgement probe");
                return false;
            }
        };

        let acked = tokio::time::timeout(self.config.close_timeout, done.notified())
            .await
            .is_ok();
        probe.cancel();
        if !acked {
            info!(
                timeout_ms = self.config.close_timeout.as_millis() as u64,
                "Timed out waiting for outstanding acknowledgements"
            );
        }
        acked
    }

    /// Gracefully shut the session down. Never fails.
    ///
    /// Each step runs even if the previous one failed: close the outbound
    /// sequence remotely and locally, wait for outstanding acknowledgements,
    /// terminate it remotely and locally, retire the inbound sequence, then
    /// fail parked callers and stop the background tasks.
    pub async fn close(&self) {
        let _guard = self.init_lock.lock().await;
        let previous = self.set_state(SessionState::Closed);
        if previous == SessionState::Closed {
            return;
        }

        if let Some(outbound) = self.outbound.get() {
            if let Err(e) = self.close_outbound_sequence(outbound).await {
                warn!(sequence = %outbound, error = %e, "Closing outbound sequence failed");
            }
            log_local_step("close", outbound, self.sequences.close(outbound));

            self.wait_until_all_requests_acked_or_timeout().await;

            if let Err(e) = self.terminate_outbound_sequence(outbound).await {
                warn!(sequence = %outbound, error = %e, "Terminating outbound sequence failed");
            }
            log_local_step("terminate", outbound, self.sequences.terminate(outbound));
        }

        if let Some(inbound) = self.inbound.get() {
            if self.sequences.is_valid(inbound) {
                log_local_step("close", inbound, self.sequences.close(inbound));
                log_local_step("terminate", inbound, self.sequences.terminate(inbound));
            }
        }

        self.resend_registry.close();
        self.scheduler.stop_all();
        global_metrics().session_closed();
        info!(outbound = ?self.outbound.get(), "Reliable session closed");
    }
}

fn log_local_step(step: &str, id: &SequenceId, result: RmCoreResult<()>) {
    if let Err(e) = result {
        warn!(sequence = %id, step, error = %e, "Local sequence update failed");
    }
}

impl<C: ProtocolCommunicator> Drop for ClientSession<C> {
    fn drop(&mut self) {
        self.scheduler.stop_all();
        if self.state() != SessionState::Closed {
            global_metrics().session_closed();
        }
    }
}
