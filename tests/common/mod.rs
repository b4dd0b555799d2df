//! Shared test helpers: an in-process service that speaks the protocol.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use wsrm_tokio::protocol::{
    CloseSequenceResponse, ControlMessage, CreateSequenceResponse, SequenceAcknowledgementHeader,
    SequenceHeader, TerminateSequenceResponse,
};
use wsrm_tokio::{
    ClientSession, Envelope, ProtocolCommunicator, ProtocolVersion, Result, RmConfig, RmError,
    SequenceId, SequenceManager,
};

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Take one unit from a failure budget. `true` if the budget was non-zero.
fn take(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Default)]
struct Bindings {
    /// Sequence the client sends on; the service receives it
    client_outbound: Option<SequenceId>,
    /// Offered sequence the service answers on
    service_outbound: Option<SequenceId>,
}

#[derive(Debug)]
struct Inner {
    version: ProtocolVersion,
    sequences: SequenceManager,
    bindings: Mutex<Bindings>,
    received: Mutex<Vec<(String, Envelope)>>,

    create_attempts: AtomicU32,
    create_failures: AtomicU32,
    corrupt_create_response: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    application_losses: AtomicU32,
    losses_after_delivery: AtomicU32,
    failing_actions: Mutex<HashSet<String>>,
    acknowledge: AtomicBool,
    accept_offer: AtomicBool,
    request_acks: AtomicBool,
}

/// Plays the service side of WS-RM for one client session.
///
/// Application actions are echoed back with `Response` appended; actions
/// ending in `OneWay` get no response. Failure injection covers the
/// handshake, application messages, and any control action.
#[derive(Debug, Clone)]
pub struct LoopbackService {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl LoopbackService {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            inner: Arc::new(Inner {
                version,
                sequences: SequenceManager::new(),
                bindings: Mutex::new(Bindings::default()),
                received: Mutex::new(Vec::new()),
                create_attempts: AtomicU32::new(0),
                create_failures: AtomicU32::new(0),
                corrupt_create_response: AtomicBool::new(false),
                create_delay: Mutex::new(None),
                application_losses: AtomicU32::new(0),
                losses_after_delivery: AtomicU32::new(0),
                failing_actions: Mutex::new(HashSet::new()),
                acknowledge: AtomicBool::new(true),
                accept_offer: AtomicBool::new(true),
                request_acks: AtomicBool::new(false),
            }),
        }
    }

    // -- Failure injection --

    pub fn fail_create_sequence(&self, times: u32) {
        self.inner.create_failures.store(times, Ordering::SeqCst);
    }

    pub fn corrupt_create_response(&self) {
        self.inner.corrupt_create_response.store(true, Ordering::SeqCst);
    }

    pub fn delay_create_sequence(&self, delay: Duration) {
        *lock(&self.inner.create_delay) = Some(delay);
    }

    /// Lose the next `times` application requests before the service sees them.
    pub fn lose_requests(&self, times: u32) {
        self.inner.application_losses.store(times, Ordering::SeqCst);
    }

    /// Deliver the next `times` application requests but lose the responses.
    pub fn lose_responses(&self, times: u32) {
        self.inner.losses_after_delivery.store(times, Ordering::SeqCst);
    }

    pub fn fail_action(&self, action: &str) {
        lock(&self.inner.failing_actions).insert(action.to_string());
    }

    pub fn set_acknowledge(&self, enabled: bool) {
        self.inner.acknowledge.store(enabled, Ordering::SeqCst);
    }

    pub fn set_accept_offer(&self, enabled: bool) {
        self.inner.accept_offer.store(enabled, Ordering::SeqCst);
    }

    /// Ask the client for acknowledgements on every application response.
    pub fn set_request_acks(&self, enabled: bool) {
        self.inner.request_acks.store(enabled, Ordering::SeqCst);
    }

    // -- Inspection --

    pub fn version(&self) -> ProtocolVersion {
        self.inner.version
    }

    pub fn sequences(&self) -> &SequenceManager {
        &self.inner.sequences
    }

    pub fn create_attempts(&self) -> u32 {
        self.inner.create_attempts.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<(String, Envelope)> {
        lock(&self.inner.received).clone()
    }

    pub fn received_actions(&self) -> Vec<String> {
        self.received().into_iter().map(|(a, _)| a).collect()
    }

    pub fn count_action(&self, action: &str) -> usize {
        self.received().iter().filter(|(a, _)| a == action).count()
    }

    /// Application envelopes that reached the service, in arrival order
    pub fn application_requests(&self) -> Vec<Envelope> {
        let version = self.inner.version;
        self.received()
            .into_iter()
            .filter(|(a, _)| !version.is_protocol_action(a))
            .map(|(_, e)| e)
            .collect()
    }

    /// Message numbers of the application envelopes that reached the service
    pub fn application_numbers(&self) -> Vec<u64> {
        let codec = self.inner.version.codec();
        self.application_requests()
            .iter()
            .filter_map(|e| codec.read_sequence(&e.headers).ok().flatten())
            .map(|h| h.message_number)
            .collect()
    }

    pub fn client_outbound(&self) -> Option<SequenceId> {
        lock(&self.inner.bindings).client_outbound.clone()
    }

    pub fn service_outbound(&self) -> Option<SequenceId> {
        lock(&self.inner.bindings).service_outbound.clone()
    }

    // -- Protocol handling --

    fn acknowledgement(&self, envelope: &mut Envelope) -> Result<()> {
        if !self.inner.acknowledge.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(id) = self.client_outbound() else {
            return Ok(());
        };
        let Ok(ranges) = self.inner.sequences.acknowledged_ranges(&id) else {
            return Ok(());
        };
        self.inner.version.codec().write_acknowledgement(
            &mut envelope.headers,
            &SequenceAcknowledgementHeader {
                id,
                ranges,
                final_ack: false,
            },
        )?;
        Ok(())
    }

    fn control_response(&self, message: ControlMessage) -> Result<Envelope> {
        let codec = self.inner.version.codec();
        let mut envelope = Envelope::new();
        envelope.set_action(codec.control_action(&message)?);
        envelope.body = codec.encode_control(&message)?;
        Ok(envelope)
    }

    fn ack_response(&self) -> Result<Envelope> {
        let mut envelope = Envelope::new();
        envelope.set_action(self.inner.version.actions().sequence_acknowledgement);
        self.acknowledgement(&mut envelope)?;
        Ok(envelope)
    }

    async fn create_sequence(&self, envelope: &Envelope, action: &str) -> Result<Option<Envelope>> {
        self.inner.create_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.inner.create_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if take(&self.inner.create_failures) {
            return Err(RmError::communication("injected CreateSequence failure"));
        }
        if self.inner.corrupt_create_response.load(Ordering::SeqCst) {
            let mut response = Envelope::new();
            response.set_action(self.inner.version.actions().create_sequence_response);
            response.body = bytes::Bytes::from_static(b"\xff");
            return Ok(Some(response));
        }

        let codec = self.inner.version.codec();
        let ControlMessage::CreateSequence(request) = codec.decode_control(action, &envelope.body)?
        else {
            return Err(RmError::protocol("expected CreateSequence"));
        };

        let id = self.inner.sequences.generate_id();
        self.inner.sequences.create(id.clone())?;
        let accepted_offer = match request.offer {
            Some(offer) if self.inner.accept_offer.load(Ordering::SeqCst) => {
                self.inner.sequences.create(offer.clone())?;
                lock(&self.inner.bindings).service_outbound = Some(offer);
                true
            }
            _ => false,
        };
        lock(&self.inner.bindings).client_outbound = Some(id.clone());

        self.control_response(ControlMessage::CreateSequenceResponse(CreateSequenceResponse {
            id,
            accepted_offer,
        }))
        .map(Some)
    }

    fn application(&self, envelope: &Envelope, action: &str) -> Result<Option<Envelope>> {
        let codec = self.inner.version.codec();
        if let Some(header) = codec.read_sequence(&envelope.headers)? {
            self.inner.sequences.receive(&header.id, header.message_number)?;
        }
        if take(&self.inner.losses_after_delivery) {
            return Err(RmError::communication("injected response loss"));
        }
        if action.ends_with("OneWay") {
            return Ok(None);
        }

        let mut response = Envelope::with_body(format!("{action}Response"), envelope.body.clone());
        if let Some(id) = self.service_outbound() {
            let number = self.inner.sequences.next_message_number(&id)?;
            codec.write_sequence(&mut response.headers, &SequenceHeader::new(id.clone(), number))?;
            if self.inner.request_acks.load(Ordering::SeqCst) {
                codec.write_ack_requested(
                    &mut response.headers,
                    &wsrm_tokio::protocol::AckRequestedHeader {
                        id,
                        message_number: Some(number),
                    },
                )?;
            }
        }
        self.acknowledgement(&mut response)?;
        Ok(Some(response))
    }

    async fn handle(&self, envelope: Envelope, action: &str) -> Result<Option<Envelope>> {
        let version = self.inner.version;
        let actions = version.actions();
        let codec = version.codec();

        // Acknowledgements from the client for the service's own sequence.
        if let Some(ack) = codec.read_acknowledgement(&envelope.headers)? {
            for r in &ack.ranges {
                let _ = self.inner.sequences.acknowledge_range(&ack.id, r.lower..=r.upper);
            }
        }

        if action == actions.create_sequence {
            self.create_sequence(&envelope, action).await
        } else if action == actions.ack_requested {
            self.ack_response().map(Some)
        } else if action == actions.sequence_acknowledgement {
            Ok(None)
        } else if action == actions.close_sequence {
            match version {
                ProtocolVersion::Rm10 => {
                    if let Some(header) = codec.read_sequence(&envelope.headers)? {
                        self.inner.sequences.receive(&header.id, header.message_number)?;
                        self.inner.sequences.close(&header.id)?;
                    }
                    self.ack_response().map(Some)
                }
                ProtocolVersion::Rm11 => {
                    let ControlMessage::CloseSequence(close) =
                        codec.decode_control(action, &envelope.body)?
                    else {
                        return Err(RmError::protocol("expected CloseSequence"));
                    };
                    self.inner.sequences.close(&close.id)?;
                    let mut response = self.control_response(ControlMessage::CloseSequenceResponse(
                        CloseSequenceResponse { id: close.id },
                    ))?;
                    self.acknowledgement(&mut response)?;
                    Ok(Some(response))
                }
            }
        } else if action == actions.terminate_sequence {
            let ControlMessage::TerminateSequence(terminate) =
                codec.decode_control(action, &envelope.body)?
            else {
                return Err(RmError::protocol("expected TerminateSequence"));
            };
            let _ = self.inner.sequences.terminate(&terminate.id);
            match version {
                ProtocolVersion::Rm10 => Ok(None),
                ProtocolVersion::Rm11 => self
                    .control_response(ControlMessage::TerminateSequenceResponse(
                        TerminateSequenceResponse { id: terminate.id },
                    ))
                    .map(Some),
            }
        } else {
            self.application(&envelope, action)
        }
    }
}

impl ProtocolCommunicator for LoopbackService {
    async fn send(&self, envelope: Envelope, action: &str) -> Result<Option<Envelope>> {
        if lock(&self.inner.failing_actions).contains(action) {
            return Err(RmError::communication(format!("injected failure: {action}")));
        }
        if !self.inner.version.is_protocol_action(action) && take(&self.inner.application_losses) {
            return Err(RmError::communication("injected request loss"));
        }
        lock(&self.inner.received).push((action.to_string(), envelope.clone()));
        self.handle(envelope, action).await
    }
}

// ── Session helpers ─────────────────────────────────────────────────────

pub type TestSession = ClientSession<LoopbackService>;

pub fn session_with(config: RmConfig, service: &LoopbackService) -> Arc<TestSession> {
    ClientSession::new(config, Arc::new(service.clone()), Arc::new(SequenceManager::new()))
        .expect("valid config")
}

pub fn echo(body: &str) -> Envelope {
    Envelope::with_body("urn:test:Echo", body.to_string())
}

pub fn notify(body: &str) -> Envelope {
    Envelope::with_body("urn:test:NotifyOneWay", body.to_string())
}

/// Header local names of an envelope, in order.
pub fn header_names(envelope: &Envelope) -> Vec<String> {
    envelope
        .headers
        .names()
        .into_iter()
        .map(str::to_string)
        .collect()
}
