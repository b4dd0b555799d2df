//! Per-session reliable-messaging policy.
//!
//! [`RmConfig`] is fixed once a session is created; the session keeps its
//! own copy and never observes later changes.

use crate::error::{RmError, Result};
use std::time::Duration;
use wsrm_core::protocol::ANONYMOUS_ADDRESS;
use wsrm_core::ProtocolVersion;

// ── RmConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RmConfig {
    pub version: ProtocolVersion,
    /// Age at which a registered request is handed back for resending
    pub retransmission_interval: Duration,
    /// Minimum gap between two ack-requests on the outbound sequence
    pub ack_request_interval: Duration,
    /// Upper bound on the close-time wait for outstanding acknowledgements
    pub close_timeout: Duration,
    /// Probe period while waiting for acknowledgements during close
    pub close_poll_interval: Duration,
    /// Offer an inbound sequence during the handshake
    pub request_response_detected: bool,
    pub acks_to: String,
    /// Resends attempted per message at the call boundary
    pub max_resend_attempts: u32,
}

impl Default for RmConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::Rm11,
            retransmission_interval: Duration::from_millis(2000),
            ack_request_interval: Duration::from_millis(200),
            close_timeout: Duration::from_millis(3000),
            close_poll_interval: Duration::from_millis(50),
            request_response_detected: true,
            acks_to: ANONYMOUS_ADDRESS.to_string(),
            max_resend_attempts: 8,
        }
    }
}

// ── Builder methods ─────────────────────────────────────────────────────

impl RmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn retransmission_interval(mut self, interval: Duration) -> Self {
        self.retransmission_interval = interval;
        self
    }

    pub fn ack_request_interval(mut self, interval: Duration) -> Self {
        self.ack_request_interval = interval;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn close_poll_interval(mut self, interval: Duration) -> Self {
        self.close_poll_interval = interval;
        self
    }

    pub fn request_response_detected(mut self, enabled: bool) -> Self {
        self.request_response_detected = enabled;
        self
    }

    pub fn acks_to(mut self, address: impl Into<String>) -> Self {
        self.acks_to = address.into();
        self
    }

    pub fn max_resend_attempts(mut self, attempts: u32) -> Self {
        self.max_resend_attempts = attempts;
        self
    }

    // -- Validation --

    pub fn validate(&self) -> Result<()> {
        if self.retransmission_interval.is_zero() {
            return Err(RmError::config("Retransmission interval must be greater than 0"));
        }
        if self.ack_request_interval.is_zero() {
            return Err(RmError::config("Ack request interval must be greater than 0"));
        }
        if self.close_timeout.is_zero() || self.close_poll_interval.is_zero() {
            return Err(RmError::config("Close timeout and poll interval must be greater than 0"));
        }
        if self.max_resend_attempts == 0 {
            return Err(RmError::config("Max resend attempts must be greater than 0"));
        }
        if self.acks_to.is_empty() {
            return Err(RmError::config("AcksTo address must not be empty"));
        }
        Ok(())
    }
}

// ── Presets ──────────────────────────────────────────────────────────────

impl RmConfig {
    pub fn rm10() -> Self {
        Self::default().version(ProtocolVersion::Rm10)
    }

    pub fn rm11() -> Self {
        Self::default().version(ProtocolVersion::Rm11)
    }

    /// Short timers for tests driven by a paused clock.
    pub fn testing() -> Self {
        Self::default()
            .retransmission_interval(Duration::from_millis(100))
            .ack_request_interval(Duration::from_millis(20))
            .close_timeout(Duration::from_millis(300))
            .close_poll_interval(Duration::from_millis(10))
            .max_resend_attempts(4)
    }
}
