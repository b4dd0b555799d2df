//! Counters for reliable sessions

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Per-session counters, updated lock-free from call paths and background tasks
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Application messages handed to the communicator, resends included
    pub messages_sent: AtomicU64,
    /// Retransmissions triggered by the resend task
    pub resends: AtomicU64,
    /// `AckRequested` headers attached or sent standalone
    pub ack_requests_sent: AtomicU64,
    /// `SequenceAcknowledgement` headers processed for the outbound sequence
    pub acknowledgements_received: AtomicU64,
    /// CreateSequence attempts, failed ones included
    pub handshake_attempts: AtomicU64,
}

impl SessionMetrics {
    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resend(&self) {
        self.resends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_request_sent(&self) {
        self.ack_requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acknowledgement_received(&self) {
        self.acknowledgements_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshake_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            resends: self.resends.load(Ordering::Relaxed),
            ack_requests_sent: self.ack_requests_sent.load(Ordering::Relaxed),
            acknowledgements_received: self.acknowledgements_received.load(Ordering::Relaxed),
            handshake_attempts: self.handshake_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of session counters at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub resends: u64,
    pub ack_requests_sent: u64,
    pub acknowledgements_received: u64,
    pub handshake_attempts: u64,
}

impl MetricsSnapshot {
    /// Share of sends that were retransmissions
    pub fn resend_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            0.0
        } else {
            self.resends as f64 / self.messages_sent as f64
        }
    }
}

/// Process-wide session counts
#[derive(Debug, Default)]
pub struct GlobalMetrics {
    pub sessions_created: AtomicU64,
    pub active_sessions: AtomicUsize,
}

impl GlobalMetrics {
    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

static GLOBAL_METRICS: std::sync::LazyLock<GlobalMetrics> =
    std::sync::LazyLock::new(GlobalMetrics::default);

pub fn global_metrics() -> &'static GlobalMetrics {
    &GLOBAL_METRICS
}

/// Format session counters for human-readable display
pub fn format_metrics(snapshot: &MetricsSnapshot) -> String {
    format!(
        "WS-RM Session Metrics:\n\
         Handshake attempts: {}\n\
         Messages: {} sent, {} resent (resend rate: {:.2}%)\n\
         Ack requests: {} sent, {} acknowledgements received",
        snapshot.handshake_attempts,
        snapshot.messages_sent,
        snapshot.resends,
        snapshot.resend_rate() * 100.0,
        snapshot.ack_requests_sent,
        snapshot.acknowledgements_received,
    )
}
