//! Suspended requests awaiting retransmission.
//!
//! A caller whose send failed parks on a [`ResendHandle`]. The session's
//! resend task periodically calls [`ResendRegistry::resume_expired`], which
//! hands the stored envelope back to the oldest callers whose retransmission
//! interval has elapsed. The caller then resends through the normal call path.
//!
//! Dropping or cancelling a handle withdraws its registration; the sweep
//! discards such entries without resuming anyone.

use crate::error::{Result, RmError};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};
use wsrm_core::Envelope;

/// How a suspended caller is woken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resumption {
    /// Send this envelope again
    Resend(Envelope),
    /// The one-way message was acknowledged while parked; nothing to resend
    Acknowledged,
}

/// One registry entry.
#[derive(Debug)]
pub struct SuspendedRequest {
    id: u64,
    registered_at: Instant,
    envelope: Envelope,
    message_number: u64,
    one_way: bool,
    resume: oneshot::Sender<Resumption>,
}

impl SuspendedRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    pub fn message_number(&self) -> u64 {
        self.message_number
    }

    fn is_withdrawn(&self) -> bool {
        self.resume.is_closed()
    }
}

/// The caller's side of a registration. Resolves when the request is resumed.
///
/// Fails with [`RmError::SessionClosed`] if the registry is closed first.
#[derive(Debug)]
pub struct ResendHandle {
    id: u64,
    rx: oneshot::Receiver<Resumption>,
}

impl ResendHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Withdraw the registration; the sweep will skip it.
    pub fn cancel(mut self) {
        self.rx.close();
    }
}

impl Future for ResendHandle {
    type Output = Result<Resumption>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| RmError::SessionClosed))
    }
}

#[derive(Debug, Default)]
struct Queue {
    entries: VecDeque<SuspendedRequest>,
    next_id: u64,
    closed: bool,
}

/// FIFO of [`SuspendedRequest`]s ordered by registration time.
#[derive(Debug, Default)]
pub struct ResendRegistry {
    queue: Mutex<Queue>,
}

impl ResendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park a request. Fails only once the registry has been closed.
    pub fn register(
        &self,
        envelope: Envelope,
        message_number: u64,
        one_way: bool,
    ) -> Result<ResendHandle> {
        let (tx, rx) = oneshot::channel();
        let mut queue = self.lock();
        if queue.closed {
            return Err(RmError::SessionClosed);
        }
        queue.entries.retain(|r| !r.is_withdrawn());
        queue.next_id += 1;
        let id = queue.next_id;
        queue.entries.push_back(SuspendedRequest {
            id,
            registered_at: Instant::now(),
            envelope,
            message_number,
            one_way,
            resume: tx,
        });
        trace!(id, message_number, queued = queue.entries.len(), "Request parked for resend");
        Ok(ResendHandle { id, rx })
    }

    /// Resume, oldest first, every entry at least `interval` old at `now`.
    ///
    /// `is_acknowledged` is consulted for one-way entries only, outside the
    /// registry lock. Returns the number of callers woken.
    pub fn resume_expired(
        &self,
        now: Instant,
        interval: Duration,
        is_acknowledged: impl Fn(u64) -> bool,
    ) -> usize {
        let expired = {
            let mut queue = self.lock();
            let mut expired = Vec::new();
            while let Some(front) = queue.entries.front() {
                if !front.is_withdrawn()
                    && now.saturating_duration_since(front.registered_at) < interval
                {
                    break;
                }
                if let Some(entry) = queue.entries.pop_front() {
                    if !entry.is_withdrawn() {
                        expired.push(entry);
                    }
                }
            }
            expired
        };

        let mut resumed = 0;
        for entry in expired {
            let resumption = if entry.one_way && is_acknowledged(entry.message_number) {
                Resumption::Acknowledged
            } else {
                Resumption::Resend(entry.envelope)
            };
            if entry.resume.send(resumption).is_ok() {
                resumed += 1;
            }
        }
        if resumed > 0 {
            debug!(resumed, "Resumed suspended requests");
        }
        resumed
    }

    /// Withdraw one registration by id. Returns `false` if it is not queued.
    pub fn cancel(&self, id: u64) -> bool {
        let mut queue = self.lock();
        let before = queue.entries.len();
        queue.entries.retain(|r| r.id != id);
        queue.entries.len() != before
    }

    /// Refuse new registrations and fail every parked caller with
    /// [`RmError::SessionClosed`].
    pub fn close(&self) {
        let dropped = {
            let mut queue = self.lock();
            queue.closed = true;
            std::mem::take(&mut queue.entries)
        };
        if !dropped.is_empty() {
            debug!(pending = dropped.len(), "Resend registry closed with parked requests");
        }
    }

    /// Live (not withdrawn) registrations
    pub fn len(&self) -> usize {
        self.lock().entries.iter().filter(|r| !r.is_withdrawn()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
