//! Periodic background tasks owned by one session.
//!
//! Every task runs on its own tokio task and awaits its body before the next
//! tick, so a task never overlaps with itself. Missed ticks are delayed rather
//! than bursted.

use crate::error::{Result, RmError};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct TaskSet {
    tasks: Vec<AbortHandle>,
    stopped: bool,
}

/// Owns the resend and ack-request timers of a session, plus ad-hoc probes.
#[derive(Debug, Default)]
pub struct ScheduledTaskManager {
    inner: Mutex<TaskSet>,
}

/// Cancellable handle to a task started with [`ScheduledTaskManager::start_task`].
#[derive(Debug)]
pub struct TaskHandle {
    handle: AbortHandle,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl ScheduledTaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TaskSet> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the two recurring session tasks. Each first fires one period
    /// after this call.
    pub fn start_tasks<R, RF, A, AF>(
        &self,
        resend_period: Duration,
        resend_task: R,
        ack_request_period: Duration,
        ack_request_task: A,
    ) -> Result<()>
    where
        R: Fn() -> RF + Send + Sync + 'static,
        RF: Future<Output = ()> + Send + 'static,
        A: Fn() -> AF + Send + Sync + 'static,
        AF: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.lock();
        if set.stopped {
            return Err(RmError::SessionClosed);
        }
        let now = Instant::now();
        set.tasks
            .push(spawn_periodic(now + resend_period, resend_period, resend_task));
        set.tasks.push(spawn_periodic(
            now + ack_request_period,
            ack_request_period,
            ack_request_task,
        ));
        debug!(
            resend_ms = resend_period.as_millis() as u64,
            ack_request_ms = ack_request_period.as_millis() as u64,
            "Session tasks started"
        );
        Ok(())
    }

    /// Start a repeating probe that first fires immediately.
    pub fn start_task<F, Fut>(&self, period: Duration, task: F) -> Result<TaskHandle>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.lock();
        if set.stopped {
            return Err(RmError::SessionClosed);
        }
        set.tasks.retain(|t| !t.is_finished());
        let handle = spawn_periodic(Instant::now(), period, task);
        set.tasks.push(handle.clone());
        Ok(TaskHandle { handle })
    }

    /// Cancel every task. Idempotent; later starts are refused.
    pub fn stop_all(&self) {
        let mut set = self.lock();
        if !set.stopped {
            trace!(tasks = set.tasks.len(), "Stopping session tasks");
        }
        set.stopped = true;
        for task in set.tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Tasks started and not yet finished or cancelled.
    pub fn active_tasks(&self) -> usize {
        self.lock().tasks.iter().filter(|t| !t.is_finished()).count()
    }
}

impl Drop for ScheduledTaskManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn spawn_periodic<F, Fut>(start: Instant, period: Duration, task: F) -> AbortHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            task().await;
        }
    })
    .abort_handle()
}
