//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime helpers supporting the orchestrator."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

/// Simple async rate limiter that ensures deterministic loop intervals.
#[derive(Debug)]
pub struct RateLimiter {
    period: Duration,
    interval: tokio::time::Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { period, interval }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick and return the instant it was scheduled for.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

#[derive(Debug)]
struct SlotInner {
    name: &'static str,
    generation: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Holds at most one live delayed task of a given kind.
///
/// Every call to [`TaskSlot::schedule`] or [`TaskSlot::cancel`] bumps a generation
/// counter and aborts the previous task. Tasks receive a [`TaskToken`] and must
/// check [`TaskToken::is_current`] before each effect, under the same lock that
/// guards the state they mutate, so a superseded task can never write.
#[derive(Debug, Clone)]
pub struct TaskSlot {
    inner: Arc<SlotInner>,
}

/// Generation ticket handed to a scheduled task.
#[derive(Debug, Clone)]
pub struct TaskToken {
    generation: u64,
    slot: Arc<SlotInner>,
}

impl TaskToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `false` once the slot has been rescheduled or cancelled.
    pub fn is_current(&self) -> bool {
        self.slot.generation.load(Ordering::SeqCst) == self.generation
    }
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(SlotInner {
                name,
                generation: AtomicU64::new(0),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Replace any in-flight task with the future produced by `task`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, task: F) -> u64
    where
        F: FnOnce(TaskToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.inner.handle.lock();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = handle.take() {
            previous.abort();
        }
        let token = TaskToken {
            generation,
            slot: self.inner.clone(),
        };
        *handle = Some(tokio::spawn(task(token)));
        trace!(slot = self.inner.name, generation, "task scheduled");
        generation
    }

    /// Invalidate and abort the in-flight task. Returns `true` if one was still running.
    pub fn cancel(&self) -> bool {
        let mut handle = self.inner.handle.lock();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let was_pending = match handle.take() {
            Some(previous) => {
                let pending = !previous.is_finished();
                previous.abort();
                pending
            }
            None => false,
        };
        if was_pending {
            trace!(slot = self.inner.name, generation, "task cancelled");
        }
        was_pending
    }

    pub fn is_pending(&self) -> bool {
        self.inner
            .handle
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}
