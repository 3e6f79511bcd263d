//! Timer and clock ports
//!
//! Every delay in the engine (bot fallback, bot answer delay, settle delay and
//! the per-question timeout) goes through [`Scheduler::after`]. Production uses
//! [`TokioScheduler`]; tests drive [`ManualScheduler`] through virtual time.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Deferred unit of work run when a timer fires
pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        crate::utils::current_timestamp()
    }
}

/// Runs tasks after a delay
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed unless the returned handle is cancelled first
    fn after(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

#[derive(Debug, Default)]
struct TimerState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation handle for a scheduled task
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    state: Arc<TimerState>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running. Has no effect once the task has started.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        self.state.notify.notified().await;
    }
}

/// Scheduler backed by the tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let timer = handle.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if !timer.is_cancelled() {
                        task.await;
                    }
                }
                _ = timer.cancelled() => {
                    debug!("Timer cancelled before firing");
                }
            }
        });

        handle
    }
}

struct PendingTimer {
    due: Duration,
    seq: u64,
    handle: TimerHandle,
    task: TimerTask,
}

struct ManualState {
    elapsed: Duration,
    next_seq: u64,
    pending: Vec<PendingTimer>,
}

/// Deterministic scheduler and clock driven by explicit calls to [`ManualScheduler::advance`]
///
/// Due tasks run inline, in due-time order, on the caller's task. Tasks
/// scheduled while advancing run in the same call if they fall due before the
/// target time.
pub struct ManualScheduler {
    epoch: DateTime<Utc>,
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::starting_at(crate::utils::current_timestamp())
    }

    pub fn starting_at(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            state: Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                next_seq: 0,
                pending: Vec::new(),
            }),
        }
    }

    /// Virtual time elapsed since construction
    pub fn elapsed(&self) -> Duration {
        self.state
            .lock()
            .map(|state| state.elapsed)
            .unwrap_or_default()
    }

    /// Number of scheduled tasks that have not fired and were not cancelled
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .pending
                    .iter()
                    .filter(|t| !t.handle.is_cancelled())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Time until the earliest live timer fires
    pub fn next_due_in(&self) -> Option<Duration> {
        let state = self.state.lock().ok()?;
        state
            .pending
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .map(|t| t.due.saturating_sub(state.elapsed))
            .min()
    }

    /// Move virtual time forward, running every task that falls due
    pub async fn advance(&self, by: Duration) {
        let target = self.elapsed() + by;

        while let Some(timer) = self.pop_due(target) {
            if !timer.handle.is_cancelled() {
                timer.task.await;
            }
        }

        if let Ok(mut state) = self.state.lock() {
            if state.elapsed < target {
                state.elapsed = target;
            }
        }
    }

    /// Keep firing timers until none remain, up to `max_steps` of them
    pub async fn run_until_idle(&self, max_steps: usize) -> usize {
        let mut fired = 0;
        while fired < max_steps {
            match self.next_due_in() {
                Some(wait) => {
                    self.advance(wait).await;
                    fired += 1;
                }
                None => break,
            }
        }
        fired
    }

    fn pop_due(&self, target: Duration) -> Option<PendingTimer> {
        let mut state = self.state.lock().ok()?;
        state.pending.retain(|t| !t.handle.is_cancelled());

        let index = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= target)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;

        let timer = state.pending.swap_remove(index);
        if timer.due > state.elapsed {
            state.elapsed = timer.due;
        }
        Some(timer)
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn after(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::new();
        if let Ok(mut state) = self.state.lock() {
            let seq = state.next_seq;
            state.next_seq += 1;
            let due = state.elapsed + delay;
            state.pending.push(PendingTimer {
                due,
                seq,
                handle: handle.clone(),
                task,
            });
        }
        handle
    }
}

impl Clock for ManualScheduler {
    fn now(&self) -> DateTime<Utc> {
        let elapsed =
            chrono::Duration::from_std(self.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.epoch + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: Arc<AtomicUsize>) -> TimerTask {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_manual_scheduler_fires_in_order() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, secs) in [("late", 5), ("early", 1), ("middle", 3)] {
            let order = order.clone();
            scheduler.after(
                Duration::from_secs(secs),
                Box::pin(async move {
                    order.lock().unwrap().push(label);
                }),
            );
        }

        scheduler.advance(Duration::from_secs(2)).await;
        assert_eq!(*order.lock().unwrap(), vec!["early"]);

        scheduler.advance(Duration::from_secs(10)).await;
        assert_eq!(*order.lock().unwrap(), vec!["early", "middle", "late"]);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_manual_scheduler_cancellation() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = scheduler.after(Duration::from_secs(1), counting_task(counter.clone()));
        scheduler.after(Duration::from_secs(1), counting_task(counter.clone()));
        handle.cancel();

        assert_eq!(scheduler.pending_count(), 1);
        scheduler.advance(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_clock_tracks_virtual_time() {
        let scheduler = ManualScheduler::new();
        let start = scheduler.now();
        scheduler.advance(Duration::from_secs(30)).await;
        assert_eq!((scheduler.now() - start).num_seconds(), 30);
    }

    #[tokio::test]
    async fn test_run_until_idle() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.after(Duration::from_secs(4), counting_task(counter.clone()));
        scheduler.after(Duration::from_secs(9), counting_task(counter.clone()));

        let fired = scheduler.run_until_idle(10).await;
        assert_eq!(fired, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_tokio_scheduler_cancel() {
        let scheduler = TokioScheduler;
        let counter = Arc::new(AtomicUsize::new(0));

        let cancelled =
            scheduler.after(Duration::from_millis(20), counting_task(counter.clone()));
        scheduler.after(Duration::from_millis(20), counting_task(counter.clone()));
        cancelled.cancel();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
