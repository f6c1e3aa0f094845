//! Periodic task scheduler with cancellation and live rescheduling.
//!
//! Each periodic job runs in its own Tokio task that sleeps until its
//! next deadline. Nothing busy-polls: an idle scheduler costs one parked
//! timer per job.
//!
//! # Rescheduling
//!
//! [`TaskHandle::set_period`] changes the interval of a running job
//! without tearing the task down. The pending deadline is pulled in to
//! `now + new_period` if that is sooner and otherwise left alone, so:
//!
//! - the gap between two runs never exceeds the interval that was in
//!   force when the earlier run finished, and
//! - the old and new schedules can never both fire, since only one task
//!   exists.
//!
//! ```text
//! period 30s ──run──────────────next(30s)
//! set_period(5s) at +10s           ↓
//!              ──run───────┬─run(+15s)──run(+20s)...
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// Smallest period a job may run at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Spawns periodic jobs onto the current Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler;

impl Scheduler {
    /// Runs `job` every `period`, first run one period from now.
    ///
    /// The job is awaited to completion before the next deadline is
    /// computed, so runs of one job never overlap. If a run overshoots
    /// its slot, missed ticks are skipped and the schedule resumes from
    /// the end of the run.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut job: F) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = clamp_period(name, period);
        let (period_tx, mut period_rx) = watch::channel(Some(period));
        let fired = Arc::new(AtomicU64::new(0));
        let fired_in_task = Arc::clone(&fired);

        debug!(task = name, period_ms = period.as_millis() as u64, "periodic task scheduled");

        // Anchored at the call, not at the task's first poll.
        let first = Instant::now() + period;
        let join = tokio::spawn(async move {
            let mut period = period;
            let mut next = first;
            loop {
                tokio::select! {
                    changed = period_rx.changed() => {
                        // Handle dropped: stop.
                        if changed.is_err() {
                            break;
                        }
                        let Some(new_period) = *period_rx.borrow_and_update() else {
                            break;
                        };
                        period = new_period;
                        next = next.min(Instant::now() + period);
                        debug!(
                            task = name,
                            period_ms = period.as_millis() as u64,
                            "periodic task rescheduled"
                        );
                    }
                    _ = time::sleep_until(next) => {
                        job().await;
                        let runs = fired_in_task.fetch_add(1, Ordering::Relaxed) + 1;
                        trace!(task = name, runs, "periodic task ran");
                        next = Instant::now() + period;
                    }
                }
            }
            debug!(task = name, "periodic task stopped");
        });

        TaskHandle {
            name,
            period_tx,
            fired,
            join,
        }
    }
}

fn clamp_period(name: &'static str, period: Duration) -> Duration {
    if period < MIN_PERIOD {
        warn!(task = name, ?period, "period below minimum, clamping");
        MIN_PERIOD
    } else {
        period
    }
}

/// Control handle for a periodic job.
///
/// Dropping the handle cancels the job, so a handle that is replaced or
/// goes out of scope can never leave a stray timer behind.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    period_tx: watch::Sender<Option<Duration>>,
    fired: Arc<AtomicU64>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The current period, or `None` once cancelled.
    pub fn period(&self) -> Option<Duration> {
        *self.period_tx.borrow()
    }

    /// Changes the period of the running job (see module docs).
    ///
    /// No-op on a cancelled handle.
    pub fn set_period(&self, period: Duration) {
        if self.is_cancelled() {
            return;
        }
        let period = clamp_period(self.name, period);
        self.period_tx.send_replace(Some(period));
    }

    /// Stops the job. A run already in progress finishes first.
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        self.period_tx.send_replace(None);
    }

    pub fn is_cancelled(&self) -> bool {
        self.period().is_none()
    }

    /// How many runs have completed.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Cancels the job and waits for its task to exit.
    pub async fn stopped(self) {
        self.cancel();
        if let Err(e) = self.join.await {
            if e.is_panic() {
                warn!(task = self.name, "periodic task panicked");
            }
        }
    }
}
