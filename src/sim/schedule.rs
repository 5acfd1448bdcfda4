//! Periodic task scheduling with cancellable handles.
//!
//! Every subsystem and the aggregator own a [`Schedule`]. Starting it spawns a
//! tokio task that calls [`Runnable::on_run`] once per interval; stopping it
//! cancels that task and waits for it to finish, so no tick can still be
//! running (or start) once [`Schedule::stop`] has returned.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Work performed on every tick of a [`Schedule`].
#[async_trait]
pub trait Runnable: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Executes one tick. Errors are logged by the scheduler, which keeps running.
    async fn on_run(&self) -> Result<()>;
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A restartable periodic schedule.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
///
/// use async_trait::async_trait;
/// use prosumer_sim::error::Result;
/// use prosumer_sim::sim::schedule::{Runnable, Schedule};
///
/// struct Counter(AtomicUsize);
///
/// #[async_trait]
/// impl Runnable for Counter {
///     fn name(&self) -> String {
///         "counter".into()
///     }
///
///     async fn on_run(&self) -> Result<()> {
///         self.0.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let counter = Arc::new(Counter(AtomicUsize::new(0)));
/// let schedule = Schedule::new(Duration::from_millis(10));
/// schedule.start(counter.clone());
/// tokio::time::sleep(Duration::from_millis(35)).await;
/// schedule.stop().await;
///
/// let ticks = counter.0.load(Ordering::SeqCst);
/// assert!(ticks >= 1);
/// tokio::time::sleep(Duration::from_millis(30)).await;
/// assert_eq!(counter.0.load(Ordering::SeqCst), ticks);
/// # }
/// ```
pub struct Schedule {
    every: Duration,
    running: Mutex<Option<RunningTask>>,
}

impl Schedule {
    /// Creates an idle schedule ticking every `every` once started.
    ///
    /// A zero interval is bumped to one millisecond.
    pub fn new(every: Duration) -> Self {
        Self {
            every: every.max(Duration::from_millis(1)),
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.every
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Starts ticking `target`; the first tick fires immediately.
    ///
    /// Returns `false` (and does nothing) if already running.
    /// Must be called from within a tokio runtime.
    pub fn start<R: Runnable>(&self, target: Arc<R>) -> bool {
        let mut running = self.lock();
        if running.is_some() {
            tracing::debug!(entity = %target.name(), "schedule already running");
            return false;
        }

        let cancel = CancellationToken::new();
        tracing::debug!(entity = %target.name(), every = ?self.every, "schedule started");
        let handle = tokio::spawn(run_loop(self.every, target, cancel.clone()));
        *running = Some(RunningTask { cancel, handle });
        true
    }

    /// Stops ticking and waits for an in-flight tick to finish.
    ///
    /// Returns `false` if the schedule was not running. Safe to call
    /// concurrently; only the first caller performs the shutdown.
    pub async fn stop(&self) -> bool {
        let task = self.lock().take();
        let Some(task) = task else {
            tracing::debug!("stop requested on idle schedule");
            return false;
        };

        task.cancel.cancel();
        if let Err(error) = task.handle.await {
            if error.is_panic() {
                tracing::warn!(%error, "scheduled task panicked");
            }
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<RunningTask>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Schedule {
    fn drop(&mut self) {
        if let Some(task) = self.lock().take() {
            task.cancel.cancel();
        }
    }
}

async fn run_loop<R: Runnable>(every: Duration, target: Arc<R>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(error) = target.on_run().await {
                    tracing::warn!(entity = %target.name(), %error, "tick failed");
                }
            }
        }
    }
    tracing::debug!(entity = %target.name(), "schedule stopped");
}
