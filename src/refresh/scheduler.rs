//! Background scheduling for manifest refresh.
//!
//! Provides fire-and-forget one-off work, a recurring timed task with an
//! explicit re-entrancy guard, and cancellation of the timed task. Work never
//! runs on the threads that post events.
//!
//! # Production Configuration
//!
//! The default refresh interval is 6 hours with up to 10 minutes of random
//! jitter, so a fleet of hosts started together does not hit the manifest
//! source in lockstep.

use log::{debug, info};
use parking_lot::Mutex;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Configuration for the scheduled refresh task.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between refresh operations
    pub refresh_interval: Duration,
    /// Upper bound of the random delay added to every interval
    pub jitter: Duration,
    /// Whether the scheduler is enabled
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(6 * 60 * 60),
            jitter: Duration::from_secs(10 * 60),
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Interval plus a random share of the jitter.
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.refresh_interval;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        self.refresh_interval + Duration::from_millis(extra)
    }
}

// ================================================================================================
// RE-ENTRANCY GUARD
// ================================================================================================

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

/// Idle → Running → Idle state machine around one run of a periodic task.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    state: AtomicU8,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    /// Moves Idle → Running. Returns false if a run is already in progress.
    pub fn try_acquire(&self) -> bool {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves Running → Idle.
    pub fn release(&self) {
        self.state.store(IDLE, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Acquires the guard and returns a token that releases it on drop.
    pub fn try_enter(self: &Arc<Self>) -> Option<GuardToken> {
        if self.try_acquire() {
            Some(GuardToken {
                guard: Arc::clone(self),
            })
        } else {
            None
        }
    }
}

/// Holds the guard in the Running state until dropped.
pub struct GuardToken {
    guard: Arc<ReentrancyGuard>,
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        self.guard.release();
    }
}

// ================================================================================================
// TIMED TASK
// ================================================================================================

/// Handle to a recurring task started with [`TaskScheduler::schedule_timed`].
pub struct TimedTaskHandle {
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
    guard: Arc<ReentrancyGuard>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    current_run: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TimedTaskHandle {
    /// Stops future runs. A run already in progress keeps going.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Stops future runs and waits for an in-flight run to finish.
    pub async fn cancel_and_wait(&self) {
        self.cancel();
        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            let _ = ticker.await;
        }
        let run = self.current_run.lock().take();
        if let Some(run) = run {
            let _ = run.await;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True while a run of the task is executing.
    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    fn abort(&self) {
        self.cancel();
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        if let Some(run) = self.current_run.lock().take() {
            run.abort();
        }
    }
}

// ================================================================================================
// SCHEDULER
// ================================================================================================

/// Runs background work on the tokio runtime.
#[derive(Default)]
pub struct TaskScheduler {
    pending: Mutex<Vec<JoinHandle<()>>>,
    timed: Mutex<Vec<Arc<TimedTaskHandle>>>,
    disposed: AtomicBool,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire-and-forget one-off work. Ignored after disposal.
    pub fn schedule<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_disposed() {
            debug!("Scheduler disposed, dropping one-off work");
            return;
        }
        let handle = tokio::spawn(work);
        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Runs `task` after `initial_delay` and then after every
    /// `config.next_delay()`. A tick that finds the previous run still in
    /// progress is skipped.
    ///
    /// # Example
    /// ```rust,no_run
    /// # use std::time::Duration;
    /// # use telemetry::refresh::{SchedulerConfig, TaskScheduler};
    /// # async fn demo() {
    /// let scheduler = TaskScheduler::new();
    /// let handle = scheduler.schedule_timed(Duration::ZERO, SchedulerConfig::default(), || async {
    ///     println!("refreshing");
    /// });
    /// handle.cancel_and_wait().await;
    /// # }
    /// ```
    pub fn schedule_timed<F, Fut>(
        &self,
        initial_delay: Duration,
        config: SchedulerConfig,
        task: F,
    ) -> Arc<TimedTaskHandle>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(self.is_disposed() || !config.enabled));
        let wake = Arc::new(Notify::new());
        let guard = Arc::new(ReentrancyGuard::new());
        let current_run: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));

        if !config.enabled {
            info!("Scheduled refresh is disabled, skipping");
        }

        let ticker = {
            let cancelled = cancelled.clone();
            let wake = wake.clone();
            let guard = guard.clone();
            let current_run = current_run.clone();
            tokio::spawn(async move {
                let mut delay = initial_delay;
                loop {
                    if cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = wake.notified() => {}
                    }
                    if cancelled.load(Ordering::Acquire) {
                        break;
                    }

                    match guard.try_enter() {
                        Some(token) => {
                            let run = task();
                            let handle = tokio::spawn(async move {
                                run.await;
                                drop(token);
                            });
                            *current_run.lock() = Some(handle);
                        }
                        None => debug!("Previous scheduled run still in progress, skipping tick"),
                    }
                    delay = config.next_delay();
                }
            })
        };

        let handle = Arc::new(TimedTaskHandle {
            cancelled,
            wake,
            guard,
            ticker: Mutex::new(Some(ticker)),
            current_run,
        });
        self.timed.lock().push(handle.clone());
        handle
    }

    /// Drops all pending and recurring work immediately.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for handle in self.pending.lock().drain(..) {
            handle.abort();
        }
        for timed in self.timed.lock().drain(..) {
            timed.abort();
        }
    }

    /// Stops recurring work and waits for in-flight runs to finish.
    pub async fn shutdown(&self) {
        self.disposed.store(true, Ordering::Release);
        let timed: Vec<_> = self.timed.lock().drain(..).collect();
        for handle in timed {
            handle.cancel_and_wait().await;
        }
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        for handle in pending {
            let _ = handle.await;
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
