//! Scheduling collaborators.
//!
//! Windows never spawn threads themselves. Bucket rotation, maintenance and
//! asynchronous observer dispatch are handed to a [`TaskScheduler`], which may
//! run tasks on worker threads ([`DefaultTaskScheduler`]) or hold them until a
//! test fires them ([`ManualTaskScheduler`]). Windows are correct whether tasks
//! run inline on the submitting thread or on other threads.

use std::collections::VecDeque;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::error;

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SchedulerError};

/// A one-shot task.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A periodic task. Returning [`ControlFlow::Break`] cancels further runs.
pub type RepeatingTask = Arc<dyn Fn() -> ControlFlow<()> + Send + Sync + 'static>;

/// Runs delayed, periodic and immediate tasks.
///
/// Failures inside a task are the task's own concern; implementations must
/// not let a panicking task take the scheduler down.
pub trait TaskScheduler: Send + Sync + fmt::Debug {
    /// Runs `task` once at `at_ns` (nanoseconds since the epoch), or as soon as
    /// possible if that instant has passed.
    fn schedule_at(&self, at_ns: u64, task: Task);

    /// Runs `task` every `interval`, starting one interval from now.
    fn schedule_every(&self, interval: Duration, task: RepeatingTask);

    /// Runs `task` now, asynchronously.
    fn execute(&self, task: Task);
}

/// A scheduler backed by a multi-threaded `tokio` runtime.
///
/// Tasks run on the runtime's blocking pool so that window callbacks, which
/// take locks, never stall the timer workers. Dropping the scheduler shuts the
/// runtime down without waiting for in-flight tasks.
pub struct DefaultTaskScheduler {
    runtime: Option<Runtime>,
    clock: Arc<dyn Clock>,
    worker_threads: usize,
}

impl DefaultTaskScheduler {
    /// Worker threads used by [`DefaultTaskScheduler::new`].
    pub const DEFAULT_WORKER_THREADS: usize = 3;

    /// Builds a scheduler with [`Self::DEFAULT_WORKER_THREADS`] workers.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::RuntimeBuild`] if the runtime cannot start.
    pub fn new() -> Result<Self> {
        Self::with_worker_threads(Self::DEFAULT_WORKER_THREADS)
    }

    /// Builds a scheduler with `worker_threads` workers (at least one).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::RuntimeBuild`] if the runtime cannot start.
    pub fn with_worker_threads(worker_threads: usize) -> Result<Self> {
        let worker_threads = worker_threads.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("slidewin-scheduler")
            .enable_time()
            .build()
            .map_err(|source| SchedulerError::RuntimeBuild { source })?;
        Ok(Self {
            runtime: Some(runtime),
            clock: Arc::new(SystemClock),
            worker_threads,
        })
    }

    /// Uses `clock` to translate absolute instants into delays.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of timer worker threads.
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }
}

async fn run_blocking(task: Task) {
    if let Err(e) = tokio::task::spawn_blocking(task).await {
        error!(error = %e, "scheduled task failed");
    }
}

impl TaskScheduler for DefaultTaskScheduler {
    fn schedule_at(&self, at_ns: u64, task: Task) {
        let Some(runtime) = &self.runtime else {
            return;
        };
        let delay = Duration::from_nanos(at_ns.saturating_sub(self.clock.now_ns()));
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            run_blocking(task).await;
        });
    }

    fn schedule_every(&self, interval: Duration, task: RepeatingTask) {
        let Some(runtime) = &self.runtime else {
            return;
        };
        runtime.spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let run = Arc::clone(&task);
                match tokio::task::spawn_blocking(move || run()).await {
                    Ok(ControlFlow::Continue(())) => {}
                    Ok(ControlFlow::Break(())) => break,
                    Err(e) => error!(error = %e, "periodic task failed"),
                }
            }
        });
    }

    fn execute(&self, task: Task) {
        if let Some(runtime) = &self.runtime {
            runtime.spawn(run_blocking(task));
        }
    }
}

impl fmt::Debug for DefaultTaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultTaskScheduler")
            .field("worker_threads", &self.worker_threads)
            .field("running", &self.runtime.is_some())
            .finish()
    }
}

impl Drop for DefaultTaskScheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

struct ScheduledTask {
    at_ns: u64,
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    scheduled: Vec<ScheduledTask>,
    periodic: Vec<(Duration, RepeatingTask)>,
    executions: VecDeque<Task>,
    next_seq: u64,
}

impl ManualState {
    fn pop_earliest(&mut self, until_ns: u64) -> Option<Task> {
        let index = self
            .scheduled
            .iter()
            .enumerate()
            .filter(|(_, s)| s.at_ns <= until_ns)
            .min_by_key(|(_, s)| (s.at_ns, s.seq))
            .map(|(i, _)| i)?;
        Some(self.scheduled.swap_remove(index).task)
    }
}

/// A scheduler that only runs tasks when told to.
///
/// Tasks are run outside the scheduler's lock, so a task may submit further
/// tasks. Delayed tasks run in `(instant, submission)` order.
///
/// # Examples
///
/// ```rust
/// use slidewin::schedule::{ManualTaskScheduler, TaskScheduler};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let scheduler = ManualTaskScheduler::new();
/// let hits = Arc::new(AtomicUsize::new(0));
/// let h = Arc::clone(&hits);
/// scheduler.schedule_at(10, Box::new(move || { h.fetch_add(1, Ordering::SeqCst); }));
///
/// assert_eq!(scheduler.pending_scheduled(), 1);
/// assert!(scheduler.run_next_scheduled());
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct ManualTaskScheduler {
    state: Mutex<ManualState>,
}

impl ManualTaskScheduler {
    /// Creates a scheduler with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the earliest delayed task. Returns `false` if none was pending.
    pub fn run_next_scheduled(&self) -> bool {
        self.run_one_scheduled(u64::MAX)
    }

    /// Runs every delayed task due at or before `now_ns`, including tasks
    /// those tasks schedule. Returns how many ran.
    pub fn run_scheduled_until(&self, now_ns: u64) -> usize {
        let mut ran = 0;
        while self.run_one_scheduled(now_ns) {
            ran += 1;
        }
        ran
    }

    fn run_one_scheduled(&self, until_ns: u64) -> bool {
        let task = self.state.lock().pop_earliest(until_ns);
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs each periodic task once. Tasks that return
    /// [`ControlFlow::Break`] are cancelled. Returns how many ran.
    pub fn run_periodic(&self) -> usize {
        let tasks: Vec<RepeatingTask> = self
            .state
            .lock()
            .periodic
            .iter()
            .map(|(_, task)| Arc::clone(task))
            .collect();

        let mut cancelled = Vec::new();
        for task in &tasks {
            if task().is_break() {
                cancelled.push(Arc::clone(task));
            }
        }
        if !cancelled.is_empty() {
            self.state
                .lock()
                .periodic
                .retain(|(_, task)| !cancelled.iter().any(|c| Arc::ptr_eq(c, task)));
        }
        tasks.len()
    }

    /// Runs queued immediate tasks until the queue is empty. Returns how many
    /// ran.
    pub fn run_executions(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.state.lock().executions.pop_front();
            let Some(task) = task else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    /// Number of delayed tasks not yet run.
    pub fn pending_scheduled(&self) -> usize {
        self.state.lock().scheduled.len()
    }

    /// Earliest instant a pending delayed task is due.
    pub fn next_scheduled_at(&self) -> Option<u64> {
        self.state.lock().scheduled.iter().map(|s| s.at_ns).min()
    }

    /// Number of registered periodic tasks.
    pub fn periodic_count(&self) -> usize {
        self.state.lock().periodic.len()
    }

    /// Intervals of the registered periodic tasks, in registration order.
    pub fn periodic_intervals(&self) -> Vec<Duration> {
        self.state.lock().periodic.iter().map(|(d, _)| *d).collect()
    }

    /// Number of immediate tasks not yet run.
    pub fn pending_executions(&self) -> usize {
        self.state.lock().executions.len()
    }
}

impl TaskScheduler for ManualTaskScheduler {
    fn schedule_at(&self, at_ns: u64, task: Task) {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.scheduled.push(ScheduledTask { at_ns, seq, task });
    }

    fn schedule_every(&self, interval: Duration, task: RepeatingTask) {
        self.state.lock().periodic.push((interval, task));
    }

    fn execute(&self, task: Task) {
        self.state.lock().executions.push_back(task);
    }
}

impl fmt::Debug for ManualTaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualTaskScheduler")
            .field("scheduled", &state.scheduled.len())
            .field("periodic", &state.periodic.len())
            .field("executions", &state.executions.len())
            .finish()
    }
}
