//! Async job polling.
//!
//! Long-running platform operations are polled on a timer until they settle
//! or a deadline passes. Polls triggered by event handlers run as detached
//! tasks; the consumer that scheduled them never awaits the result.

use crate::config::PollConfig;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Answer of one status query.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    /// Still running.
    Pending,
    /// Finished with a result.
    Done(T),
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job reported completion.
    Success,
    /// The deadline passed first.
    Timeout,
    /// A status query failed.
    Error(String),
}

/// One in-flight poll.
#[derive(Debug, Clone)]
pub struct SyncJob {
    /// Resource the job is about.
    pub target: String,
    /// When polling started (monotonic).
    pub started_at: Instant,
    /// Time spent polling so far.
    pub elapsed: Duration,
    /// Number of status queries issued.
    pub queries: u32,
    /// Set once the job is terminal.
    pub outcome: Option<JobOutcome>,
}

impl SyncJob {
    /// Starts a job for a target.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            started_at: Instant::now(),
            elapsed: Duration::ZERO,
            queries: 0,
            outcome: None,
        }
    }

    /// Returns true once an outcome is recorded.
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    fn finish(&mut self, outcome: JobOutcome) {
        self.elapsed = self.started_at.elapsed();
        self.outcome = Some(outcome);
    }
}

/// Polls `query` until it reports [`PollStatus::Done`] or `timeout` elapses.
///
/// The first query is issued immediately, later ones on a fixed `interval`.
/// A failing query ends the poll with its error; retrying is the caller's
/// business. With a zero timeout exactly one query is issued.
pub async fn poll_until_done<T, F, Fut>(
    job: &mut SyncJob,
    interval: Duration,
    timeout: Duration,
    mut query: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<PollStatus<T>>>,
{
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        job.queries += 1;
        match query().await {
            Ok(PollStatus::Done(value)) => {
                job.finish(JobOutcome::Success);
                debug!(job = %job.target, queries = job.queries, elapsed = ?job.elapsed, "job done");
                return Ok(value);
            }
            Ok(PollStatus::Pending) => {}
            Err(e) => {
                job.finish(JobOutcome::Error(e.to_string()));
                return Err(e);
            }
        }

        job.elapsed = job.started_at.elapsed();
        if job.elapsed >= timeout {
            job.finish(JobOutcome::Timeout);
            return Err(SyncError::Timeout {
                target: job.target.clone(),
                elapsed: job.elapsed,
            });
        }

        ticker.tick().await;
    }
}

/// Runs detached polls on a runtime and tracks them for shutdown.
pub struct JobPoller {
    handle: Handle,
    config: PollConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobPoller {
    /// Creates a poller spawning onto the given runtime.
    pub fn new(handle: Handle, config: PollConfig) -> Self {
        Self {
            handle,
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Returns the polling configuration.
    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// Spawns a detached task. Callable from blocking threads.
    pub fn spawn_detached<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(self.handle.spawn(task));
    }

    /// Returns the number of detached tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    /// Waits for detached tasks up to `grace`, then aborts the rest.
    ///
    /// Returns the number of tasks aborted.
    pub async fn drain(&self, grace: Duration) -> usize {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;

        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
                aborted += 1;
            }
        }

        if aborted > 0 {
            warn!(aborted, "detached polls aborted at shutdown");
        }
        aborted
    }
}
