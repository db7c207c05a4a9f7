//! Periodic refresh loop with start/stop control and a coalescing trigger.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::orchestrator::RunSummary;
use crate::pipeline::PipelineError;

#[async_trait]
/// Work performed on every scheduler tick.
pub trait RefreshJob: Send + Sync {
    /// Run one refresh.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] when the refresh did not store a snapshot.
    async fn refresh(&self) -> Result<RunSummary, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Lifecycle state of the scheduler.
pub enum SchedulerState {
    /// Not started, or stopped.
    Idle,
    /// Loop active.
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of a manual trigger.
pub enum TriggerOutcome {
    /// A run was queued.
    Queued,
    /// A run was already queued; this request merged into it.
    AlreadyPending,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Misuse of the scheduler controls.
pub enum SchedulerError {
    /// The loop is not running.
    #[error("scheduler is not running")]
    NotRunning,
    /// `start` was called twice.
    #[error("scheduler is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Snapshot of the scheduler for status reporting.
pub struct SchedulerStatus {
    /// Lifecycle state.
    pub state: SchedulerState,
    /// Period between scheduled runs, in seconds.
    pub period_secs: u64,
    /// A refresh is executing right now.
    pub refreshing: bool,
    /// Start time of the most recent run.
    pub last_run: Option<DateTime<Utc>>,
    /// Summary of the most recent successful run.
    pub last_summary: Option<RunSummary>,
    /// Error of the most recent run, cleared by the next success.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct History {
    refreshing: bool,
    last_run: Option<DateTime<Utc>>,
    last_summary: Option<RunSummary>,
    last_error: Option<String>,
}

struct Control {
    cancel: CancellationToken,
    triggers: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// Runs a [`RefreshJob`] immediately on start and then once per period.
pub struct Scheduler {
    job: Arc<dyn RefreshJob>,
    period: Duration,
    control: Mutex<Option<Control>>,
    history: Arc<Mutex<History>>,
}

impl Scheduler {
    /// Idle scheduler for `job` with the given period.
    #[must_use]
    pub fn new(job: Arc<dyn RefreshJob>, period: Duration) -> Self {
        Self {
            job,
            period,
            control: Mutex::new(None),
            history: Arc::new(Mutex::new(History::default())),
        }
    }

    /// Spawn the loop. The first run starts right away.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyRunning`] if the loop is active.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut control = lock(&self.control);
        if control.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let (triggers, requests) = mpsc::channel(1);
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.job),
            self.period,
            Arc::clone(&self.history),
            cancel.clone(),
            requests,
        ));

        tracing::info!(period = ?self.period, "scheduler started");
        *control = Some(Control {
            cancel,
            triggers,
            task,
        });
        Ok(())
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// A refresh in flight is allowed to finish, so every extractor session it
    /// opened is closed and its result is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotRunning`] if the loop is not active.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let Some(control) = lock(&self.control).take() else {
            return Err(SchedulerError::NotRunning);
        };

        control.cancel.cancel();
        if let Err(error) = control.task.await {
            tracing::error!(error = %error, "scheduler loop ended abnormally");
        }
        tracing::info!("scheduler stopped");
        Ok(())
    }

    /// Ask for an extra run as soon as the current one, if any, finishes.
    ///
    /// Requests arriving while one is already queued are merged into it. The
    /// periodic deadline is not affected.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotRunning`] if the loop is not active.
    pub fn trigger(&self) -> Result<TriggerOutcome, SchedulerError> {
        let control = lock(&self.control);
        let Some(control) = control.as_ref() else {
            return Err(SchedulerError::NotRunning);
        };

        match control.triggers.try_send(()) {
            Ok(()) => Ok(TriggerOutcome::Queued),
            Err(TrySendError::Full(())) => Ok(TriggerOutcome::AlreadyPending),
            Err(TrySendError::Closed(())) => Err(SchedulerError::NotRunning),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        if lock(&self.control).is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Start time of the most recent run.
    #[must_use]
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        lock(&self.history).last_run
    }

    /// Full status for reporting.
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let state = self.state();
        let history = lock(&self.history);
        SchedulerStatus {
            state,
            period_secs: self.period.as_secs(),
            refreshing: history.refreshing,
            last_run: history.last_run,
            last_summary: history.last_summary.clone(),
            last_error: history.last_error.clone(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(control) = lock(&self.control).take() {
            control.cancel.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_loop(
    job: Arc<dyn RefreshJob>,
    period: Duration,
    history: Arc<Mutex<History>>,
    cancel: CancellationToken,
    mut requests: mpsc::Receiver<()>,
) {
    let mut next_due = Instant::now();

    loop {
        let scheduled = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = time::sleep_until(next_due) => true,
            Some(()) = requests.recv() => false,
        };

        if scheduled {
            next_due = Instant::now() + period;
        }
        tracing::debug!(scheduled, "refresh starting");

        let run = tokio::spawn(execute(Arc::clone(&job), Arc::clone(&history)));
        if let Err(error) = run.await {
            tracing::error!(error = %error, "refresh task panicked");
            let mut history = lock(&history);
            history.refreshing = false;
            history.last_error = Some(format!("refresh panicked: {error}"));
        }
    }
}

async fn execute(job: Arc<dyn RefreshJob>, history: Arc<Mutex<History>>) {
    {
        let mut history = lock(&history);
        history.refreshing = true;
        history.last_run = Some(Utc::now());
    }

    let result = job.refresh().await;

    let mut history = lock(&history);
    history.refreshing = false;
    match result {
        Ok(summary) => {
            tracing::info!(status = ?summary.status, "scheduled refresh finished");
            history.last_summary = Some(summary);
            history.last_error = None;
        }
        Err(error) => {
            tracing::error!(error = %error, "scheduled refresh failed");
            history.last_error = Some(error.to_string());
        }
    }
}
