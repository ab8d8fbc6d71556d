//! Bounded, fixed-interval polling of a single job until it resolves.
//!
//! Each poller runs as its own tokio task and is owned by a [`PollerHandle`].
//! Dropping or cancelling the handle stops the timer; once deactivated no
//! hook fires, even if a check was in flight.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::models::generation::StatusView;
use crate::models::job::{JobPhase, DEFAULT_FAILURE_MESSAGE};

#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_consecutive_failures: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
            max_consecutive_failures: 10,
        }
    }
}

/// Why a poll ended without a result. Display text is user-facing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PollError {
    #[error("{0}")]
    JobFailed(String),

    #[error("Generation timed out. Check your Library in a few minutes.")]
    TimedOut { attempts: u32 },

    #[error("Connection lost. Please check your internet and try again.")]
    ConnectionLost { failures: u32, last_error: String },

    #[error("Job not found. Check your Library for recent generations.")]
    JobNotFound,

    #[error("Your session has expired. Reload the app and try again.")]
    SessionExpired,
}

/// A single failed status check. Transient failures count against the
/// connectivity budget; the others end the poll at once.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CheckError {
    #[error("Status request failed: {0}")]
    Transport(String),

    #[error("Status check failed: {0}")]
    Status(u16),

    #[error("Status response could not be decoded: {0}")]
    Decode(String),

    #[error("Job not found")]
    NotFound,

    #[error("Status check unauthorized: {0}")]
    Unauthorized(u16),
}

impl CheckError {
    /// Map a non-success HTTP status onto a check error.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => CheckError::NotFound,
            401 | 403 => CheckError::Unauthorized(status),
            other => CheckError::Status(other),
        }
    }

    pub fn is_transient(&self) -> bool {
        !matches!(self, CheckError::NotFound | CheckError::Unauthorized(_))
    }
}

/// Where a poller reads job status from.
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    async fn check(&self, job_id: &str) -> Result<StatusView, CheckError>;
}

pub type PollOutcome = Result<Value, PollError>;

type Completion = Box<dyn FnOnce(PollOutcome) + Send>;

/// Adapt separate success and error hooks into a single completion.
pub fn callbacks<C, E>(on_complete: C, on_error: E) -> impl FnOnce(PollOutcome) + Send + 'static
where
    C: FnOnce(Value) + Send + 'static,
    E: FnOnce(PollError) + Send + 'static,
{
    move |outcome| match outcome {
        Ok(result) => on_complete(result),
        Err(error) => on_error(error),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PollerState {
    Idle,
    Polling,
    Done,
    Errored,
    TimedOut,
    Cancelled,
}

impl PollerState {
    pub fn is_finished(self) -> bool {
        !matches!(self, PollerState::Idle | PollerState::Polling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollProgress {
    pub state: PollerState,
    pub attempts: u32,
    pub consecutive_failures: u32,
}

/// Starts pollers against one status source.
pub struct JobPoller<S> {
    source: Arc<S>,
    config: PollerConfig,
}

impl<S: StatusSource> JobPoller<S> {
    pub fn new(source: Arc<S>, config: PollerConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Begin polling `job_id`. `on_finish` is called at most once, and never
    /// after the returned handle has been cancelled or dropped.
    pub fn start<F>(&self, job_id: impl Into<String>, on_finish: F) -> PollerHandle
    where
        F: FnOnce(PollOutcome) + Send + 'static,
    {
        let job_id = job_id.into();
        let cancel = CancellationToken::new();
        let (progress, _) = watch::channel(PollProgress {
            state: PollerState::Idle,
            attempts: 0,
            consecutive_failures: 0,
        });
        let progress = Arc::new(progress);
        let completion: Arc<Mutex<Option<Completion>>> = Arc::new(Mutex::new(Some(Box::new(on_finish))));

        let run = PollRun {
            source: self.source.clone(),
            config: self.config.clone(),
            job_id: job_id.clone(),
            cancel: cancel.clone(),
            progress: progress.clone(),
            completion: completion.clone(),
        };
        let task = tokio::spawn(run.run());

        PollerHandle {
            job_id,
            cancel,
            progress,
            completion,
            task: Some(task),
        }
    }
}

struct PollRun<S> {
    source: Arc<S>,
    config: PollerConfig,
    job_id: String,
    cancel: CancellationToken,
    progress: Arc<watch::Sender<PollProgress>>,
    completion: Arc<Mutex<Option<Completion>>>,
}

impl<S: StatusSource> PollRun<S> {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempts = 0u32;
        let mut failures = 0u32;
        self.progress.send_modify(|p| p.state = PollerState::Polling);

        let (state, outcome) = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            attempts += 1;
            let checked = self.source.check(&self.job_id).await;
            if self.cancel.is_cancelled() {
                return;
            }

            match checked {
                Ok(view) => {
                    failures = 0;
                    match view.phase() {
                        JobPhase::Completed => {
                            break (PollerState::Done, Ok(view.result.unwrap_or(Value::Null)));
                        }
                        JobPhase::Failed => {
                            let message = view
                                .error
                                .filter(|e| !e.trim().is_empty())
                                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
                            break (PollerState::Errored, Err(PollError::JobFailed(message)));
                        }
                        phase => {
                            tracing::debug!(job_id = %self.job_id, attempt = attempts, phase = %phase, "Job not resolved yet");
                        }
                    }
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!(job_id = %self.job_id, attempt = attempts, error = %e, "Status check rejected");
                    let error = match e {
                        CheckError::NotFound => PollError::JobNotFound,
                        _ => PollError::SessionExpired,
                    };
                    break (PollerState::Errored, Err(error));
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(job_id = %self.job_id, attempt = attempts, failures, error = %e, "Status check failed");
                    if failures >= self.config.max_consecutive_failures {
                        break (
                            PollerState::Errored,
                            Err(PollError::ConnectionLost {
                                failures,
                                last_error: e.to_string(),
                            }),
                        );
                    }
                }
            }

            if attempts >= self.config.max_attempts {
                break (PollerState::TimedOut, Err(PollError::TimedOut { attempts }));
            }
            self.progress.send_modify(|p| {
                p.attempts = attempts;
                p.consecutive_failures = failures;
            });
        };

        self.finish(state, attempts, failures, outcome);
    }

    fn finish(&self, state: PollerState, attempts: u32, failures: u32, outcome: PollOutcome) {
        let Ok(mut slot) = self.completion.lock() else {
            return;
        };
        // cancellation takes the hook under the same lock
        if self.cancel.is_cancelled() {
            return;
        }
        self.progress.send_replace(PollProgress {
            state,
            attempts,
            consecutive_failures: failures,
        });
        tracing::info!(job_id = %self.job_id, attempts, state = %state, "Poller finished");
        // held across the call so a concurrent cancel waits for the hook
        if let Some(hook) = slot.take() {
            hook(outcome);
        }
    }
}

/// Owner of a running poller. Dropping it deactivates the poller.
pub struct PollerHandle {
    job_id: String,
    cancel: CancellationToken,
    progress: Arc<watch::Sender<PollProgress>>,
    completion: Arc<Mutex<Option<Completion>>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl PollerHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn progress(&self) -> PollProgress {
        *self.progress.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollProgress> {
        self.progress.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.progress().state.is_finished()
    }

    /// Stop polling. No hook fires after this returns; a hook already running
    /// is waited for. Hooks must not cancel their own poller.
    pub fn cancel(self) {
        drop(self);
    }

    /// Wait for the polling task to exit on its own.
    pub async fn join(mut self) -> PollProgress {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(job_id = %self.job_id, error = %e, "Poller task panicked");
            }
        }
        self.progress()
    }

    fn deactivate(&self) {
        self.cancel.cancel();
        let hook = match self.completion.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if hook.is_some() {
            self.progress.send_modify(|p| p.state = PollerState::Cancelled);
            tracing::debug!(job_id = %self.job_id, "Poller cancelled");
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Holds at most one active poller; activating a new job replaces the old.
#[derive(Default)]
pub struct PollerSlot {
    active: Option<PollerHandle>,
}

impl PollerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&mut self, handle: PollerHandle) {
        if let Some(previous) = self.active.replace(handle) {
            tracing::debug!(job_id = %previous.job_id(), "Replacing active poller");
        }
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    pub fn active_job(&self) -> Option<&str> {
        self.active.as_ref().map(PollerHandle::job_id)
    }

    pub fn progress(&self) -> Option<PollProgress> {
        self.active.as_ref().map(PollerHandle::progress)
    }
}
