//! Generation orchestrator.
//!
//! Submits a job and follows it to a terminal state. With the push channel
//! up, the task is tracked from pushed updates; otherwise, and whenever the
//! push channel drops before the task finishes, the poller takes over.
//! Exactly one terminal transition is applied per generation.
//!
//! State is published on a watch channel. `history_version` moves on every
//! terminal transition so history views know to refresh.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use atelier_core::error::GENERIC_FAILURE_MESSAGE;
use atelier_core::task::UpdateOutcome;
use atelier_core::{
    ApiError, GenerationParams, Task, TaskId, TaskResult, TaskStatus, TrackError, ValidationError,
};

use crate::api::TaskApi;
use crate::poller::TaskPoller;
use crate::socket::SocketManager;

/// Where a generation stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Generating,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the in-flight task is being followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Push,
    Poll,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Poll => "poll",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationState {
    pub phase: Phase,
    pub task_id: Option<TaskId>,
    /// Set on success when the task produced an image.
    pub result_url: Option<String>,
    /// Set on failure.
    pub error: Option<String>,
    pub channel: Option<Channel>,
    pub history_version: u64,
}

impl GenerationState {
    /// Back to idle, keeping the history counter.
    fn cleared(&self) -> Self {
        Self {
            history_version: self.history_version,
            ..Self::default()
        }
    }
}

/// Why `generate` did not run to a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("a generation is already in progress")]
    Busy,
    #[error("generation cancelled")]
    Cancelled,
}

/// Drives generations. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct ActiveRun {
    run: u64,
    abort: AbortHandle,
}

struct Inner {
    api: Arc<dyn TaskApi>,
    socket: SocketManager,
    poller: TaskPoller,
    push_timeout: Duration,
    state: watch::Sender<GenerationState>,
    run_seq: AtomicU64,
    active: Mutex<Option<ActiveRun>>,
}

impl Orchestrator {
    /// `push_timeout` bounds how long a pushed task may go without a
    /// terminal update before the poller takes over.
    pub fn new(
        api: Arc<dyn TaskApi>,
        socket: SocketManager,
        poller: TaskPoller,
        push_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(GenerationState::default());
        Self {
            inner: Arc::new(Inner {
                api,
                socket,
                poller,
                push_timeout,
                state,
                run_seq: AtomicU64::new(0),
                active: Mutex::new(None),
            }),
        }
    }

    /// Submit `params` and follow the task until it is terminal.
    ///
    /// Invalid parameters and a generation already in flight are rejected
    /// without touching state or the backend. Dropping the returned future
    /// cancels the generation.
    pub async fn generate(&self, params: GenerationParams) -> Result<GenerationState, GenerateError> {
        params.validate()?;

        let inner = &self.inner;
        let mut run = 0;
        let began = inner.state.send_if_modified(|s| {
            if s.phase == Phase::Generating {
                return false;
            }
            run = inner.run_seq.fetch_add(1, Ordering::SeqCst) + 1;
            *s = GenerationState {
                phase: Phase::Generating,
                ..s.cleared()
            };
            true
        });
        if !began {
            tracing::debug!("generate ignored; a generation is in progress");
            return Err(GenerateError::Busy);
        }

        let tracker = inner.clone();
        let handle = tokio::spawn(async move {
            let outcome = tracker.track(run, params).await;
            tracker.finish(run, outcome);
        });
        *lock(&inner.active) = Some(ActiveRun {
            run,
            abort: handle.abort_handle(),
        });

        let mut guard = CancelOnDrop {
            inner,
            run,
            armed: true,
        };
        let joined = handle.await;
        guard.armed = false;
        inner.clear_active(run);

        match joined {
            Ok(()) => Ok(self.state()),
            Err(e) if e.is_cancelled() => Err(GenerateError::Cancelled),
            Err(e) => {
                tracing::error!(error = %e, "generation task panicked");
                inner.finish(
                    run,
                    Err(TrackError::Api(ApiError::Transport(e.to_string()))),
                );
                Ok(self.state())
            }
        }
    }

    /// Stop the in-flight generation and return to idle. Unsubscribes from
    /// the push channel and stops polling. Returns `false` if nothing was
    /// in flight.
    pub fn cancel(&self) -> bool {
        let run = self.inner.run_seq.load(Ordering::SeqCst);
        self.inner.cancel_run(run)
    }

    /// Return from a terminal phase to idle. `history_version` is kept.
    pub fn reset(&self) -> bool {
        self.inner.state.send_if_modified(|s| {
            if !s.phase.is_terminal() {
                return false;
            }
            *s = s.cleared();
            true
        })
    }

    pub fn state(&self) -> GenerationState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<GenerationState> {
        self.inner.state.subscribe()
    }

    pub fn socket(&self) -> &SocketManager {
        &self.inner.socket
    }
}

impl Inner {
    async fn track(&self, run: u64, params: GenerationParams) -> Result<Task, TrackError> {
        let receipt = self.api.submit(&params).await.map_err(|e| {
            tracing::warn!(error = %e, "task submission failed");
            TrackError::Api(e)
        })?;
        let task_id = receipt.task_id.clone();
        tracing::info!(task_id = %task_id, task_type = %params.task_type, "task submitted");
        self.update(run, |s| s.task_id = Some(task_id.clone()));

        let mut task = Task::queued(task_id, receipt.created_at);
        if self.socket.is_connected() && self.follow_push(run, &mut task).await {
            return Ok(task);
        }
        self.follow_poll(run, &mut task).await?;
        Ok(task)
    }

    /// Track from pushed updates. Returns `true` once the task is terminal,
    /// `false` when the poller should take over.
    async fn follow_push(&self, run: u64, task: &mut Task) -> bool {
        let (tx, mut updates) = mpsc::unbounded_channel();
        let wanted = task.id.clone();
        let _observer = self.socket.on_task_update(move |update| {
            if update.task_id == wanted {
                let _ = tx.send(update.clone());
            }
        });

        let mut states = self.socket.watch_state();
        if !states.borrow_and_update().is_connected() || !self.socket.subscribe(&task.id) {
            return false;
        }
        let _release = Release {
            socket: &self.socket,
            task_id: task.id.clone(),
        };
        self.update(run, |s| s.channel = Some(Channel::Push));

        let deadline = tokio::time::sleep(self.push_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                Some(update) = updates.recv() => match task.apply(&update) {
                    Ok(UpdateOutcome::Advanced) if task.is_terminal() => return true,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(task_id = %task.id, error = %e, "ignoring inconsistent push update");
                    }
                },
                changed = states.changed() => {
                    if changed.is_err() || !states.borrow_and_update().is_connected() {
                        tracing::info!(task_id = %task.id, "push channel lost, falling back to polling");
                        return false;
                    }
                }
                _ = &mut deadline => {
                    tracing::warn!(
                        task_id = %task.id,
                        timeout_ms = self.push_timeout.as_millis() as u64,
                        "no terminal push update in time, falling back to polling"
                    );
                    return false;
                }
            }
        }
    }

    async fn follow_poll(&self, run: u64, task: &mut Task) -> Result<(), TrackError> {
        self.update(run, |s| s.channel = Some(Channel::Poll));
        let task_id = task.id.clone();
        let polled = self
            .poller
            .poll_with(&task_id, |seen| {
                if let Err(e) = task.apply(&seen.to_update()) {
                    tracing::warn!(task_id = %task_id, error = %e, "inconsistent task status");
                }
            })
            .await?;
        if !task.is_terminal() {
            *task = polled;
        }
        Ok(())
    }

    /// Apply the terminal transition of `run`. Dropped if the run was
    /// cancelled or superseded.
    fn finish(&self, run: u64, outcome: Result<Task, TrackError>) {
        let applied = self.state.send_if_modified(|s| {
            if self.run_seq.load(Ordering::SeqCst) != run || s.phase != Phase::Generating {
                return false;
            }
            match &outcome {
                Ok(task) if task.status == TaskStatus::Succeeded => {
                    s.phase = Phase::Succeeded;
                    s.result_url = task
                        .result
                        .as_ref()
                        .and_then(TaskResult::first_url)
                        .map(str::to_string);
                }
                Ok(task) => {
                    s.phase = Phase::Failed;
                    s.error = Some(
                        task.error
                            .as_ref()
                            .map(|f| f.message_or(GENERIC_FAILURE_MESSAGE))
                            .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
                    );
                }
                Err(e) => {
                    s.phase = Phase::Failed;
                    s.error = Some(e.user_message());
                }
            }
            s.history_version += 1;
            true
        });
        if !applied {
            return;
        }
        let state = self.state.borrow().clone();
        match state.phase {
            Phase::Succeeded if state.result_url.is_none() => {
                tracing::warn!(task_id = ?state.task_id, "task succeeded without an image");
            }
            Phase::Succeeded => tracing::info!(task_id = ?state.task_id, "generation succeeded"),
            _ => tracing::info!(
                task_id = ?state.task_id,
                error = state.error.as_deref().unwrap_or_default(),
                "generation failed"
            ),
        }
    }

    fn update(&self, run: u64, apply: impl FnOnce(&mut GenerationState)) {
        self.state.send_if_modified(|s| {
            if self.run_seq.load(Ordering::SeqCst) != run || s.phase != Phase::Generating {
                return false;
            }
            apply(s);
            true
        });
    }

    fn cancel_run(&self, run: u64) -> bool {
        {
            let mut active = lock(&self.active);
            if active.as_ref().is_some_and(|a| a.run == run) {
                if let Some(a) = active.take() {
                    a.abort.abort();
                }
            }
        }
        let cancelled = self.state.send_if_modified(|s| {
            if self.run_seq.load(Ordering::SeqCst) != run || s.phase != Phase::Generating {
                return false;
            }
            *s = s.cleared();
            true
        });
        if cancelled {
            tracing::info!(run, "generation cancelled");
        }
        cancelled
    }

    fn clear_active(&self, run: u64) {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|a| a.run == run) {
            active.take();
        }
    }
}

/// Cancels a run whose `generate` future was dropped before it finished.
struct CancelOnDrop<'a> {
    inner: &'a Inner,
    run: u64,
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.cancel_run(self.run);
        }
    }
}

/// Stops re-subscribing to a task once push tracking of it ends.
struct Release<'a> {
    socket: &'a SocketManager,
    task_id: TaskId,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.socket.release(&self.task_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
