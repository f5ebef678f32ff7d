//! Pull-side task tracking.
//!
//! Queries task status on a fixed interval until the task is terminal or
//! the attempt budget is spent. The first query happens one interval after
//! the start; the poller never queries more than `max_attempts` times.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use atelier_core::config::PollerConfig;
use atelier_core::{ApiError, Task, TaskId, TrackError};

use crate::api::TaskApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl From<&PollerConfig> for PollSettings {
    fn from(config: &PollerConfig) -> Self {
        Self {
            interval: config.interval(),
            max_attempts: config.max_attempts,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&PollerConfig::default())
    }
}

/// Polls the task API for one task at a time.
#[derive(Clone)]
pub struct TaskPoller {
    api: Arc<dyn TaskApi>,
    settings: PollSettings,
}

impl TaskPoller {
    pub fn new(api: Arc<dyn TaskApi>, settings: PollSettings) -> Self {
        Self { api, settings }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Poll until `task_id` reaches a terminal status.
    ///
    /// Returns the terminal task, succeeded or failed. A failed status
    /// query ends polling with [`TrackError::Api`]; running out of attempts
    /// ends it with [`TrackError::Timeout`].
    pub async fn poll(&self, task_id: &TaskId) -> Result<Task, TrackError> {
        self.poll_with(task_id, |_| {}).await
    }

    /// Like [`poll`](Self::poll), calling `on_status` with every response,
    /// terminal or not.
    pub async fn poll_with(
        &self,
        task_id: &TaskId,
        mut on_status: impl FnMut(&Task),
    ) -> Result<Task, TrackError> {
        let PollSettings {
            interval,
            max_attempts,
        } = self.settings;

        for attempt in 1..=max_attempts {
            tokio::time::sleep(interval).await;

            let task = self.api.get_task(task_id).await.map_err(|e| {
                tracing::warn!(task_id = %task_id, attempt, error = %e, "status query failed");
                TrackError::Api(e)
            })?;
            if task.id != *task_id {
                return Err(TrackError::Api(ApiError::Decode(format!(
                    "asked for task {task_id}, got {}",
                    task.id
                ))));
            }
            on_status(&task);

            if task.is_terminal() {
                tracing::info!(
                    task_id = %task_id,
                    attempt,
                    status = %task.status,
                    "task finished"
                );
                return Ok(task);
            }
            tracing::debug!(task_id = %task_id, attempt, status = %task.status, "task still running");
        }

        tracing::warn!(task_id = %task_id, attempts = max_attempts, "gave up polling");
        Err(TrackError::Timeout {
            attempts: max_attempts,
        })
    }

    /// Poll on a background task. Dropping the handle cancels polling.
    pub fn spawn(&self, task_id: TaskId) -> PollHandle {
        let poller = self.clone();
        let task = tokio::spawn(async move { poller.poll(&task_id).await });
        PollHandle { task }
    }
}

/// A poll running in the background.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<Result<Task, TrackError>>,
}

impl PollHandle {
    /// Stop polling. No query is issued after this returns.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Wait for the poll to end.
    pub async fn outcome(&mut self) -> Result<Task, TrackError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(TrackError::Cancelled),
            Err(e) => Err(TrackError::Api(ApiError::Transport(format!(
                "poll task failed: {e}"
            )))),
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
