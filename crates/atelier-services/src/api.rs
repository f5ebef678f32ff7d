//! Collaborator seams: the REST task API and the auth token.

use std::sync::RwLock;

use async_trait::async_trait;

use atelier_core::wire::{ListQuery, SubmitReceipt, TaskPage};
use atelier_core::{ApiError, GenerationParams, Task, TaskId};

/// The task endpoints of the backend.
///
/// Implementations unwrap the response envelope, so a business failure on
/// HTTP 200 comes back as [`ApiError::Business`].
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Submit a generation job.
    async fn submit(&self, params: &GenerationParams) -> Result<SubmitReceipt, ApiError>;

    /// Fetch the current state of one task.
    async fn get_task(&self, task_id: &TaskId) -> Result<Task, ApiError>;

    /// Fetch one page of the caller's tasks, newest first.
    async fn list_tasks(&self, query: &ListQuery) -> Result<TaskPage, ApiError>;
}

/// Where the current auth token comes from. Read on every connect and
/// every request, so a sign-in or sign-out takes effect without rebuilding
/// anything.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A token that can be swapped at runtime.
#[derive(Debug, Default)]
pub struct SharedToken {
    token: RwLock<Option<String>>,
}

impl SharedToken {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl TokenSource for SharedToken {
    /// Blank tokens count as signed out.
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .filter(|t| !t.trim().is_empty())
    }
}
