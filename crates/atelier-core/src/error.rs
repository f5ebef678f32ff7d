//! Error taxonomy for submission, tracking, and transport.

use crate::params::TaskType;
use crate::task::{TaskId, TaskStatus};

/// Shown when the backend marks a task failed without saying why.
pub const GENERIC_FAILURE_MESSAGE: &str = "generation failed";
/// Shown when the poller runs out of attempts.
pub const TIMEOUT_MESSAGE: &str = "task timed out, please retry";

// ── Input ─────────────────────────────────────────────────────────────────────

/// Missing or malformed input, caught before anything is submitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{task_type} needs {required} reference image(s), got {got}")]
    MissingReferenceImages {
        task_type: TaskType,
        required: usize,
        got: usize,
    },
    #[error("{0} needs a prompt or at least one selected option")]
    MissingPrompt(TaskType),
    #[error("reference image URL is empty")]
    EmptyReferenceImage,
    #[error("{field} is {len} characters, limit is {max}")]
    TooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },
}

// ── REST ──────────────────────────────────────────────────────────────────────

/// A failed REST call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response (DNS, refused, reset, timeout).
    #[error("request failed: {0}")]
    Transport(String),
    /// Non-2xx HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    /// HTTP 2xx but the envelope `code` is outside the success range.
    #[error("{message} (code {code})")]
    Business { code: i64, message: String },
    /// The body was not the shape we expected.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Short message suitable for the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Business { message, .. } | Self::Http { message, .. } if !message.is_empty() => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}

// ── Tracking ──────────────────────────────────────────────────────────────────

/// Why tracking a task did not produce a succeeded task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    #[error("task did not finish within {attempts} status checks")]
    Timeout { attempts: u32 },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("tracking cancelled")]
    Cancelled,
}

impl TrackError {
    /// The message the `failed` generation state carries.
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout { .. } => TIMEOUT_MESSAGE.to_string(),
            Self::Api(e) => e.user_message(),
            Self::Cancelled => self.to_string(),
        }
    }
}

/// An update that would break the task lifecycle invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("update for {got} applied to task {expected}")]
    WrongTask { expected: TaskId, got: TaskId },
    #[error("inconsistent {status} task: {detail}")]
    InconsistentPayload {
        status: TaskStatus,
        detail: &'static str,
    },
    #[error("timestamps of task {0} run backwards")]
    NonMonotonicTimestamps(TaskId),
}

// ── Push channel ──────────────────────────────────────────────────────────────

/// A push-channel failure. Never surfaced to the user directly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
}
