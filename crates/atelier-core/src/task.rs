//! Generation task model.
//!
//! A task moves forward only: queued → processing → {succeeded | failed}.
//! Terminal states are never left. `result` and `error` are mutually
//! exclusive and both stay empty until a terminal state is reached.
//!
//! Two list surfaces on the backend disagree on the in-progress label
//! (`processing` vs `running`). Both deserialize to
//! [`TaskStatus::Processing`]; only the canonical name is ever written.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TransitionError;
use crate::params::TaskType;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Opaque, backend-assigned task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines and terminal output.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Lifecycle status of a generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    #[serde(alias = "running")]
    Processing,
    Succeeded,
    Failed,
}

impl TaskStatus {
    /// Position in the lifecycle. Both terminal states share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Processing => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// True only for a strictly forward move out of a non-terminal state.
    /// Skipping `processing` is allowed; a poller can miss it entirely.
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" | "running" => Some(Self::Processing),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Outcome payloads ──────────────────────────────────────────────────────────

/// A reference to one generated image.
///
/// The backend sends either a bare URL string or an object. Objects may
/// carry an object-storage URL alongside the generator's own URL; the
/// storage URL wins when both are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawImageRef")]
pub struct ImageRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oss_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawImageRef {
    Bare(String),
    Full {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        oss_url: Option<String>,
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
    },
}

impl From<RawImageRef> for ImageRef {
    fn from(raw: RawImageRef) -> Self {
        match raw {
            RawImageRef::Bare(url) => Self {
                url: Some(url),
                ..Self::default()
            },
            RawImageRef::Full {
                url,
                oss_url,
                width,
                height,
            } => Self {
                url,
                oss_url,
                width,
                height,
            },
        }
    }
}

impl ImageRef {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Storage URL if present, else the generator URL. Empty strings are skipped.
    pub fn best_url(&self) -> Option<&str> {
        self.oss_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.url.as_deref().filter(|u| !u.is_empty()))
    }
}

/// Output of a succeeded task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

impl TaskResult {
    /// URL of the first image that has one.
    pub fn first_url(&self) -> Option<&str> {
        self.images.iter().find_map(ImageRef::best_url)
    }
}

/// Failure details of a failed task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl TaskFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The task's own message, or `fallback` when the backend sent none.
    pub fn message_or(&self, fallback: &str) -> String {
        if self.message.trim().is_empty() {
            fallback.to_string()
        } else {
            self.message.clone()
        }
    }
}

// ── Task ──────────────────────────────────────────────────────────────────────

/// Parameters echoed back by the backend. Immutable once submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmittedParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTimestamps {
    #[serde(default, deserialize_with = "lenient_time")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_time")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_time")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// One submitted generation job, as the backend reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(alias = "task_id")]
    pub id: TaskId,
    pub status: TaskStatus,
    #[serde(flatten)]
    pub params: SubmittedParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    #[serde(flatten)]
    pub timestamps: TaskTimestamps,
}

/// A status change for one task, from a push frame or a poll response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    #[serde(
        default,
        deserialize_with = "lenient_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub finished_at: Option<DateTime<Utc>>,
}

/// What [`Task::apply`] did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The task moved forward.
    Advanced,
    /// Duplicate, stale, or out-of-order update; nothing changed.
    Ignored,
}

impl Task {
    /// A freshly submitted task, as known locally right after submission.
    pub fn queued(id: TaskId, created_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            status: TaskStatus::Queued,
            params: SubmittedParams::default(),
            result: None,
            error: None,
            timestamps: TaskTimestamps {
                created_at: created_at.or_else(|| Some(Utc::now())),
                ..TaskTimestamps::default()
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply an update, enforcing forward-only transitions.
    ///
    /// Updates that do not advance the status are ignored, never applied.
    /// An advancing update whose payload contradicts its status is rejected.
    pub fn apply(&mut self, update: &TaskUpdate) -> Result<UpdateOutcome, TransitionError> {
        if update.task_id != self.id {
            return Err(TransitionError::WrongTask {
                expected: self.id.clone(),
                got: update.task_id.clone(),
            });
        }
        if !self.status.can_advance_to(update.status) {
            return Ok(UpdateOutcome::Ignored);
        }
        check_payload(update.status, update.result.is_some(), update.error.is_some())?;

        let now = Utc::now();
        self.status = update.status;
        if self.timestamps.started_at.is_none() && update.status != TaskStatus::Queued {
            self.timestamps.started_at = Some(now);
        }
        if update.status.is_terminal() {
            self.result = update.result.clone();
            self.error = update.error.clone();
            let finished = update.finished_at.unwrap_or(now);
            // Timestamps never run backwards, even if the server clock does.
            let floor = self
                .timestamps
                .started_at
                .or(self.timestamps.created_at)
                .unwrap_or(finished);
            self.timestamps.finished_at = Some(finished.max(floor));
        }
        Ok(UpdateOutcome::Advanced)
    }

    /// Project this task onto an update, as if it had been pushed.
    pub fn to_update(&self) -> TaskUpdate {
        TaskUpdate {
            task_id: self.id.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            finished_at: self.timestamps.finished_at,
        }
    }

    /// Validate a task received from the backend.
    pub fn check_invariants(&self) -> Result<(), TransitionError> {
        check_payload(self.status, self.result.is_some(), self.error.is_some())?;

        let ts = &self.timestamps;
        if ts.finished_at.is_some() && !self.status.is_terminal() {
            return Err(TransitionError::InconsistentPayload {
                status: self.status,
                detail: "finished_at set on a non-terminal task",
            });
        }
        let ordered = [ts.created_at, ts.started_at, ts.finished_at];
        let mut last: Option<DateTime<Utc>> = None;
        for t in ordered.into_iter().flatten() {
            if let Some(prev) = last {
                if t < prev {
                    return Err(TransitionError::NonMonotonicTimestamps(self.id.clone()));
                }
            }
            last = Some(t);
        }
        Ok(())
    }
}

fn check_payload(status: TaskStatus, has_result: bool, has_error: bool) -> Result<(), TransitionError> {
    let detail = match (status, has_result, has_error) {
        (_, true, true) => "result and error are both populated",
        (TaskStatus::Queued | TaskStatus::Processing, true, _) => "result on a non-terminal task",
        (TaskStatus::Queued | TaskStatus::Processing, _, true) => "error on a non-terminal task",
        (TaskStatus::Succeeded, _, true) => "error on a succeeded task",
        (TaskStatus::Failed, true, _) => "result on a failed task",
        _ => return Ok(()),
    };
    Err(TransitionError::InconsistentPayload { status, detail })
}

// ── Time parsing ──────────────────────────────────────────────────────────────

/// Accepts RFC 3339 as well as the offset-less ISO form some backend
/// surfaces emit; the latter is taken as UTC.
pub(crate) fn lenient_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(t) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}
