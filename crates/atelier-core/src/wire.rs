//! Atelier wire format: REST envelope, list/submit payloads, and push frames.
//!
//! REST responses are wrapped in `{ code, data, msg }`. A `code` of 0 or 200
//! is success; anything else is a business failure even on HTTP 200.
//!
//! Push frames are JSON text messages discriminated by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::{form_urlencoded, Url};

use crate::error::ApiError;
use crate::task::{lenient_time, Task, TaskId, TaskStatus, TaskUpdate};

// ── REST envelope ─────────────────────────────────────────────────────────────

/// Envelope `code` values that mean success.
pub const SUCCESS_CODES: [i64; 2] = [0, 200];

/// The JSON wrapper around every REST response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default, alias = "message")]
    pub msg: Option<String>,
}

impl<T> Envelope<T> {
    pub fn is_success(&self) -> bool {
        SUCCESS_CODES.contains(&self.code)
    }

    /// Unwrap into the payload, turning a non-success code into
    /// [`ApiError::Business`].
    pub fn into_result(self) -> Result<T, ApiError> {
        if !self.is_success() {
            return Err(ApiError::Business {
                code: self.code,
                message: self.msg.unwrap_or_default(),
            });
        }
        self.data
            .ok_or_else(|| ApiError::Decode("success envelope without data".to_string()))
    }
}

// ── Submit / list ─────────────────────────────────────────────────────────────

/// Acknowledgement of a task submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(
        default,
        deserialize_with = "lenient_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

/// Task list query. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub page_size: u32,
    pub status: Option<TaskStatus>,
}

impl ListQuery {
    pub fn page(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
            status: None,
        }
    }

    pub fn with_status(mut self, status: Option<TaskStatus>) -> Self {
        self.status = status;
        self
    }

    /// Query-string pairs, in wire order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("page_size", self.page_size.to_string()),
        ];
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        pairs
    }
}

/// One page of the task list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    #[serde(alias = "tasks")]
    pub data: Vec<Task>,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

// ── Push frames ───────────────────────────────────────────────────────────────

/// Inbound push frame. Unrecognized `type`s land in `Unknown` and are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    TaskUpdate(TaskUpdate),
    /// Server acknowledgement of a subscribe.
    Subscribed { task_id: TaskId },
    /// Server echo of our heartbeat.
    Heartbeat,
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// Parse a text frame. Returns `None` for anything that is not a valid
    /// frame; callers drop those.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Outbound push frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { task_id: TaskId },
    Heartbeat,
}

impl ClientFrame {
    pub fn to_text(&self) -> String {
        // Serializing a plain tagged enum of strings cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ── Push URL ──────────────────────────────────────────────────────────────────

/// Path of the task-update push endpoint.
pub const PUSH_PATH: &str = "/api/v1/ws/tasks";

/// Build the push URL from the REST base URL: `http` → `ws`, `https` → `wss`,
/// token carried as a percent-encoded query parameter.
pub fn push_url(base_url: &str, token: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    let raw = format!("{ws_base}{PUSH_PATH}");
    match Url::parse(&raw) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("token", token);
            url.into()
        }
        // Unparseable bases still get an encoded token; the connect attempt
        // reports the bad URL.
        Err(_) => {
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("token", token)
                .finish();
            format!("{raw}?{query}")
        }
    }
}
