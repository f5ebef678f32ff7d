//! In-memory stand-ins for the backend, used by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use atelier_core::wire::{ListQuery, SubmitReceipt, TaskPage};
use atelier_core::{
    ApiError, GenerationParams, ImageRef, Task, TaskFailure, TaskId, TaskResult, TaskStatus,
    TransportError,
};

use crate::api::TaskApi;
use crate::transport::{Connector, Link, LinkEvent};

// ── Tasks ─────────────────────────────────────────────────────────────────────

pub(crate) fn task(id: &str, status: TaskStatus) -> Task {
    let mut task = Task::queued(TaskId::from(id), None);
    task.status = status;
    task
}

pub(crate) fn succeeded(id: &str, url: &str) -> Task {
    let mut task = task(id, TaskStatus::Succeeded);
    task.result = Some(TaskResult {
        images: vec![ImageRef::from_url(url)],
    });
    task
}

pub(crate) fn failed(id: &str, message: &str) -> Task {
    let mut task = task(id, TaskStatus::Failed);
    task.error = Some(TaskFailure::new("E", message));
    task
}

// ── Task API ──────────────────────────────────────────────────────────────────

/// Scripted REST backend.
///
/// `get_task` answers from a script; the last entry repeats forever.
/// `list_tasks` slices `listing` into pages.
#[derive(Default)]
pub(crate) struct FakeApi {
    submit_script: Mutex<VecDeque<Result<SubmitReceipt, ApiError>>>,
    status_script: Mutex<VecDeque<Result<Task, ApiError>>>,
    listing: Mutex<Vec<Task>>,
    list_failures: Mutex<VecDeque<ApiError>>,
    list_delay: Mutex<Duration>,
    submits: AtomicUsize,
    gets: AtomicUsize,
    queries: Mutex<Vec<ListQuery>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_submit(&self, result: Result<SubmitReceipt, ApiError>) {
        self.submit_script.lock().unwrap().push_back(result);
    }

    pub fn push_status(&self, result: Result<Task, ApiError>) {
        self.status_script.lock().unwrap().push_back(result);
    }

    pub fn set_listing(&self, tasks: Vec<Task>) {
        *self.listing.lock().unwrap() = tasks;
    }

    pub fn fail_next_list(&self, error: ApiError) {
        self.list_failures.lock().unwrap().push_back(error);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<ListQuery> {
        self.queries.lock().unwrap().clone()
    }
}

pub(crate) fn receipt(id: &str) -> SubmitReceipt {
    SubmitReceipt {
        task_id: TaskId::from(id),
        status: TaskStatus::Queued,
        created_at: None,
    }
}

#[async_trait]
impl TaskApi for FakeApi {
    async fn submit(&self, _params: &GenerationParams) -> Result<SubmitReceipt, ApiError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        self.submit_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(receipt(&format!("task-{n}"))))
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Task, ApiError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let mut script = self.status_script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        next.unwrap_or_else(|| Ok(task(task_id.as_str(), TaskStatus::Processing)))
    }

    async fn list_tasks(&self, query: &ListQuery) -> Result<TaskPage, ApiError> {
        self.queries.lock().unwrap().push(query.clone());
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.list_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        let listing = self.listing.lock().unwrap();
        let matching: Vec<&Task> = listing
            .iter()
            .filter(|t| query.status.map_or(true, |s| t.status == s))
            .collect();
        let start = ((query.page - 1) * query.page_size) as usize;
        let data = matching
            .iter()
            .skip(start)
            .take(query.page_size as usize)
            .map(|t| (*t).clone())
            .collect();
        Ok(TaskPage {
            data,
            total: matching.len() as u64,
            page: Some(query.page),
            page_size: Some(query.page_size),
        })
    }
}

// ── Push transport ────────────────────────────────────────────────────────────

/// Server side of one fake connection.
pub(crate) struct FakeServer {
    to_client: mpsc::UnboundedSender<LinkEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl FakeServer {
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(LinkEvent::Text(text.to_string()));
    }

    pub fn fail(&self, error: &str) {
        let _ = self.to_client.send(LinkEvent::Error(error.to_string()));
    }

    pub fn close(&self) {
        let _ = self.to_client.send(LinkEvent::Closed);
    }

    /// Next frame the client sent. `None` once the client hung up.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }
}

/// Connector whose connections are handed to the test as [`FakeServer`]s.
pub(crate) struct FakeConnector {
    accepting: AtomicBool,
    refusals: AtomicUsize,
    attempts: AtomicUsize,
    urls: Mutex<Vec<String>>,
    servers: mpsc::UnboundedSender<FakeServer>,
}

impl FakeConnector {
    pub fn new(accepting: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accepting: AtomicBool::new(accepting),
            refusals: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            servers,
        });
        (connector, rx)
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Refuse the next `n` attempts regardless of `accepting`.
    pub fn refuse_next(&self, n: usize) {
        self.refusals.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<String> {
        self.urls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused || !self.accepting.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (link, from_client, to_client) = Link::pair();
        let _ = self.servers.send(FakeServer {
            to_client,
            from_client,
        });
        Ok(link)
    }
}
