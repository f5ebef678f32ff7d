//! REST adapter for the task endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use atelier_core::wire::{Envelope, ListQuery, SubmitReceipt, TaskPage};
use atelier_core::{ApiError, GenerationParams, Task, TaskId};
use atelier_services::{TaskApi, TokenSource};

const SUBMIT_PATH: &str = "/api/v1/images/generate";
const TASKS_PATH: &str = "/api/v1/images/tasks";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`TaskApi`] over HTTP. Every request carries the current token both as
/// a bearer `Authorization` header and as a `token` header.
pub struct HttpTaskApi {
    client: Client,
    base: Url,
    tokens: Arc<dyn TokenSource>,
}

impl HttpTaskApi {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> Result<Self, ApiError> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ApiError::Transport(format!("invalid base URL {base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base,
            tokens,
        })
    }

    fn url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}{path}"));
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.tokens.token() {
            Some(token) => request.bearer_auth(&token).header("token", token),
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: error_message(&body)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
            });
        }
        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
        envelope.into_result()
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn submit(&self, params: &GenerationParams) -> Result<SubmitReceipt, ApiError> {
        let url = self.url(SUBMIT_PATH);
        tracing::debug!(%url, task_type = %params.task_type, "submitting task");
        self.execute(self.client.post(url).json(params)).await
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Task, ApiError> {
        let url = self.url(&format!("{TASKS_PATH}/{task_id}"));
        self.execute(self.client.get(url)).await
    }

    async fn list_tasks(&self, query: &ListQuery) -> Result<TaskPage, ApiError> {
        let mut url = self.url(TASKS_PATH);
        url.query_pairs_mut()
            .extend_pairs(query.to_pairs().iter().map(|(k, v)| (*k, v.as_str())));
        self.execute(self.client.get(url)).await
    }
}

/// Pull a human-readable message out of an error body. Accepts the
/// envelope's `msg`/`message` and the framework-level `detail`.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["msg", "message", "detail"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
